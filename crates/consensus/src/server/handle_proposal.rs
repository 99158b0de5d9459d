use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use tracing::debug;
use vbft_consensus_core::block::{Block, BlockHash, BlockHeader, ContentMismatchError};
use vbft_consensus_core::height::{Height, View};
use vbft_consensus_core::msg::{ConsensusMessage, EndorseVote, ProposalBody, VoteMsg};
use vbft_consensus_core::peer::PeerIdx;
use vbft_consensus_core::signed::Signed;
use vbft_consensus_core::vrf::{VrfError, verify_vrf};

use super::{
    EquivocationSnafu, InvalidBlockSnafu, InvalidSignatureSnafu, LOG_TARGET, NotLeaderSnafu, Phase,
    ProcessMessageResult, SenderMismatchSnafu, Server, WrongViewSnafu,
};
use crate::event_timer::TimerKind;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InvalidBlockError {
    #[snafu(display("Unsupported block version {version}"))]
    UnsupportedVersion { version: u32 },
    #[snafu(display("Block at {received}, expected {expected}"))]
    BlockHeight { expected: Height, received: Height },
    #[snafu(display("Block produced in view {header_view}, after {max_view}"))]
    FromFutureView { max_view: View, header_view: View },
    #[snafu(display("Block produced by {proposer}, leader of view {header_view} is {leader}"))]
    WrongProposer {
        proposer: PeerIdx,
        leader: PeerIdx,
        header_view: View,
    },
    ChainConfigMismatch,
    DoesNotExtend,
    ExecRootMismatch,
    CrossChainMsgMismatch,
    InvalidContent { source: ContentMismatchError },
    InvalidVrf { source: VrfError },
}

impl Server {
    /// Check a block is a valid candidate for the current height
    ///
    /// `max_view` is the view it is proposed (or sealed) in. The block itself
    /// can come from an earlier one, when re-proposing a locked block.
    pub(crate) fn validate_block(
        &self,
        block: &Block,
        max_view: View,
    ) -> Result<(), InvalidBlockError> {
        let header = block.header();

        ensure!(
            header.version == BlockHeader::VERSION,
            UnsupportedVersionSnafu {
                version: header.version
            }
        );
        ensure!(
            header.height == self.round.height,
            BlockHeightSnafu {
                expected: self.round.height,
                received: header.height,
            }
        );
        ensure!(
            header.view <= max_view,
            FromFutureViewSnafu {
                max_view,
                header_view: header.view,
            }
        );

        let leader = self.round.participants.leader(header.view);
        ensure!(
            header.proposer == leader,
            WrongProposerSnafu {
                proposer: header.proposer,
                leader,
                header_view: header.view,
            }
        );
        ensure!(
            header.chain_config_hash == self.chain_config.hash(),
            ChainConfigMismatchSnafu
        );
        ensure!(
            header.prev_block_hash == self.round.prev_hash,
            DoesNotExtendSnafu
        );
        ensure!(
            header.prev_exec_merkle_root == self.round.prev_exec_merkle_root,
            ExecRootMismatchSnafu
        );
        ensure!(
            block.cross_chain_msg == self.round.expected_cross_msg,
            CrossChainMsgMismatchSnafu
        );

        block
            .chain_block
            .verify_content()
            .context(InvalidContentSnafu)?;

        let leader_pubkey = self
            .chain_config
            .get_peer(leader)
            .expect("Participants come from the chain config");
        verify_vrf(
            leader_pubkey,
            header.height,
            self.round.seed,
            header.vrf_value,
            header.vrf_proof,
        )
        .context(InvalidVrfSnafu)?;

        Ok(())
    }

    pub(crate) async fn handle_proposal(
        &mut self,
        from: PeerIdx,
        proposal: Signed<ProposalBody>,
    ) -> ProcessMessageResult<()> {
        let (height, view) = (self.round.height, self.round.view);

        ensure!(
            proposal.view == view,
            WrongViewSnafu {
                expected: view,
                received: proposal.view,
            }
        );
        ensure!(
            proposal.proposer == from,
            SenderMismatchSnafu {
                peer_idx: from,
                claimed: proposal.proposer,
            }
        );
        ensure!(
            self.round.participants.leader(view) == from,
            NotLeaderSnafu {
                peer_idx: from,
                view,
            }
        );
        proposal
            .verify_sig_peer_pubkey(self.peer_pubkey(from)?)
            .ok()
            .context(InvalidSignatureSnafu { peer_idx: from })?;

        let hash = proposal.block.hash();
        if let Some(existing) = self.round.proposal.as_ref() {
            let existing = existing.block.hash();
            if existing == hash {
                return Ok(());
            }
            return EquivocationSnafu {
                peer_idx: from,
                existing,
                received: hash,
            }
            .fail();
        }

        self.validate_block(&proposal.block, view)
            .context(InvalidBlockSnafu)?;

        debug!(target: LOG_TARGET, %height, %view, %from, hash = %hash.to_short(), "Accepted proposal");
        self.round.proposal = Some(proposal);

        match self.round.phase {
            Phase::Idle => {
                self.round.phase = Phase::Proposed;
                self.timer.cancel_timer(height);
                self.timer
                    .cancel_event_timer(TimerKind::ProposeBlock, height);
                self.arm(TimerKind::EndorseBlock);
            }
            Phase::ViewChanging => return Ok(()),
            _ => {}
        }

        self.maybe_endorse(hash);
        self.check_endorse_quorum().await?;
        Ok(())
    }

    fn maybe_endorse(&mut self, hash: BlockHash) {
        let Some(our_idx) = self.our_voter_idx() else {
            return;
        };
        if self.round.endorsed {
            return;
        }
        if !self.round.may_vote_for(hash) {
            debug!(target: LOG_TARGET, hash = %hash.to_short(), "Locked on a different block, not endorsing");
            return;
        }

        let vote = Signed::new_sign(
            EndorseVote {
                height: self.round.height,
                view: self.round.view,
                block_hash: hash,
            },
            self.seckey,
        );
        self.round.endorsements.insert(our_idx, hash, vote.sig);
        self.round.endorsed = true;

        self.network
            .broadcast(ConsensusMessage::BlockEndorsement(VoteMsg {
                voter: our_idx,
                vote,
            }));
    }
}
