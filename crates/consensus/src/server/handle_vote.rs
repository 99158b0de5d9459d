use snafu::{OptionExt as _, ensure};
use tracing::{debug, trace};
use vbft_consensus_core::block::BlockHash;
use vbft_consensus_core::height::View;
use vbft_consensus_core::msg::{
    CommitVote, ConsensusMessage, EndorseVote, LockedBlock, SealedBlock, VoteMsg,
};
use vbft_consensus_core::peer::PeerIdx;
use vbft_consensus_core::signed::{Signable, Signed};

use super::{
    ConflictingVoteSnafu, ConsensusResult, InvalidSignatureSnafu, LOG_TARGET, NotVoterSnafu,
    Phase, ProcessMessageResult, SenderMismatchSnafu, Server, WrongViewSnafu,
};
use crate::event_timer::TimerKind;
use crate::vote_set::TallyOutcome;

impl Server {
    fn verify_vote<T>(&self, from: PeerIdx, voter: PeerIdx, vote: &Signed<T>, view: View) -> ProcessMessageResult<()>
    where
        T: Signable,
    {
        ensure!(
            view == self.round.view,
            WrongViewSnafu {
                expected: self.round.view,
                received: view,
            }
        );
        ensure!(
            voter == from,
            SenderMismatchSnafu {
                peer_idx: from,
                claimed: voter,
            }
        );
        ensure!(
            self.round.participants.is_voter(voter),
            NotVoterSnafu { peer_idx: voter }
        );
        vote.verify_sig_peer_pubkey(self.peer_pubkey(voter)?)
            .ok()
            .context(InvalidSignatureSnafu { peer_idx: voter })?;
        Ok(())
    }

    fn tally_outcome(
        outcome: TallyOutcome,
        peer_idx: PeerIdx,
        received: BlockHash,
    ) -> ProcessMessageResult<bool> {
        match outcome {
            TallyOutcome::Inserted => Ok(true),
            TallyOutcome::Duplicate => Ok(false),
            TallyOutcome::Conflicting { existing } => ConflictingVoteSnafu {
                peer_idx,
                existing,
                received,
            }
            .fail(),
        }
    }

    pub(crate) async fn handle_endorsement(
        &mut self,
        from: PeerIdx,
        msg: VoteMsg<EndorseVote>,
    ) -> ProcessMessageResult<()> {
        self.verify_vote(from, msg.voter, &msg.vote, msg.vote.view)?;

        let hash = msg.vote.block_hash;
        let outcome = self.round.endorsements.insert(from, hash, msg.vote.sig);
        if !Self::tally_outcome(outcome, from, hash)? {
            return Ok(());
        }
        trace!(
            target: LOG_TARGET,
            %from,
            hash = %hash.to_short(),
            count = self.round.endorsements.count_for(hash),
            "Endorsement"
        );

        self.check_endorse_quorum().await?;
        Ok(())
    }

    pub(crate) async fn handle_commit(
        &mut self,
        from: PeerIdx,
        msg: VoteMsg<CommitVote>,
    ) -> ProcessMessageResult<()> {
        self.verify_vote(from, msg.voter, &msg.vote, msg.vote.view)?;

        let hash = msg.vote.block_hash;
        let outcome = self.round.commits.insert(from, hash, msg.vote.sig);
        if !Self::tally_outcome(outcome, from, hash)? {
            return Ok(());
        }
        trace!(
            target: LOG_TARGET,
            %from,
            hash = %hash.to_short(),
            count = self.round.commits.count_for(hash),
            "Commit"
        );

        self.check_commit_quorum().await?;
        Ok(())
    }

    pub(crate) async fn check_endorse_quorum(&mut self) -> ConsensusResult<()> {
        let quorum = self.round.participants.quorum();
        let Some(hash) = self.round.endorsements.quorum_block(quorum) else {
            return Ok(());
        };

        if matches!(self.round.phase, Phase::Idle | Phase::Proposed) {
            debug!(
                target: LOG_TARGET,
                height = %self.round.height,
                view = %self.round.view,
                hash = %hash.to_short(),
                "Endorse quorum reached"
            );
            self.round.phase = Phase::Endorsed;

            let height = self.round.height;
            self.timer.cancel_timer(height);
            self.timer
                .cancel_event_timer(TimerKind::ProposeBlock, height);
            self.timer
                .cancel_event_timer(TimerKind::EndorseBlock, height);
            self.arm(TimerKind::CommitBlock);
        }

        if self.round.phase == Phase::Endorsed {
            self.maybe_commit(hash);
        }

        self.check_commit_quorum().await
    }

    /// Lock on the endorsed block and send our commit for it
    fn maybe_commit(&mut self, hash: BlockHash) {
        let Some(our_idx) = self.our_voter_idx() else {
            return;
        };
        if self.round.committed {
            return;
        }
        let Some(block) = self
            .round
            .proposal
            .as_ref()
            .filter(|proposal| proposal.block.hash() == hash)
            .map(|proposal| proposal.block.clone())
        else {
            return;
        };

        let locked = LockedBlock {
            view: self.round.view,
            block,
            sigs: self.round.endorsements.signatures_for(hash),
        };
        self.round.note_locked(locked.clone());
        self.round.locked = Some(locked);

        let vote = Signed::new_sign(
            CommitVote {
                height: self.round.height,
                view: self.round.view,
                block_hash: hash,
            },
            self.seckey,
        );
        self.round.commits.insert(our_idx, hash, vote.sig);
        self.round.committed = true;
        self.round.phase = Phase::Committed;

        debug!(target: LOG_TARGET, height = %self.round.height, hash = %hash.to_short(), "Committing");
        self.network.broadcast(ConsensusMessage::BlockCommit(VoteMsg {
            voter: our_idx,
            vote,
        }));
    }

    pub(crate) async fn check_commit_quorum(&mut self) -> ConsensusResult<()> {
        let quorum = self.round.participants.quorum();
        let Some(hash) = self.round.commits.quorum_block(quorum) else {
            return Ok(());
        };
        let Some(block) = self.round.block_for(hash).cloned() else {
            debug!(target: LOG_TARGET, hash = %hash.to_short(), "Commit quorum for a block we don't have");
            return Ok(());
        };

        let sigs = self.round.commits.signatures_for(hash);
        self.seal(SealedBlock {
            block,
            view: self.round.view,
            sigs,
        })
        .await
    }
}
