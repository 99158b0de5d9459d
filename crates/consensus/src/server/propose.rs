use tracing::debug;
use vbft_consensus_core::block::{Block, BlockHeader, ChainBlock};
use vbft_consensus_core::msg::{ConsensusMessage, ProposalBody};
use vbft_consensus_core::peer::PeerIdx;
use vbft_consensus_core::signed::Signed;
use vbft_consensus_core::timestamp::Timestamp;
use vbft_consensus_core::vrf::compute_vrf;

use super::{ConsensusResult, LOG_TARGET, Phase, Server};

impl Server {
    /// Propose a block, if we lead the current view
    ///
    /// A block locked in an earlier view of this height takes precedence over
    /// a fresh one.
    pub(crate) async fn propose(&mut self) -> ConsensusResult<()> {
        let Some(our_idx) = self.our_idx else {
            return Ok(());
        };
        let (height, view) = (self.round.height, self.round.view);
        if self.round.participants.leader(view) != our_idx || self.round.phase != Phase::Idle {
            return Ok(());
        }

        let block = match self.round.highest_locked.as_ref() {
            Some(locked) => {
                debug!(target: LOG_TARGET, %height, %view, locked_view = %locked.view, "Re-proposing locked block");
                locked.block.clone()
            }
            None => self.build_block(our_idx),
        };

        let proposal = Signed::new_sign(
            ProposalBody {
                height,
                view,
                nonce: rand::random(),
                proposer: our_idx,
                block,
            },
            self.seckey,
        );

        debug!(
            target: LOG_TARGET,
            %height,
            %view,
            hash = %proposal.block.hash().to_short(),
            txs = proposal.block.transactions().len(),
            "Proposing block"
        );
        self.network
            .broadcast(ConsensusMessage::BlockProposal(proposal.clone()));

        if let Err(err) = self.handle_proposal(our_idx, proposal).await {
            self.handle_process_error(our_idx, err)?;
        }
        Ok(())
    }

    fn build_block(&self, our_idx: PeerIdx) -> Block {
        let transactions = self.tx_pool.get_pending_txs(self.config.max_block_txs);

        let header = BlockHeader::builder()
            .prev(&self.round.prev_header)
            .view(self.round.view)
            .proposer(our_idx)
            .timestamp(Timestamp::now())
            .prev_exec_merkle_root(self.round.prev_exec_merkle_root)
            .chain_config_hash(self.chain_config.hash())
            .vrf(compute_vrf(self.seckey, self.round.height, self.round.seed))
            .transactions(&transactions)
            .build();

        Block {
            chain_block: ChainBlock {
                header,
                transactions,
            },
            cross_chain_msg: self.round.expected_cross_msg,
        }
    }
}
