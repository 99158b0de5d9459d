use snafu::ResultExt as _;
use tracing::{info, warn};
use vbft_consensus_core::msg::{ConsensusMessage, PeerStatus, SealedBlock};
use vbft_util_error::fmt::FmtCompact as _;

use super::{ConsensusResult, FatalSnafu, LOG_TARGET, Phase, Server};
use crate::event_timer::TimerKind;

impl Server {
    /// Finalize the current height with `sealed` and move to the next one
    ///
    /// If the chain store can't take the block right now, it is kept and
    /// retried on the next heartbeat, and the height does not advance.
    pub(crate) async fn seal(&mut self, sealed: SealedBlock) -> ConsensusResult<()> {
        let height = self.round.height;
        debug_assert_eq!(sealed.height(), height);

        self.round.phase = Phase::Sealed;
        self.timer.cancel_round(height);

        if let Err(err) = self.block_pool.add_sealed_block(sealed.clone()).await {
            if err.is_fatal() {
                return Err(err).context(FatalSnafu);
            }
            warn!(
                target: LOG_TARGET,
                %height,
                err = %err.fmt_compact(),
                "Could not apply sealed block, will retry"
            );
            self.pending_seal = Some(sealed);
            self.arm(TimerKind::PeerHeartbeat);
            return Ok(());
        }

        let block_hash = sealed.block.hash();
        info!(
            target: LOG_TARGET,
            %height,
            view = %sealed.view,
            hash = %block_hash.to_short(),
            txs = sealed.block.transactions().len(),
            "Block sealed"
        );

        self.network
            .broadcast(ConsensusMessage::BlockSignatures(sealed.to_block_signatures()));
        self.committed_status = PeerStatus {
            committed_height: height,
            committed_hash: block_hash,
            committed_leader: sealed.block.header().proposer,
            view_at_commit: sealed.view,
        };

        if let Err(err) = self.enter_height(height.next_expect()).await {
            // Stay sealed, the heartbeat retries entering the next height
            self.arm(TimerKind::PeerHeartbeat);
            return Err(err);
        }
        Ok(())
    }
}
