use snafu::{OptionExt as _, ResultExt as _, ensure};
use tracing::{debug, info, trace};
use vbft_consensus_core::height::View;
use vbft_consensus_core::msg::{ChangeViewBody, ConsensusMessage};
use vbft_consensus_core::peer::PeerIdx;
use vbft_consensus_core::signed::Signed;

use super::{
    ConsensusResult, InvalidBlockSnafu, InvalidSignatureSnafu, LOG_TARGET, Phase,
    ProcessMessageResult, SenderMismatchSnafu, Server, WrongHeightSnafu,
};
use crate::event_timer::{TimerEvent, TimerKind};

impl Server {
    /// Propose, endorse or commit step took too long
    pub(crate) fn on_round_timeout(&mut self, event: TimerEvent) -> ConsensusResult<()> {
        if event.view != self.round.view
            || matches!(self.round.phase, Phase::Sealed | Phase::ViewChanging)
        {
            return Ok(());
        }

        info!(
            target: LOG_TARGET,
            height = %self.round.height,
            view = %self.round.view,
            kind = %event.kind,
            phase = %self.round.phase,
            "Round timed out"
        );
        self.request_view_change(self.round.view.next_expect())
    }

    /// The view change we asked for did not happen in time
    pub(crate) fn on_change_view_timeout(&mut self, event: TimerEvent) -> ConsensusResult<()> {
        if self.round.phase != Phase::ViewChanging {
            return Ok(());
        }
        let target = self
            .round
            .view_change_target
            .unwrap_or(self.round.view)
            .max(event.view);

        info!(
            target: LOG_TARGET,
            height = %self.round.height,
            view = %self.round.view,
            %target,
            "View change stalled"
        );
        self.request_view_change(target.next_expect())
    }

    /// Ask everyone to move to `new_view`
    pub(crate) fn request_view_change(&mut self, new_view: View) -> ConsensusResult<()> {
        if self
            .round
            .view_change_target
            .is_some_and(|target| new_view <= target)
        {
            return Ok(());
        }

        let height = self.round.height;
        self.round.view_change_target = Some(new_view);
        self.round.phase = Phase::ViewChanging;

        self.timer.cancel_timer(height);
        for kind in [
            TimerKind::ProposeBlock,
            TimerKind::EndorseBlock,
            TimerKind::CommitBlock,
        ] {
            self.timer.cancel_event_timer(kind, height);
        }
        self.arm_view(TimerKind::ChangeView, new_view);

        if let Some(our_idx) = self.our_idx {
            debug!(target: LOG_TARGET, %height, %new_view, "Requesting view change");
            let change_view = Signed::new_sign(
                ChangeViewBody {
                    height,
                    view: self.round.view,
                    new_view,
                    sender: our_idx,
                    locked: self.round.locked.clone(),
                },
                self.seckey,
            );
            self.round.record_change_view(our_idx, new_view);
            self.network
                .broadcast(ConsensusMessage::ChangeView(change_view));
        }

        self.check_view_change()
    }

    pub(crate) fn handle_change_view(
        &mut self,
        from: PeerIdx,
        msg: Signed<ChangeViewBody>,
    ) -> ProcessMessageResult<()> {
        ensure!(
            msg.sender == from,
            SenderMismatchSnafu {
                peer_idx: from,
                claimed: msg.sender,
            }
        );
        msg.verify_sig_peer_pubkey(self.peer_pubkey(from)?)
            .ok()
            .context(InvalidSignatureSnafu { peer_idx: from })?;

        if msg.new_view <= self.round.view {
            trace!(target: LOG_TARGET, %from, new_view = %msg.new_view, "Stale view change");
            return Ok(());
        }

        let body = msg.inner;
        if let Some(locked) = body.locked {
            ensure!(
                locked.block.height() == self.round.height,
                WrongHeightSnafu {
                    expected: self.round.height,
                    received: locked.block.height(),
                }
            );
            self.validate_block(&locked.block, locked.view)
                .context(InvalidBlockSnafu)?;
            self.verify_voter_quorum(&locked.endorse_vote(), &locked.sigs)?;
            self.round.note_locked(locked);
        }

        self.round.record_change_view(from, body.new_view);
        self.check_view_change()?;
        Ok(())
    }

    /// Move to a higher view if enough peers asked for it
    fn check_view_change(&mut self) -> ConsensusResult<()> {
        let view = self.round.view;
        let num_peers = self.chain_config.num_peers();

        let mut requested: Vec<View> = self
            .round
            .change_views
            .values()
            .copied()
            .filter(|new_view| view < *new_view)
            .collect();
        requested.sort_unstable_by(|a, b| b.cmp(a));

        // Highest view a quorum is ready to move to
        if let Some(new_view) = requested.get(num_peers.threshold().saturating_sub(1)) {
            self.enter_view(*new_view);
            return Ok(());
        }

        // At least one correct peer timed out, so join the lowest view asked for
        if num_peers.max_faulty() < requested.len() {
            let lowest = *requested.last().expect("Not empty");
            if self
                .round
                .view_change_target
                .is_none_or(|target| target < lowest)
            {
                debug!(target: LOG_TARGET, height = %self.round.height, %lowest, "Joining view change");
                return self.request_view_change(lowest);
            }
        }

        Ok(())
    }
}
