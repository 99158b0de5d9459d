use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use snafu::{OptionExt as _, ResultExt as _};
use tracing::{debug, info};
use vbft_consensus_core::block::{Block, BlockHash, BlockHeader, CrossChainMsg};
use vbft_consensus_core::chain_config::ChainConfig;
use vbft_consensus_core::exec::StateRoot;
use vbft_consensus_core::height::{Height, View};
use vbft_consensus_core::msg::{LockedBlock, PeerStatus, ProposalBody};
use vbft_consensus_core::peer::PeerIdx;
use vbft_consensus_core::signed::Signed;
use vbft_consensus_core::vrf::{Participants, VrfValue};

use super::{ChainStoreSnafu, ConsensusResult, LOG_TARGET, MissingBlockSnafu, Server};
use crate::block_pool::BlockPool;
use crate::event_timer::TimerKind;
use crate::vote_set::VoteTally;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Phase {
    Idle,
    Proposed,
    Endorsed,
    Committed,
    Sealed,
    ViewChanging,
}

/// Everything the worker knows about the height being agreed on
#[derive(Debug)]
pub(crate) struct RoundState {
    pub(crate) height: Height,
    pub(crate) view: View,
    pub(crate) phase: Phase,
    pub(crate) participants: Participants,
    /// VRF value of the previous block
    pub(crate) seed: VrfValue,
    pub(crate) prev_header: BlockHeader,
    pub(crate) prev_hash: BlockHash,
    pub(crate) prev_exec_merkle_root: StateRoot,
    pub(crate) expected_cross_msg: Option<CrossChainMsg>,

    // Per view
    pub(crate) proposal: Option<Signed<ProposalBody>>,
    pub(crate) endorsements: VoteTally,
    pub(crate) commits: VoteTally,
    pub(crate) endorsed: bool,
    pub(crate) committed: bool,
    pub(crate) view_change_target: Option<View>,

    // Per height
    /// Highest view each peer asked to move to
    pub(crate) change_views: BTreeMap<PeerIdx, View>,
    /// Block we sent a commit for
    pub(crate) locked: Option<LockedBlock>,
    /// Highest-view lock we know of, ours or reported in view changes
    pub(crate) highest_locked: Option<LockedBlock>,
}

impl RoundState {
    fn new(
        height: Height,
        prev_header: BlockHeader,
        prev_exec_merkle_root: StateRoot,
        expected_cross_msg: Option<CrossChainMsg>,
        participants: Participants,
    ) -> Self {
        Self {
            height,
            view: View::ZERO,
            phase: Phase::Idle,
            participants,
            seed: prev_header.vrf_value,
            prev_hash: prev_header.hash(),
            prev_header,
            prev_exec_merkle_root,
            expected_cross_msg,
            proposal: None,
            endorsements: VoteTally::default(),
            commits: VoteTally::default(),
            endorsed: false,
            committed: false,
            view_change_target: None,
            change_views: BTreeMap::new(),
            locked: None,
            highest_locked: None,
        }
    }

    fn reset_view(&mut self, view: View) {
        self.view = view;
        self.phase = Phase::Idle;
        self.proposal = None;
        self.endorsements = VoteTally::default();
        self.commits = VoteTally::default();
        self.endorsed = false;
        self.committed = false;
        self.view_change_target = None;
        self.change_views.retain(|_, new_view| view < *new_view);
    }

    /// Full block with a given hash, if we have it
    pub(crate) fn block_for(&self, hash: BlockHash) -> Option<&Block> {
        self.proposal
            .as_ref()
            .map(|p| &p.block)
            .into_iter()
            .chain(self.locked.as_ref().map(|l| &l.block))
            .chain(self.highest_locked.as_ref().map(|l| &l.block))
            .find(|block| block.hash() == hash)
    }

    pub(crate) fn note_locked(&mut self, locked: LockedBlock) {
        if self
            .highest_locked
            .as_ref()
            .is_none_or(|highest| highest.view < locked.view)
        {
            self.highest_locked = Some(locked);
        }
    }

    /// Whether our lock allows voting for `hash`
    ///
    /// A lock is released only by a block locked by someone in a later view.
    pub(crate) fn may_vote_for(&self, hash: BlockHash) -> bool {
        let Some(locked) = self.locked.as_ref() else {
            return true;
        };
        if locked.block.hash() == hash {
            return true;
        }
        self.highest_locked
            .as_ref()
            .is_some_and(|highest| locked.view < highest.view && highest.block.hash() == hash)
    }

    pub(crate) fn record_change_view(&mut self, peer_idx: PeerIdx, new_view: View) {
        let entry = self.change_views.entry(peer_idx).or_insert(new_view);
        *entry = (*entry).max(new_view);
    }
}

impl Server {
    pub(crate) async fn load_round(
        block_pool: &BlockPool,
        chain_config: &ChainConfig,
        height: Height,
    ) -> ConsensusResult<RoundState> {
        let prev_height = height.prev().context(MissingBlockSnafu { height })?;

        let prev = block_pool
            .get_block(prev_height)
            .await
            .context(ChainStoreSnafu)?
            .context(MissingBlockSnafu {
                height: prev_height,
            })?;
        let prev_exec_merkle_root = block_pool
            .get_exec_merkle_root(prev_height)
            .await
            .context(ChainStoreSnafu)?
            .context(MissingBlockSnafu {
                height: prev_height,
            })?;
        let prev_cross_states_root = block_pool
            .get_cross_states_root(prev_height)
            .await
            .context(ChainStoreSnafu)?
            .unwrap_or_default();

        let prev_header = prev.chain_block.header;
        let participants = Participants::select(
            prev_header.vrf_value,
            chain_config.num_peers(),
            chain_config.num_voters(),
        );

        Ok(RoundState::new(
            height,
            prev_header,
            prev_exec_merkle_root,
            CrossChainMsg::expected(height, prev_cross_states_root),
            participants,
        ))
    }

    pub(crate) async fn load_committed_status(block_pool: &BlockPool) -> ConsensusResult<PeerStatus> {
        let height = block_pool.chain_store().chained_block_num();
        let block = block_pool
            .get_block(height)
            .await
            .context(ChainStoreSnafu)?
            .context(MissingBlockSnafu { height })?;

        Ok(PeerStatus {
            committed_height: height,
            committed_hash: block.hash(),
            committed_leader: block.header().proposer,
            view_at_commit: block.header().view,
        })
    }

    pub(crate) async fn enter_height(&mut self, height: Height) -> ConsensusResult<()> {
        self.round = Self::load_round(&self.block_pool, &self.chain_config, height).await?;
        self.begin_height();
        Ok(())
    }

    pub(crate) fn begin_height(&mut self) {
        let height = self.round.height;
        self.timer.set_current_round(height);
        self.shared
            .height
            .store(height.to_number(), Ordering::SeqCst);

        debug!(
            target: LOG_TARGET,
            %height,
            seed = %self.round.seed.to_short(),
            voters = self.round.participants.voters().len(),
            "Entering height"
        );
        self.enter_view(View::ZERO);

        self.replay.extend(self.future_msgs.drain(..));
    }

    /// Start view `view` of the current height from scratch
    ///
    /// Drops everything tied to the previous view, except for locks.
    pub(crate) fn enter_view(&mut self, view: View) {
        let height = self.round.height;
        self.timer.cancel_round(height);
        self.round.reset_view(view);
        self.shared.view.store(view.to_number(), Ordering::SeqCst);

        self.arm(TimerKind::PeerHeartbeat);
        self.arm(TimerKind::ProposeBlock);

        let leader = self.round.participants.leader(view);
        let is_leader = Some(leader) == self.our_idx;
        if is_leader {
            let delay = if view == View::ZERO {
                self.config.block_interval
            } else {
                Duration::ZERO
            };
            self.timer.start_timer(height, delay);
        }

        if view == View::ZERO {
            debug!(target: LOG_TARGET, %height, %leader, is_leader, "Entered view");
        } else {
            info!(target: LOG_TARGET, %height, %view, %leader, is_leader, "Entered view");
        }
    }
}
