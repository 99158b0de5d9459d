//! The consensus worker
//!
//! A [`Server`] owns all the state of the height being agreed on and is
//! driven by a single task consuming [`Event`]s from a bounded queue:
//! messages from peers, network notifications and expired timers. Nothing
//! else ever touches the round state, so no locking is needed around it.
//!
//! [`ConsensusHandle`] is the cloneable outside view of a running server:
//! the network layer hands it inbound messages and the node queries its
//! status.

mod finish_height;
mod handle;
mod handle_proposal;
mod handle_sync;
mod handle_view_change;
mod handle_vote;
mod propose;
mod round;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64};

pub use handle::{ConsensusHandle, ConsensusStatus};
pub use handle_proposal::InvalidBlockError;
pub use round::Phase;
use round::RoundState;
use snafu::{Location, OptionExt as _, ResultExt as _, Snafu};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, trace, warn};
use vbft_consensus_core::block::BlockHash;
use vbft_consensus_core::chain_config::{ChainConfig, ChainConfigHash};
use vbft_consensus_core::height::{Height, View};
use vbft_consensus_core::msg::{ConsensusMessage, MsgDecodeError, PeerStatus, SealedBlock};
use vbft_consensus_core::peer::{PeerIdx, PeerPubkey, PeerSeckey};
use vbft_consensus_core::signed::InvalidNotarizationError;
use vbft_ledger::Ledger;
use vbft_util_error::fmt::FmtCompact as _;
use vbft_util_fmt_opt::AsFmtOption as _;

use crate::block_pool::BlockPool;
use crate::chain_store::{ChainEvent, ChainStore, ChainStoreError};
use crate::config::ConsensusConfig;
use crate::event::{Event, SystemMessage};
use crate::event_timer::{EventTimer, TimerEvent, TimerKind};
use crate::network::{Network, TxPool};
use crate::peer_pool::{PeerConfig, PeerPool, PeerPoolError};

const LOG_TARGET: &str = "vbft::consensus";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConsensusError {
    /// The chain store refused a block it must have accepted
    #[snafu(display("Chain store invariant violated"))]
    Fatal { source: ChainStoreError },
    #[snafu(display("Chain store failure"))]
    ChainStore {
        source: ChainStoreError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Missing chain data at {height}"))]
    MissingBlock { height: Height },
}

impl ConsensusError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsensusError::Fatal { .. })
    }
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Reasons for dropping a peer message
///
/// Apart from [`ProcessMessageError::Consensus`], none of these affect the
/// worker: the message is logged and ignored.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProcessMessageError {
    #[snafu(transparent)]
    Consensus { source: ConsensusError },
    InvalidEncoding { source: MsgDecodeError },
    #[snafu(display("Message from outside of the committee: {pubkey}"))]
    UnknownSender { pubkey: PeerPubkey },
    #[snafu(display("Unknown peer {peer_idx}"))]
    UnknownPeer { peer_idx: PeerIdx },
    #[snafu(display("Peer {peer_idx} sent a message of {claimed}"))]
    SenderMismatch { peer_idx: PeerIdx, claimed: PeerIdx },
    #[snafu(display("Invalid signature from {peer_idx}"))]
    InvalidSignature { peer_idx: PeerIdx },
    #[snafu(display("Peer {peer_idx} runs a different chain: {received}"))]
    ChainConfigMismatch {
        peer_idx: PeerIdx,
        received: ChainConfigHash,
    },
    #[snafu(display("Wrong height - expected: {expected}, received: {received}"))]
    WrongHeight { expected: Height, received: Height },
    #[snafu(display("Wrong view - expected: {expected}, received: {received}"))]
    WrongView { expected: View, received: View },
    #[snafu(display("Peer {peer_idx} is not the leader of view {view}"))]
    NotLeader { peer_idx: PeerIdx, view: View },
    #[snafu(display("Peer {peer_idx} is not a voter"))]
    NotVoter { peer_idx: PeerIdx },
    #[snafu(display("Peer {peer_idx} proposed {received}, after proposing {existing}"))]
    Equivocation {
        peer_idx: PeerIdx,
        existing: BlockHash,
        received: BlockHash,
    },
    #[snafu(display("Peer {peer_idx} voted for {received}, after voting for {existing}"))]
    ConflictingVote {
        peer_idx: PeerIdx,
        existing: BlockHash,
        received: BlockHash,
    },
    InvalidBlock { source: InvalidBlockError },
    InvalidNotarization { source: InvalidNotarizationError },
    PeerPool { source: PeerPoolError },
    WorkerStopped,
}

impl ProcessMessageError {
    /// Provable misbehavior of the sender, as opposed to a stale or
    /// otherwise useless message
    pub fn is_misbehavior(&self) -> bool {
        matches!(
            self,
            ProcessMessageError::Equivocation { .. }
                | ProcessMessageError::ConflictingVote { .. }
                | ProcessMessageError::InvalidSignature { .. }
        )
    }
}

pub type ProcessMessageResult<T> = Result<T, ProcessMessageError>;

/// Parts of the worker state readable from a [`ConsensusHandle`]
#[derive(Debug, Default)]
pub(crate) struct SharedStatus {
    height: AtomicU64,
    view: AtomicU32,
}

pub struct Server {
    seckey: PeerSeckey,
    /// Our position in the committee, `None` when only following the chain
    our_idx: Option<PeerIdx>,
    chain_config: ChainConfig,
    config: ConsensusConfig,
    block_pool: BlockPool,
    peer_pool: Arc<PeerPool>,
    network: Arc<dyn Network>,
    tx_pool: Arc<dyn TxPool>,
    timer: EventTimer,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    shared: Arc<SharedStatus>,
    round: RoundState,
    /// What we advertise in handshakes and heartbeats
    committed_status: PeerStatus,
    /// Messages for the next height, replayed once we get there
    future_msgs: VecDeque<(PeerIdx, ConsensusMessage)>,
    /// Messages to process before taking more from the queue
    replay: VecDeque<(PeerIdx, ConsensusMessage)>,
    /// Sealed block the chain store failed to take, retried on heartbeat
    pending_seal: Option<SealedBlock>,
}

#[bon::bon]
impl Server {
    #[builder]
    pub async fn new(
        ledger: Arc<dyn Ledger>,
        network: Arc<dyn Network>,
        tx_pool: Arc<dyn TxPool>,
        seckey: PeerSeckey,
        chain_config: ChainConfig,
        #[builder(default)] config: ConsensusConfig,
        notify: Option<broadcast::Sender<ChainEvent>>,
    ) -> ConsensusResult<Self> {
        let chain_store = Arc::new(
            ChainStore::open(ledger, notify)
                .await
                .context(ChainStoreSnafu)?,
        );
        let block_pool = BlockPool::new(chain_store.clone(), config.block_pool_capacity);

        let our_idx = chain_config.find_peer_idx(seckey.pubkey());
        let peer_pool = Arc::new(PeerPool::new(chain_config.num_peers().total()));
        for (idx, pubkey) in chain_config.iter_peers() {
            if Some(idx) == our_idx {
                continue;
            }
            peer_pool
                .add_peer(PeerConfig {
                    idx,
                    pubkey,
                    address: None,
                })
                .expect("Committee members are distinct and fit the pool");
        }

        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);
        let timer = EventTimer::new(
            config.timer_delays(),
            config.max_view_backoff_exp,
            events_tx.clone(),
        );

        let height = chain_store.chained_block_num().next_expect();
        let round = Self::load_round(&block_pool, &chain_config, height).await?;
        let committed_status = Self::load_committed_status(&block_pool).await?;

        info!(
            target: LOG_TARGET,
            our_idx = %our_idx.fmt_option(),
            %height,
            num_peers = %chain_config.num_peers(),
            "Consensus server initialized"
        );

        Ok(Self {
            seckey,
            our_idx,
            chain_config,
            config,
            block_pool,
            peer_pool,
            network,
            tx_pool,
            timer,
            events_tx,
            events_rx,
            shared: Arc::new(SharedStatus::default()),
            round,
            committed_status,
            future_msgs: VecDeque::new(),
            replay: VecDeque::new(),
            pending_seal: None,
        })
    }
}

impl Server {
    pub fn our_idx(&self) -> Option<PeerIdx> {
        self.our_idx
    }

    pub fn handle(&self) -> ConsensusHandle {
        ConsensusHandle::new(
            self.our_idx,
            self.chain_config.hash(),
            self.events_tx.clone(),
            self.peer_pool.clone(),
            self.block_pool.chain_store().clone(),
            self.shared.clone(),
        )
    }

    /// Run the worker until a fatal error
    #[instrument(name = "consensus", skip_all, fields(our_idx = %self.our_idx.fmt_option()))]
    pub async fn run(mut self) -> ConsensusResult<()> {
        self.start();

        loop {
            let event = match self.replay.pop_front() {
                Some((from, msg)) => Event::PeerMessage { from, msg },
                None => {
                    let Some(event) = self.events_rx.recv().await else {
                        debug!(target: LOG_TARGET, "Event queue closed");
                        return Ok(());
                    };
                    event
                }
            };

            if let Err(err) = self.handle_event(event).await {
                if err.is_fatal() {
                    warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Consensus worker stopped");
                    return Err(err);
                }
                warn!(
                    target: LOG_TARGET,
                    height = %self.round.height,
                    err = %err.fmt_compact(),
                    "Consensus step failed, will retry"
                );
            }
        }
    }

    /// Arm timers of the height loaded in [`Server::new`]
    pub(crate) fn start(&mut self) {
        self.begin_height();
    }

    pub(crate) async fn handle_event(&mut self, event: Event) -> ConsensusResult<()> {
        match event {
            Event::PeerMessage { from, msg } => {
                if let Err(err) = self.handle_peer_msg(from, msg).await {
                    self.handle_process_error(from, err)?;
                }
            }
            Event::System(msg) => self.handle_system_msg(msg),
            Event::Timer(event) => self.handle_timer(event).await?,
        }
        Ok(())
    }

    /// Log a dropped message, passing through errors of the worker itself
    fn handle_process_error(&self, from: PeerIdx, err: ProcessMessageError) -> ConsensusResult<()> {
        match err {
            ProcessMessageError::Consensus { source } => return Err(source),
            err if err.is_misbehavior() => {
                warn!(target: LOG_TARGET, %from, err = %err.fmt_compact(), "Peer misbehavior");
            }
            err => {
                debug!(target: LOG_TARGET, %from, err = %err.fmt_compact(), "Dropped peer message");
            }
        }
        Ok(())
    }

    async fn handle_peer_msg(
        &mut self,
        from: PeerIdx,
        msg: ConsensusMessage,
    ) -> ProcessMessageResult<()> {
        match msg {
            ConsensusMessage::BlockFetch(req) => self.handle_block_fetch(from, req),
            ConsensusMessage::BlockFetchResponse(sealed) => {
                self.handle_block_fetch_response(from, sealed).await
            }
            // Applied to the peer pool by the handle already
            ConsensusMessage::PeerHandshake(_) | ConsensusMessage::PeerHeartbeat(_) => Ok(()),
            msg => self.handle_round_msg(from, msg).await,
        }
    }

    async fn handle_round_msg(
        &mut self,
        from: PeerIdx,
        msg: ConsensusMessage,
    ) -> ProcessMessageResult<()> {
        let Some(height) = msg.height() else {
            return Ok(());
        };
        let current = self.round.height;

        if height < current {
            trace!(target: LOG_TARGET, %from, %height, kind = ?msg.kind(), "Stale message");
            return Ok(());
        }

        if current < height {
            if let ConsensusMessage::BlockSignatures(_) = msg {
                // Someone sealed a block we don't have yet
                self.request_block(from, current)?;
            } else if height == current.next_expect() {
                self.buffer_future_msg(from, msg);
            }
            return Ok(());
        }

        if self.round.phase == Phase::Sealed {
            return Ok(());
        }

        match msg {
            ConsensusMessage::BlockProposal(proposal) => self.handle_proposal(from, proposal).await,
            ConsensusMessage::BlockEndorsement(vote) => self.handle_endorsement(from, vote).await,
            ConsensusMessage::BlockCommit(vote) => self.handle_commit(from, vote).await,
            ConsensusMessage::BlockSignatures(sigs) => {
                self.handle_block_signatures(from, sigs).await
            }
            ConsensusMessage::ChangeView(change_view) => {
                self.handle_change_view(from, change_view)
            }
            _ => Ok(()),
        }
    }

    fn buffer_future_msg(&mut self, from: PeerIdx, msg: ConsensusMessage) {
        if self.config.future_buffer_limit <= self.future_msgs.len() {
            trace!(target: LOG_TARGET, %from, "Future message buffer full");
            return;
        }
        self.future_msgs.push_back((from, msg));
    }

    async fn handle_timer(&mut self, event: TimerEvent) -> ConsensusResult<()> {
        if !self.timer.accept(&event) || event.round != self.round.height {
            trace!(target: LOG_TARGET, kind = %event.kind, round = %event.round, "Ignoring stale timer");
            return Ok(());
        }

        match event.kind {
            TimerKind::Round => self.propose().await,
            TimerKind::ProposeBlock | TimerKind::EndorseBlock | TimerKind::CommitBlock => {
                self.on_round_timeout(event)
            }
            TimerKind::ChangeView => self.on_change_view_timeout(event),
            TimerKind::PeerHeartbeat => self.on_heartbeat_tick().await,
        }
    }

    fn handle_system_msg(&mut self, msg: SystemMessage) {
        match msg {
            SystemMessage::PeerConnected(pubkey) => {
                if self.chain_config.find_peer_idx(pubkey).is_none() {
                    debug!(target: LOG_TARGET, pubkey = %pubkey.to_short(), "Ignoring connection of unknown peer");
                    return;
                }
                self.send_handshake(pubkey);
            }
            SystemMessage::PeerDisconnected(pubkey) => {
                if let Some(idx) = self.peer_pool.get_peer_index(pubkey) {
                    self.peer_pool.peer_disconnected(idx);
                }
            }
        }
    }

    /// Arm a timer of `kind` for the current height and view
    fn arm(&mut self, kind: TimerKind) {
        self.arm_view(kind, self.round.view);
    }

    /// Arm a timer of `kind` for the current height
    ///
    /// A kind without a configured delay is logged and the round goes on
    /// without that timeout.
    fn arm_view(&mut self, kind: TimerKind, view: View) {
        if let Err(err) = self.timer.start_event_timer(kind, self.round.height, view) {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Could not arm timer");
        }
    }

    fn peer_pubkey(&self, peer_idx: PeerIdx) -> ProcessMessageResult<PeerPubkey> {
        self.chain_config
            .get_peer(peer_idx)
            .context(UnknownPeerSnafu { peer_idx })
    }

    fn our_voter_idx(&self) -> Option<PeerIdx> {
        self.our_idx
            .filter(|our_idx| self.round.participants.is_voter(*our_idx))
    }
}
