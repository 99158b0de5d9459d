use std::sync::Arc;
use std::sync::atomic::Ordering;

use snafu::{OptionExt as _, ResultExt as _, ensure};
use tokio::sync::mpsc;
use tracing::{instrument, trace};
use vbft_consensus_core::chain_config::ChainConfigHash;
use vbft_consensus_core::height::{Height, View};
use vbft_consensus_core::msg::{ConsensusMessage, HandshakeBody, HeartbeatBody};
use vbft_consensus_core::peer::{PeerIdx, PeerPubkey};
use vbft_consensus_core::signed::Signed;

use super::{
    ChainConfigMismatchSnafu, InvalidEncodingSnafu, InvalidSignatureSnafu, LOG_TARGET,
    PeerPoolSnafu, ProcessMessageResult, SenderMismatchSnafu, SharedStatus, UnknownSenderSnafu,
    WorkerStoppedSnafu,
};
use crate::chain_store::ChainStore;
use crate::event::{Event, SystemMessage};
use crate::peer_pool::PeerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusStatus {
    pub our_idx: Option<PeerIdx>,
    /// Height being agreed on
    pub height: Height,
    pub view: View,
    /// Last block handed to the chain store
    pub committed_height: Height,
    pub active_peers: usize,
}

/// Cloneable access to a running [`super::Server`]
#[derive(Clone)]
pub struct ConsensusHandle {
    our_idx: Option<PeerIdx>,
    chain_config_hash: ChainConfigHash,
    events_tx: mpsc::Sender<Event>,
    peer_pool: Arc<PeerPool>,
    chain_store: Arc<ChainStore>,
    shared: Arc<SharedStatus>,
}

impl ConsensusHandle {
    pub(crate) fn new(
        our_idx: Option<PeerIdx>,
        chain_config_hash: ChainConfigHash,
        events_tx: mpsc::Sender<Event>,
        peer_pool: Arc<PeerPool>,
        chain_store: Arc<ChainStore>,
        shared: Arc<SharedStatus>,
    ) -> Self {
        Self {
            our_idx,
            chain_config_hash,
            events_tx,
            peer_pool,
            chain_store,
            shared,
        }
    }

    pub fn peer_pool(&self) -> &Arc<PeerPool> {
        &self.peer_pool
    }

    pub fn chain_store(&self) -> &Arc<ChainStore> {
        &self.chain_store
    }

    pub fn status(&self) -> ConsensusStatus {
        ConsensusStatus {
            our_idx: self.our_idx,
            height: Height::from(self.shared.height.load(Ordering::SeqCst)),
            view: View::from(self.shared.view.load(Ordering::SeqCst)),
            committed_height: self.chain_store.chained_block_num(),
            active_peers: self.peer_pool.get_active_peer_count(),
        }
    }

    /// Accept a raw message from a committee member
    ///
    /// Handshakes and heartbeats are applied to the peer pool right away,
    /// everything else is queued for the worker.
    #[instrument(skip_all, fields(from = %from.to_short()))]
    pub async fn handle_peer_message(&self, from: PeerPubkey, bytes: &[u8]) -> ProcessMessageResult<()> {
        let msg = ConsensusMessage::from_bytes(bytes).context(InvalidEncodingSnafu)?;
        let peer_idx = self
            .peer_pool
            .get_peer_index(from)
            .context(UnknownSenderSnafu { pubkey: from })?;

        match msg {
            ConsensusMessage::PeerHandshake(handshake) => {
                self.apply_handshake(from, peer_idx, handshake).await
            }
            ConsensusMessage::PeerHeartbeat(heartbeat) => {
                self.apply_heartbeat(from, peer_idx, heartbeat)
            }
            msg => {
                self.enqueue(Event::PeerMessage {
                    from: peer_idx,
                    msg,
                })
                .await
            }
        }
    }

    async fn apply_handshake(
        &self,
        from: PeerPubkey,
        peer_idx: PeerIdx,
        handshake: Signed<HandshakeBody>,
    ) -> ProcessMessageResult<()> {
        ensure!(
            handshake.sender == peer_idx,
            SenderMismatchSnafu {
                peer_idx,
                claimed: handshake.sender,
            }
        );
        handshake
            .verify_sig_peer_pubkey(from)
            .ok()
            .context(InvalidSignatureSnafu { peer_idx })?;
        ensure!(
            handshake.chain_config_hash == self.chain_config_hash,
            ChainConfigMismatchSnafu {
                peer_idx,
                received: handshake.chain_config_hash,
            }
        );

        let is_new = self.peer_pool.is_new_peer(peer_idx);
        self.peer_pool
            .peer_handshake(peer_idx, handshake.status)
            .context(PeerPoolSnafu)?;

        if is_new {
            // Make sure they learn about us too
            self.enqueue(Event::System(SystemMessage::PeerConnected(from)))
                .await?;
        }
        Ok(())
    }

    fn apply_heartbeat(
        &self,
        from: PeerPubkey,
        peer_idx: PeerIdx,
        heartbeat: Signed<HeartbeatBody>,
    ) -> ProcessMessageResult<()> {
        ensure!(
            heartbeat.sender == peer_idx,
            SenderMismatchSnafu {
                peer_idx,
                claimed: heartbeat.sender,
            }
        );
        heartbeat
            .verify_sig_peer_pubkey(from)
            .ok()
            .context(InvalidSignatureSnafu { peer_idx })?;

        let outcome = self
            .peer_pool
            .peer_heartbeat(peer_idx, heartbeat.status)
            .context(PeerPoolSnafu)?;
        trace!(target: LOG_TARGET, %peer_idx, ?outcome, "Heartbeat");
        Ok(())
    }

    pub async fn handle_system_message(&self, msg: SystemMessage) -> ProcessMessageResult<()> {
        self.enqueue(Event::System(msg)).await
    }

    async fn enqueue(&self, event: Event) -> ProcessMessageResult<()> {
        self.events_tx
            .send(event)
            .await
            .ok()
            .context(WorkerStoppedSnafu)
    }
}
