//! What the consensus needs from the outside world

use vbft_consensus_core::block::TransactionRaw;
use vbft_consensus_core::msg::ConsensusMessage;
use vbft_consensus_core::peer::PeerPubkey;

/// Outbound message delivery
///
/// Both calls are fire-and-forget: delivery is best effort and must not
/// block the caller. Inbound messages are handed to
/// [`crate::server::ConsensusHandle::handle_peer_message`].
pub trait Network: Send + Sync + 'static {
    fn send(&self, to: PeerPubkey, msg: ConsensusMessage);

    /// Send to every committee member except us
    fn broadcast(&self, msg: ConsensusMessage);
}

/// Source of transactions for the blocks we propose
pub trait TxPool: Send + Sync + 'static {
    fn get_pending_txs(&self, max: usize) -> Vec<TransactionRaw>;
}
