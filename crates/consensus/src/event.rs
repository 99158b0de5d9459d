use vbft_consensus_core::msg::ConsensusMessage;
use vbft_consensus_core::peer::{PeerIdx, PeerPubkey};

use crate::event_timer::TimerEvent;

/// Everything the consensus worker reacts to, in arrival order
#[derive(Debug, Clone)]
pub enum Event {
    /// An already decoded (and for some kinds already verified) message
    PeerMessage {
        from: PeerIdx,
        msg: ConsensusMessage,
    },
    System(SystemMessage),
    Timer(TimerEvent),
}

/// Notifications from the network layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMessage {
    PeerConnected(PeerPubkey),
    PeerDisconnected(PeerPubkey),
}
