//! In-process transport connecting committee members running in one process
//!
//! Every message is encoded to bytes and decoded on the receiving side, so
//! the full wire path is exercised. Each member gets a delivery task,
//! preserving the order of messages between any two members.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use n0_future::task::AbortOnDropHandle;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use vbft_consensus::event::SystemMessage;
use vbft_consensus::network::Network;
use vbft_consensus::server::ConsensusHandle;
use vbft_consensus_core::msg::ConsensusMessage;
use vbft_consensus_core::peer::PeerPubkey;
use vbft_util_error::fmt::FmtCompact as _;

const LOG_TARGET: &str = "vbft::node::local-net";

enum Delivery {
    Message { from: PeerPubkey, bytes: Arc<[u8]> },
    System(SystemMessage),
}

struct Member {
    tx: mpsc::UnboundedSender<Delivery>,
    _task: AbortOnDropHandle<()>,
}

#[derive(Default)]
struct Inner {
    members: BTreeMap<PeerPubkey, Member>,
    /// Members whose traffic (both ways) is dropped
    silenced: BTreeSet<PeerPubkey>,
}

/// Hub all local members register with
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Mutex<Inner>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// [`Network`] implementation sending as `pubkey`
    pub fn endpoint(&self, pubkey: PeerPubkey) -> LocalEndpoint {
        LocalEndpoint {
            network: self.clone(),
            our_pubkey: pubkey,
        }
    }

    /// Start delivering messages for `pubkey` to `handle`
    ///
    /// Both the new member and everyone already connected get notified
    /// about the new connections.
    pub fn connect(&self, pubkey: PeerPubkey, handle: ConsensusHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = AbortOnDropHandle::new(tokio::spawn(Self::run_delivery(pubkey, handle, rx)));

        let mut inner = self.inner.lock().expect("Locking failed");
        for (other, member) in &inner.members {
            let _ = member
                .tx
                .send(Delivery::System(SystemMessage::PeerConnected(pubkey)));
            let _ = tx.send(Delivery::System(SystemMessage::PeerConnected(*other)));
        }
        debug!(target: LOG_TARGET, pubkey = %pubkey.to_short(), "Member connected");
        inner
            .members
            .insert(pubkey, Member { tx, _task: task });
    }

    /// Remove `pubkey`, stopping its delivery task
    pub fn disconnect(&self, pubkey: PeerPubkey) {
        let mut inner = self.inner.lock().expect("Locking failed");
        if inner.members.remove(&pubkey).is_none() {
            return;
        }
        for member in inner.members.values() {
            let _ = member
                .tx
                .send(Delivery::System(SystemMessage::PeerDisconnected(pubkey)));
        }
        debug!(target: LOG_TARGET, pubkey = %pubkey.to_short(), "Member disconnected");
    }

    /// Drop all traffic from and to `pubkey` while `silenced` is set
    pub fn set_silenced(&self, pubkey: PeerPubkey, silenced: bool) {
        let mut inner = self.inner.lock().expect("Locking failed");
        if silenced {
            inner.silenced.insert(pubkey);
        } else {
            inner.silenced.remove(&pubkey);
        }
    }

    pub fn num_members(&self) -> usize {
        self.inner.lock().expect("Locking failed").members.len()
    }

    fn deliver(&self, from: PeerPubkey, to: PeerPubkey, bytes: Arc<[u8]>) {
        let inner = self.inner.lock().expect("Locking failed");
        if inner.silenced.contains(&from) || inner.silenced.contains(&to) {
            trace!(target: LOG_TARGET, from = %from.to_short(), to = %to.to_short(), "Dropping silenced traffic");
            return;
        }
        let Some(member) = inner.members.get(&to) else {
            trace!(target: LOG_TARGET, to = %to.to_short(), "Destination not connected");
            return;
        };
        let _ = member.tx.send(Delivery::Message { from, bytes });
    }

    fn broadcast(&self, from: PeerPubkey, bytes: Arc<[u8]>) {
        let destinations: Vec<_> = self
            .inner
            .lock()
            .expect("Locking failed")
            .members
            .keys()
            .copied()
            .filter(|to| *to != from)
            .collect();
        for to in destinations {
            self.deliver(from, to, bytes.clone());
        }
    }

    async fn run_delivery(
        pubkey: PeerPubkey,
        handle: ConsensusHandle,
        mut rx: mpsc::UnboundedReceiver<Delivery>,
    ) {
        while let Some(delivery) = rx.recv().await {
            let res = match delivery {
                Delivery::Message { from, bytes } => handle.handle_peer_message(from, &bytes).await,
                Delivery::System(msg) => handle.handle_system_message(msg).await,
            };
            if let Err(err) = res {
                debug!(
                    target: LOG_TARGET,
                    to = %pubkey.to_short(),
                    err = %err.fmt_compact(),
                    "Message rejected"
                );
            }
        }
    }
}

/// One member's view of the [`LocalNetwork`]
pub struct LocalEndpoint {
    network: LocalNetwork,
    our_pubkey: PeerPubkey,
}

impl Network for LocalEndpoint {
    fn send(&self, to: PeerPubkey, msg: ConsensusMessage) {
        self.network
            .deliver(self.our_pubkey, to, msg.to_bytes().into());
    }

    fn broadcast(&self, msg: ConsensusMessage) {
        self.network
            .broadcast(self.our_pubkey, msg.to_bytes().into());
    }
}

#[cfg(test)]
mod tests;
