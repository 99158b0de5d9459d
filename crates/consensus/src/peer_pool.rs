//! Committee membership and liveness
//!
//! Handshakes and heartbeats are applied here by the network delivery
//! path, after their signatures were checked. The consensus worker only
//! reads it, to find out who is connected and who is ahead of us.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use snafu::{OptionExt as _, Snafu};
use tracing::{debug, trace};
use vbft_consensus_core::height::Height;
use vbft_consensus_core::msg::PeerStatus;
use vbft_consensus_core::peer::{PeerIdx, PeerPubkey};
use vbft_consensus_core::timestamp::Timestamp;

const LOG_TARGET: &str = "vbft::consensus::peer-pool";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub idx: PeerIdx,
    pub pubkey: PeerPubkey,
    pub address: Option<String>,
}

/// Snapshot of what we know about a committee member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub idx: PeerIdx,
    pub pubkey: PeerPubkey,
    pub address: Option<String>,
    pub last_update: Option<Timestamp>,
    pub connected: bool,
    pub status: PeerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// Reported height was lower than already known, status kept
    Stale,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum PeerPoolError {
    #[snafu(display("Committee is full ({max_size} peers)"))]
    CommitteeFull { max_size: usize },
    #[snafu(display("Peer {pubkey} already registered as {existing}"))]
    IndexConflict {
        pubkey: PeerPubkey,
        existing: PeerIdx,
    },
    UnknownPeer { idx: PeerIdx },
    NotConnected { idx: PeerIdx },
}

pub type PeerPoolResult<T> = Result<T, PeerPoolError>;

#[derive(Debug)]
struct PeerState {
    last_update: Option<Timestamp>,
    connected: bool,
    status: PeerStatus,
}

#[derive(Debug)]
struct PeerPoolInner {
    max_size: usize,
    configs: BTreeMap<PeerIdx, PeerConfig>,
    peers: BTreeMap<PeerIdx, PeerState>,
    id_map: HashMap<PeerPubkey, PeerIdx>,
}

impl PeerPoolInner {
    fn peer(&self, idx: PeerIdx) -> Option<Peer> {
        let config = self.configs.get(&idx)?;
        let state = self.peers.get(&idx)?;
        Some(Peer {
            idx,
            pubkey: config.pubkey,
            address: config.address.clone(),
            last_update: state.last_update,
            connected: state.connected,
            status: state.status,
        })
    }

    fn connected(&self) -> impl Iterator<Item = (PeerIdx, &PeerState)> {
        self.peers
            .iter()
            .filter(|(_, state)| state.connected)
            .map(|(idx, state)| (*idx, state))
    }
}

#[derive(Debug)]
pub struct PeerPool {
    inner: RwLock<PeerPoolInner>,
}

impl PeerPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(PeerPoolInner {
                max_size,
                configs: BTreeMap::new(),
                peers: BTreeMap::new(),
                id_map: HashMap::new(),
            }),
        }
    }

    /// Register a committee member
    ///
    /// Returns `true` if the peer was not known before, `false` if this only
    /// updated its address.
    pub fn add_peer(&self, config: PeerConfig) -> PeerPoolResult<bool> {
        let mut inner = self.inner.write().expect("Locking failed");

        if let Some(existing) = inner.id_map.get(&config.pubkey).copied() {
            if existing != config.idx {
                return IndexConflictSnafu {
                    pubkey: config.pubkey,
                    existing,
                }
                .fail();
            }
            inner.configs.insert(config.idx, config);
            return Ok(false);
        }

        if let Some(existing) = inner.configs.get(&config.idx) {
            return IndexConflictSnafu {
                pubkey: existing.pubkey,
                existing: config.idx,
            }
            .fail();
        }

        if inner.max_size <= inner.configs.len() {
            return CommitteeFullSnafu {
                max_size: inner.max_size,
            }
            .fail();
        }

        debug!(target: LOG_TARGET, idx = %config.idx, pubkey = %config.pubkey.to_short(), "Adding peer");
        inner.id_map.insert(config.pubkey, config.idx);
        inner.peers.insert(
            config.idx,
            PeerState {
                last_update: None,
                connected: false,
                status: PeerStatus::default(),
            },
        );
        inner.configs.insert(config.idx, config);
        Ok(true)
    }

    /// Would a handshake from `idx` bring in a new live participant
    pub fn is_new_peer(&self, idx: PeerIdx) -> bool {
        let inner = self.inner.read().expect("Locking failed");
        inner.peers.get(&idx).is_some_and(|state| !state.connected)
    }

    pub fn peer_handshake(&self, idx: PeerIdx, status: PeerStatus) -> PeerPoolResult<UpdateOutcome> {
        let mut inner = self.inner.write().expect("Locking failed");
        let state = inner.peers.get_mut(&idx).context(UnknownPeerSnafu { idx })?;

        if !state.connected {
            debug!(target: LOG_TARGET, %idx, height = %status.committed_height, "Peer connected");
        }
        state.connected = true;
        state.last_update = Some(Timestamp::now());

        Ok(Self::merge_status(state, status))
    }

    pub fn peer_heartbeat(&self, idx: PeerIdx, status: PeerStatus) -> PeerPoolResult<UpdateOutcome> {
        let mut inner = self.inner.write().expect("Locking failed");
        let state = inner.peers.get_mut(&idx).context(UnknownPeerSnafu { idx })?;

        if !state.connected {
            return NotConnectedSnafu { idx }.fail();
        }
        state.last_update = Some(Timestamp::now());

        let outcome = Self::merge_status(state, status);
        if outcome == UpdateOutcome::Stale {
            trace!(
                target: LOG_TARGET,
                %idx,
                known = %state.status.committed_height,
                received = %status.committed_height,
                "Stale heartbeat"
            );
        }
        Ok(outcome)
    }

    fn merge_status(state: &mut PeerState, status: PeerStatus) -> UpdateOutcome {
        if status.committed_height < state.status.committed_height {
            return UpdateOutcome::Stale;
        }
        state.status = status;
        UpdateOutcome::Updated
    }

    pub fn peer_disconnected(&self, idx: PeerIdx) {
        let mut inner = self.inner.write().expect("Locking failed");
        if let Some(state) = inner.peers.get_mut(&idx) {
            if state.connected {
                debug!(target: LOG_TARGET, %idx, "Peer disconnected");
            }
            state.connected = false;
        }
    }

    pub fn get_active_peer_count(&self) -> usize {
        self.inner.read().expect("Locking failed").connected().count()
    }

    pub fn get_peer_index(&self, pubkey: PeerPubkey) -> Option<PeerIdx> {
        self.inner
            .read()
            .expect("Locking failed")
            .id_map
            .get(&pubkey)
            .copied()
    }

    pub fn get_peer(&self, idx: PeerIdx) -> Option<Peer> {
        self.inner.read().expect("Locking failed").peer(idx)
    }

    /// All connected peers
    pub fn get_neighbours(&self) -> Vec<Peer> {
        let inner = self.inner.read().expect("Locking failed");
        inner
            .connected()
            .filter_map(|(idx, _)| inner.peer(idx))
            .collect()
    }

    /// Number of connected peers that report having committed `height`
    pub fn count_committed_at_least(&self, height: Height) -> usize {
        self.inner
            .read()
            .expect("Locking failed")
            .connected()
            .filter(|(_, state)| height <= state.status.committed_height)
            .count()
    }

    /// The connected peer furthest ahead of `height`, if any
    pub fn best_peer_ahead_of(&self, height: Height) -> Option<Peer> {
        let inner = self.inner.read().expect("Locking failed");
        let (idx, _) = inner
            .connected()
            .filter(|(_, state)| height < state.status.committed_height)
            .max_by_key(|(_, state)| state.status.committed_height)?;
        inner.peer(idx)
    }
}
