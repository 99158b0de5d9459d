use std::ops;

use bincode::{Decode, Encode};

use crate::num_peers::{NumPeers, ToNumPeers};
use crate::peer::{PeerIdx, PeerPubkey};

/// The committee, kept sorted
///
/// A peer's [`PeerIdx`] is its position in this set, so every node derives
/// the same index ↔ identity mapping from the same set.
#[derive(Debug, Clone, Encode, Decode, Default, PartialEq, Eq)]
pub struct PeerSet(Vec<PeerPubkey>);

impl ops::Deref for PeerSet {
    type Target = [PeerPubkey];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PeerSet {
    pub fn new() -> Self {
        Self(vec![])
    }

    pub fn as_slice(&self) -> &[PeerPubkey] {
        &self.0
    }

    pub fn insert(&mut self, peer_pubkey: PeerPubkey) -> bool {
        if self.0.binary_search(&peer_pubkey).is_ok() {
            return false;
        }
        self.0.push(peer_pubkey);
        self.0.sort_unstable();
        true
    }

    pub fn find_idx(&self, peer_pubkey: PeerPubkey) -> Option<PeerIdx> {
        let idx = self.0.binary_search(&peer_pubkey).ok()?;
        Some(PeerIdx::new(u16::try_from(idx).ok()?))
    }

    pub fn get(&self, peer_idx: PeerIdx) -> Option<PeerPubkey> {
        self.0.get(peer_idx.as_usize()).copied()
    }

    pub fn iter_peers(&self) -> impl Iterator<Item = (PeerIdx, PeerPubkey)> + '_ {
        self.to_num_peers().peer_idx_iter().zip(self.0.iter().copied())
    }
}

impl ToNumPeers for PeerSet {
    fn to_num_peers(&self) -> NumPeers {
        self.0.to_num_peers()
    }
}

impl FromIterator<PeerPubkey> for PeerSet {
    fn from_iter<T: IntoIterator<Item = PeerPubkey>>(iter: T) -> Self {
        let mut items = Vec::from_iter(iter);
        items.sort_unstable();
        items.dedup();
        Self(items)
    }
}

impl<'a> IntoIterator for &'a PeerSet {
    type Item = &'a PeerPubkey;

    type IntoIter = <&'a [PeerPubkey] as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.as_slice().iter()
    }
}

impl From<Vec<PeerPubkey>> for PeerSet {
    fn from(value: Vec<PeerPubkey>) -> Self {
        value.into_iter().collect()
    }
}
