//! Counting votes of distinct peers

use std::collections::BTreeMap;

use bit_set::BitSet;
use vbft_consensus_core::Signature;
use vbft_consensus_core::block::BlockHash;
use vbft_consensus_core::peer::PeerIdx;
use vbft_consensus_core::signed::SignatureEntry;

/// Set of peers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteSet(BitSet);

impl VoteSet {
    /// Returns `false` if already present
    pub fn insert(&mut self, peer_idx: PeerIdx) -> bool {
        self.0.insert(peer_idx.as_usize())
    }

    pub fn remove(&mut self, peer_idx: PeerIdx) -> bool {
        self.0.remove(peer_idx.as_usize())
    }

    pub fn contains(&self, peer_idx: PeerIdx) -> bool {
        self.0.contains(peer_idx.as_usize())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PeerIdx> + '_ {
        self.0
            .iter()
            .map(|i| PeerIdx::from(u16::try_from(i).expect("Set only holds peer indices")))
    }
}

impl FromIterator<PeerIdx> for VoteSet {
    fn from_iter<T: IntoIterator<Item = PeerIdx>>(iter: T) -> Self {
        let mut set = Self::default();
        for peer_idx in iter {
            set.insert(peer_idx);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyOutcome {
    Inserted,
    /// Same vote was already counted
    Duplicate,
    /// Peer already voted for a different block
    Conflicting { existing: BlockHash },
}

/// Votes of a single kind, for a single height and view
///
/// Each peer gets at most one vote. The first one counts.
#[derive(Debug, Clone, Default)]
pub struct VoteTally {
    votes: BTreeMap<PeerIdx, (BlockHash, Signature)>,
    by_block: BTreeMap<BlockHash, VoteSet>,
}

impl VoteTally {
    pub fn insert(&mut self, peer_idx: PeerIdx, block_hash: BlockHash, sig: Signature) -> TallyOutcome {
        if let Some((existing, _)) = self.votes.get(&peer_idx) {
            return if *existing == block_hash {
                TallyOutcome::Duplicate
            } else {
                TallyOutcome::Conflicting {
                    existing: *existing,
                }
            };
        }

        self.votes.insert(peer_idx, (block_hash, sig));
        self.by_block
            .entry(block_hash)
            .or_default()
            .insert(peer_idx);
        TallyOutcome::Inserted
    }

    pub fn voters_for(&self, block_hash: BlockHash) -> Option<&VoteSet> {
        self.by_block.get(&block_hash)
    }

    pub fn count_for(&self, block_hash: BlockHash) -> usize {
        self.voters_for(block_hash).map(VoteSet::len).unwrap_or_default()
    }

    /// Block that gathered at least `threshold` votes, if any
    pub fn quorum_block(&self, threshold: usize) -> Option<BlockHash> {
        self.by_block
            .iter()
            .find(|(_, voters)| threshold <= voters.len())
            .map(|(hash, _)| *hash)
    }

    pub fn signatures_for(&self, block_hash: BlockHash) -> Vec<SignatureEntry> {
        self.voters_for(block_hash)
            .into_iter()
            .flat_map(VoteSet::iter)
            .filter_map(|peer_idx| {
                self.votes
                    .get(&peer_idx)
                    .map(|(_, sig)| SignatureEntry::new(peer_idx, *sig))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

#[cfg(test)]
mod tests;
