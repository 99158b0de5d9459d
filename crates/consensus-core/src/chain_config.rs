use bincode::{Decode, Encode};
use convi::CastFrom as _;
use vbft_util_array_type::{
    array_type_define, array_type_impl_base32_str, array_type_impl_blake3_conv,
    array_type_impl_debug_as_display, array_type_impl_zero_default,
};

use crate::num_peers::{NumPeers, ToNumPeers as _};
use crate::peer::{PeerIdx, PeerPubkey};
use crate::peer_set::PeerSet;
use crate::signed::Hashable;

array_type_define! {
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct ChainConfigHash[32];
}
array_type_impl_zero_default!(ChainConfigHash);
array_type_impl_base32_str!(ChainConfigHash);
array_type_impl_debug_as_display!(ChainConfigHash);
array_type_impl_blake3_conv!(ChainConfigHash);

/// Committee configuration for a governance epoch
///
/// Every block header commits to the hash of the config it was produced
/// under, and peers refuse handshakes from nodes running a different one.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct ChainConfig {
    pub version: u32,
    pub peers: PeerSet,
    /// Size of the endorser/committer subset selected for every height
    ///
    /// Clamped to the committee size; `0` means "everyone".
    pub voters: u16,
}

impl Hashable for ChainConfig {}

impl ChainConfig {
    pub const VERSION: u32 = 1;

    pub fn new(peers: PeerSet) -> Self {
        Self {
            version: Self::VERSION,
            peers,
            voters: 0,
        }
    }

    pub fn with_voters(self, voters: u16) -> Self {
        Self { voters, ..self }
    }

    pub fn hash(&self) -> ChainConfigHash {
        Hashable::hash(self).into()
    }

    pub fn num_peers(&self) -> NumPeers {
        self.peers.to_num_peers()
    }

    pub fn num_voters(&self) -> NumPeers {
        let total = self.num_peers();
        if self.voters == 0 || usize::cast_from(self.voters) > total.total() {
            total
        } else {
            NumPeers::from(self.voters)
        }
    }

    pub fn find_peer_idx(&self, pubkey: PeerPubkey) -> Option<PeerIdx> {
        self.peers.find_idx(pubkey)
    }

    pub fn get_peer(&self, peer_idx: PeerIdx) -> Option<PeerPubkey> {
        self.peers.get(peer_idx)
    }

    pub fn iter_peers(&self) -> impl Iterator<Item = (PeerIdx, PeerPubkey)> + '_ {
        self.peers.iter_peers()
    }
}
