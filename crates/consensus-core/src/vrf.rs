//! Verifiable randomness and participant selection
//!
//! The proposer of block `h` evaluates a VRF over `(h, vrf value of block
//! h-1)` and records the output in the block header. The output of block
//! `h-1` is then the seed selecting the participants of height `h`, so no
//! proposer can influence the selection of the height it is proposing for.
//!
//! The VRF is built on ed25519: signatures are deterministic, so the
//! signature over the input digest is the proof and its hash is the value.

use bincode::{Decode, Encode};
use ed25519_dalek::Signer as _;
use num_bigint::BigUint;
use snafu::{OptionExt as _, Snafu};
use vbft_util_array_type::{
    array_type_define, array_type_impl_base32_str, array_type_impl_blake3_conv,
    array_type_impl_debug_as_display, array_type_impl_short_display,
    array_type_impl_zero_default,
};

use crate::Signature;
use crate::chain_config::ChainConfigHash;
use crate::height::{Height, View};
use crate::num_peers::NumPeers;
use crate::peer::{PeerIdx, PeerPubkey, PeerSeckey};

const VRF_INPUT_TAG: &[u8] = b"vbft-vrf-input";
const VRF_VALUE_TAG: &[u8] = b"vbft-vrf-value";
const VRF_GENESIS_TAG: &[u8] = b"vbft-vrf-genesis";
const SELECTION_TAG: &[u8] = b"vbft-selection";

array_type_define! {
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct VrfValue[32];
}
array_type_impl_zero_default!(VrfValue);
array_type_impl_base32_str!(VrfValue);
array_type_impl_debug_as_display!(VrfValue);
array_type_impl_blake3_conv!(VrfValue);
array_type_impl_short_display!(VrfValue, VrfValueShort);

impl VrfValue {
    /// The seed of height `1`, derived from the chain configuration
    pub fn genesis(chain_config_hash: ChainConfigHash) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(VRF_GENESIS_TAG);
        hasher.update(chain_config_hash.as_slice());
        hasher.finalize().into()
    }
}

#[derive(Encode, Decode, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VrfProof(pub Signature);

#[derive(Encode, Decode, Copy, Clone, Debug, PartialEq, Eq)]
pub struct VrfOutput {
    pub value: VrfValue,
    pub proof: VrfProof,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum VrfError {
    InvalidPubkey,
    InvalidProof,
    ValueMismatch,
}

pub type VrfResult<T> = Result<T, VrfError>;

fn vrf_input(height: Height, prev: VrfValue) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(VRF_INPUT_TAG);
    hasher.update(height.as_slice());
    hasher.update(prev.as_slice());
    hasher.finalize()
}

fn vrf_value(proof: &VrfProof) -> VrfValue {
    let mut hasher = blake3::Hasher::new();
    hasher.update(VRF_VALUE_TAG);
    hasher.update(proof.0.as_slice());
    hasher.finalize().into()
}

pub fn compute_vrf(seckey: PeerSeckey, height: Height, prev: VrfValue) -> VrfOutput {
    let proof = VrfProof(
        ed25519_dalek::SigningKey::from(seckey)
            .sign(vrf_input(height, prev).as_bytes())
            .into(),
    );

    VrfOutput {
        value: vrf_value(&proof),
        proof,
    }
}

pub fn verify_vrf(
    pubkey: PeerPubkey,
    height: Height,
    prev: VrfValue,
    value: VrfValue,
    proof: VrfProof,
) -> VrfResult<()> {
    ed25519_dalek::VerifyingKey::try_from(pubkey)
        .ok()
        .context(InvalidPubkeySnafu)?
        .verify_strict(vrf_input(height, prev).as_bytes(), &proof.0.into())
        .ok()
        .context(InvalidProofSnafu)?;

    if vrf_value(&proof) != value {
        return ValueMismatchSnafu.fail();
    }

    Ok(())
}

/// Participants of a single height
///
/// `order` is a permutation of the whole committee: the leader of view `v`
/// is `order[v mod N]`, and the first `M` entries are the voters (endorsers
/// and committers) for the whole height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    order: Vec<PeerIdx>,
    num_voters: usize,
}

impl Participants {
    pub fn select(seed: VrfValue, num_peers: NumPeers, num_voters: NumPeers) -> Self {
        let n = num_peers.total();
        let mut order: Vec<PeerIdx> = num_peers.peer_idx_iter().collect();

        // Fisher-Yates, with every swap index derived from the seed
        for i in (1..n).rev() {
            let mut hasher = blake3::Hasher::new();
            hasher.update(SELECTION_TAG);
            hasher.update(seed.as_slice());
            hasher.update(&u64::try_from(i).expect("Can't fail").to_be_bytes());

            let j = BigUint::from_bytes_be(hasher.finalize().as_bytes()) % BigUint::from(i + 1);
            let j = j.to_u64_digits().first().copied().unwrap_or_default();
            let j = usize::try_from(j).expect("Less than committee size");

            debug_assert!(j <= i);
            order.swap(i, j);
        }

        Self {
            order,
            num_voters: num_voters.total().min(n),
        }
    }

    pub fn order(&self) -> &[PeerIdx] {
        &self.order
    }

    pub fn leader(&self, view: View) -> PeerIdx {
        self.order[view.as_usize() % self.order.len()]
    }

    pub fn voters(&self) -> &[PeerIdx] {
        &self.order[..self.num_voters]
    }

    pub fn is_voter(&self, peer_idx: PeerIdx) -> bool {
        self.voters().contains(&peer_idx)
    }

    /// Number of matching votes needed among [`Self::voters`]
    pub fn quorum(&self) -> usize {
        NumPeers::from(u16::try_from(self.num_voters).expect("Can't fail")).threshold()
    }
}

#[cfg(test)]
mod tests;
