use core::fmt;

use bincode::{Decode, Encode};
use convi::CastFrom as _;
use snafu::Snafu;
use vbft_util_array_type::{
    array_type_define, array_type_fixed_size_define, array_type_impl_base32_str,
    array_type_impl_bytes_conv, array_type_impl_debug_as_display, array_type_impl_rand,
    array_type_impl_zero_default,
};

array_type_fixed_size_define! {
    /// Peer index
    ///
    /// The committee is known within the consensus, so we refer to its
    /// members by their position in the (sorted) [`crate::peer_set::PeerSet`].
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct PeerIdx(u16);
}

impl PeerIdx {
    pub fn as_usize(self) -> usize {
        usize::cast_from(self.to_number())
    }
}

impl From<PeerIdx> for usize {
    fn from(value: PeerIdx) -> Self {
        value.as_usize()
    }
}

array_type_define! {
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct PeerPubkey[32];
}

impl PeerPubkey {
    pub fn to_short(self) -> PeerPubkeyShort {
        PeerPubkeyShort(self)
    }
}

pub struct PeerPubkeyShort(PeerPubkey);

impl fmt::Display for PeerPubkeyShort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{}...{}",
            data_encoding::BASE32_DNSCURVE.encode_display(&self.0.as_slice()[0..4]),
            data_encoding::BASE32_DNSCURVE.encode_display(&self.0.as_slice()[28..32])
        ))
    }
}

array_type_impl_zero_default!(PeerPubkey);
array_type_impl_base32_str!(PeerPubkey);
array_type_impl_debug_as_display!(PeerPubkey);
array_type_impl_rand!(PeerPubkey);

#[derive(Debug, Snafu)]
pub struct InvalidPubkeyError;

impl TryFrom<PeerPubkey> for ed25519_dalek::VerifyingKey {
    type Error = InvalidPubkeyError;

    fn try_from(value: PeerPubkey) -> Result<Self, Self::Error> {
        ed25519_dalek::VerifyingKey::from_bytes(&value.0).map_err(|_| InvalidPubkeyError)
    }
}

array_type_define! {
    #[derive(Encode, Decode, Clone, Copy)]
    pub struct PeerSeckey[32];
}

impl PeerSeckey {
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()).to_bytes())
    }

    pub fn pubkey(self) -> PeerPubkey {
        PeerPubkey(
            ed25519_dalek::SigningKey::from(self)
                .verifying_key()
                .to_bytes(),
        )
    }
}

impl From<PeerSeckey> for ed25519_dalek::SigningKey {
    fn from(value: PeerSeckey) -> Self {
        ed25519_dalek::SigningKey::from_bytes(&value.0)
    }
}

array_type_impl_bytes_conv!(PeerSeckey);
array_type_impl_base32_str!(PeerSeckey);
array_type_impl_zero_default!(PeerSeckey);
