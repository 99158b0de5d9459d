// SPDX-License-Identifier: MIT

//! Core types used in VBFT consensus
//!
//! Focused on serialization/encoding, conversions, etc of core data formats
//! used across the project: heights and views, peer identities, blocks,
//! verifiable randomness and the consensus wire messages.
use ::bincode::de::{BorrowDecoder, Decoder};
use ::bincode::enc::Encoder;
use ::bincode::error::{DecodeError, EncodeError};
use ::bincode::{BorrowDecode, Decode, Encode};
use vbft_util_array_type::{
    array_type_define, array_type_impl_base32_str, array_type_impl_debug_as_display,
    array_type_impl_zero_default,
};

pub mod bincode;
pub mod block;
pub mod chain_config;
pub mod exec;
pub mod height;
pub mod msg;
pub mod num_peers;
pub mod peer;
pub mod peer_set;
pub mod signed;
pub mod timestamp;
pub mod vrf;

array_type_define! {
    #[derive(Copy, Clone, Hash)]
    pub struct Signature[64];
}
array_type_impl_zero_default!(Signature);
array_type_impl_base32_str!(Signature);
array_type_impl_debug_as_display!(Signature);

// On the wire signatures are length-prefixed byte strings, so a decoder must
// reject anything that isn't exactly 64 bytes long.
impl Encode for Signature {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(self.0.as_slice(), encoder)
    }
}

impl<Context> Decode<Context> for Signature {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let bytes = Vec::<u8>::decode(decoder)?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| DecodeError::Other("irregular signature length"))?;
        Ok(Self(bytes))
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for Signature {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Decode::decode(decoder)
    }
}

impl From<Signature> for ed25519_dalek::Signature {
    fn from(value: Signature) -> Self {
        ed25519_dalek::Signature::from_bytes(&value.0)
    }
}

impl From<ed25519_dalek::Signature> for Signature {
    fn from(value: ed25519_dalek::Signature) -> Self {
        Self(value.to_bytes())
    }
}
