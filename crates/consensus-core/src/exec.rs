//! Results of executing a block against the ledger state

use bincode::{Decode, Encode};
use vbft_util_array_type::{
    array_type_define, array_type_impl_base32_str, array_type_impl_blake3_conv,
    array_type_impl_debug_as_display, array_type_impl_short_display,
    array_type_impl_zero_default,
};

use crate::height::Height;

array_type_define! {
    /// Merkle root of the ledger state (or of the cross-chain states)
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct StateRoot[32];
}
array_type_impl_zero_default!(StateRoot);
array_type_impl_base32_str!(StateRoot);
array_type_impl_debug_as_display!(StateRoot);
array_type_impl_blake3_conv!(StateRoot);
array_type_impl_short_display!(StateRoot, StateRootShort);

/// Key/value changes produced by executing a block
#[derive(Encode, Decode, Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteSet(Vec<(Vec<u8>, Vec<u8>)>);

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
pub struct ExecuteResult {
    pub height: Height,
    pub write_set: WriteSet,
    pub state_root: StateRoot,
    pub cross_states_root: StateRoot,
}
