use bincode::{Decode, Encode};
use snafu::Snafu;
use vbft_util_array_type::{
    array_type_define, array_type_fixed_size_define, array_type_impl_base32_str,
    array_type_impl_blake3_conv, array_type_impl_debug_as_display, array_type_impl_short_display,
    array_type_impl_zero_default,
};

use crate::chain_config::{ChainConfig, ChainConfigHash};
use crate::exec::StateRoot;
use crate::framed_payload_define;
use crate::height::{Height, View};
use crate::peer::PeerIdx;
use crate::signed::Hashable;
use crate::timestamp::Timestamp;
use crate::vrf::{VrfOutput, VrfProof, VrfValue};

array_type_define! {
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct BlockHash[32];
}
array_type_impl_zero_default!(BlockHash);
array_type_impl_base32_str!(BlockHash);
array_type_impl_debug_as_display!(BlockHash);
array_type_impl_blake3_conv!(BlockHash);
array_type_impl_short_display!(BlockHash, BlockHashShort);

array_type_define! {
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct TransactionHash[32];
}
array_type_impl_zero_default!(TransactionHash);
array_type_impl_base32_str!(TransactionHash);
array_type_impl_debug_as_display!(TransactionHash);
array_type_impl_blake3_conv!(TransactionHash);

array_type_define! {
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct TransactionsRoot[32];
}
array_type_impl_zero_default!(TransactionsRoot);
array_type_impl_base32_str!(TransactionsRoot);
array_type_impl_debug_as_display!(TransactionsRoot);
array_type_impl_blake3_conv!(TransactionsRoot);

array_type_fixed_size_define! {
    #[derive(Encode, Decode, Clone, Copy)]
    pub struct TransactionLen(u32);
}

framed_payload_define! {
    /// An opaque, already encoded transaction
    pub struct TransactionRaw;

    TransactionHash;
    TransactionLen;

    pub struct TransactionSlice;
}

/// Commitment to an ordered list of transactions
pub fn transactions_root(txs: &[TransactionRaw]) -> TransactionsRoot {
    if txs.is_empty() {
        return TransactionsRoot::ZERO;
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"vbft-txs");
    for tx in txs {
        hasher.update(tx.hash().as_slice());
    }
    hasher.finalize().into()
}

#[derive(Debug, Encode, Decode, Copy, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub height: Height,
    /// View the block was proposed in
    pub view: View,
    pub proposer: PeerIdx,
    pub timestamp: Timestamp,

    /// Commits to previous `BlockHeader`
    pub prev_block_hash: BlockHash,

    /// State root after executing the previous block
    ///
    /// Execution lags one block behind agreement: block `h` commits to the
    /// result of executing block `h-1`.
    pub prev_exec_merkle_root: StateRoot,

    pub tx_root: TransactionsRoot,
    pub tx_count: u32,

    /// Commits to [`ChainConfig`] used for this block
    pub chain_config_hash: ChainConfigHash,

    /// Proposer's VRF output over `(height, prev.vrf_value)`
    pub vrf_value: VrfValue,
    pub vrf_proof: VrfProof,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ContentMismatchError {
    TxRootMismatch,
    TxCountMismatch,
}

pub type ContentMismatchResult<T> = std::result::Result<T, ContentMismatchError>;

impl Hashable for BlockHeader {}

#[bon::bon]
impl BlockHeader {
    pub const VERSION: u32 = 1;

    #[builder]
    pub fn new(
        prev: &BlockHeader,
        view: View,
        proposer: PeerIdx,
        timestamp: Timestamp,
        prev_exec_merkle_root: StateRoot,
        chain_config_hash: ChainConfigHash,
        vrf: VrfOutput,
        transactions: &[TransactionRaw],
    ) -> Self {
        Self {
            version: Self::VERSION,
            height: prev.height.next_expect(),
            view,
            proposer,
            timestamp,
            prev_block_hash: prev.hash(),
            prev_exec_merkle_root,
            tx_root: transactions_root(transactions),
            tx_count: u32::try_from(transactions.len()).expect("Can't fail"),
            chain_config_hash,
            vrf_value: vrf.value,
            vrf_proof: vrf.proof,
        }
    }
}

impl BlockHeader {
    pub fn genesis(chain_config: &ChainConfig) -> Self {
        let chain_config_hash = chain_config.hash();
        Self {
            version: Self::VERSION,
            height: Height::ZERO,
            view: View::ZERO,
            proposer: PeerIdx::ZERO,
            timestamp: Timestamp::ZERO,
            prev_block_hash: BlockHash::ZERO,
            prev_exec_merkle_root: StateRoot::ZERO,
            tx_root: TransactionsRoot::ZERO,
            tx_count: 0,
            chain_config_hash,
            vrf_value: VrfValue::genesis(chain_config_hash),
            vrf_proof: VrfProof::default(),
        }
    }

    pub fn hash(&self) -> BlockHash {
        Hashable::hash(self).into()
    }

    pub fn vrf(&self) -> VrfOutput {
        VrfOutput {
            value: self.vrf_value,
            proof: self.vrf_proof,
        }
    }
}

/// The part of a block that is agreed on and handed to the ledger
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub header: BlockHeader,
    pub transactions: Vec<TransactionRaw>,
}

impl ChainBlock {
    pub fn genesis(chain_config: &ChainConfig) -> Self {
        Self {
            header: BlockHeader::genesis(chain_config),
            transactions: vec![],
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    pub fn verify_content(&self) -> ContentMismatchResult<()> {
        if u32::try_from(self.transactions.len()).ok() != Some(self.header.tx_count) {
            TxCountMismatchSnafu.fail()?;
        }
        if transactions_root(&self.transactions) != self.header.tx_root {
            TxRootMismatchSnafu.fail()?;
        }
        Ok(())
    }

    pub fn tx_hashes(&self) -> Vec<TransactionHash> {
        self.transactions.iter().map(TransactionRaw::hash).collect()
    }
}

/// Cross-chain message emitted for a height
///
/// Commits to the cross-chain states root of the previous height.
#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq)]
pub struct CrossChainMsg {
    pub height: Height,
    pub states_root: StateRoot,
}

impl CrossChainMsg {
    /// Message expected in block `height` given the cross-chain states root
    /// after executing `height - 1`
    ///
    /// `None` if there were no cross-chain states to commit to.
    pub fn expected(height: Height, prev_cross_states_root: StateRoot) -> Option<Self> {
        if prev_cross_states_root.is_zero() {
            return None;
        }
        Some(Self {
            height: height.prev().unwrap_or_default(),
            states_root: prev_cross_states_root,
        })
    }
}

/// A proposed block, as carried in proposals and sealed-block responses
///
/// The cross-chain message is not covered by the block hash, so every
/// receiver checks it against its own expectation.
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct Block {
    pub chain_block: ChainBlock,
    pub cross_chain_msg: Option<CrossChainMsg>,
}

impl Block {
    pub fn header(&self) -> &BlockHeader {
        &self.chain_block.header
    }

    pub fn height(&self) -> Height {
        self.chain_block.header.height
    }

    pub fn hash(&self) -> BlockHash {
        self.chain_block.hash()
    }

    pub fn prev_exec_merkle_root(&self) -> StateRoot {
        self.chain_block.header.prev_exec_merkle_root
    }

    pub fn transactions(&self) -> &[TransactionRaw] {
        &self.chain_block.transactions
    }
}
