// SPDX-License-Identifier: MIT

//! The ledger the consensus hands agreed blocks to
//!
//! Consensus only relies on the [`Ledger`] trait. [`RedbLedger`] is a small
//! reference implementation storing everything in a [`vbft_db::Database`].

mod redb_ledger;
mod tables;

use async_trait::async_trait;
pub use redb_ledger::{CROSS_CHAIN_TX_PREFIX, RedbLedger};
use snafu::{Location, Snafu};
use vbft_consensus_core::block::{BlockHash, ChainBlock, CrossChainMsg};
use vbft_consensus_core::exec::{ExecuteResult, StateRoot};
use vbft_consensus_core::height::Height;
use vbft_db::error::DbError;
use vbft_util_error::BoxedError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LedgerError {
    #[snafu(transparent)]
    Db {
        source: DbError,
        #[snafu(implicit)]
        location: Location,
    },
    NotInitialized,
    #[snafu(display("Ledger initialized with a different genesis: {existing}"))]
    GenesisMismatch { existing: BlockHash },
    #[snafu(display("Wrong block height: expected {expected}, received {received}"))]
    HeightMismatch { expected: Height, received: Height },
    #[snafu(display("Block at {height} does not extend the ledger tip"))]
    PrevHashMismatch { height: Height },
    #[snafu(display("Execution result is for height {result_height}, block is {height}"))]
    ResultMismatch {
        height: Height,
        result_height: Height,
    },
    #[snafu(display("Missing block at {height}"))]
    MissingBlock { height: Height },
    /// For implementations backed by something else than [`vbft_db`]
    #[snafu(display("Ledger unavailable"))]
    Other { source: BoxedError },
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Height of the last submitted block
    fn get_current_block_height(&self) -> Height;

    async fn get_block_by_height(&self, height: Height) -> LedgerResult<Option<ChainBlock>>;

    async fn get_state_merkle_root(&self, height: Height) -> LedgerResult<Option<StateRoot>>;

    async fn get_cross_states_root(&self, height: Height) -> LedgerResult<Option<StateRoot>>;

    async fn get_cross_chain_msg(&self, height: Height) -> LedgerResult<Option<CrossChainMsg>>;

    /// Execute a block on top of the current ledger tip, without persisting
    /// anything
    async fn execute_block(&self, block: &ChainBlock) -> LedgerResult<ExecuteResult>;

    /// Persist a block along with the result of executing it
    async fn submit_block(
        &self,
        block: &ChainBlock,
        cross_chain_msg: Option<&CrossChainMsg>,
        result: &ExecuteResult,
    ) -> LedgerResult<()>;
}
