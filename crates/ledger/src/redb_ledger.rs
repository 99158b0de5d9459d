use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use snafu::{OptionExt as _, ResultExt as _};
use tracing::{debug, info, instrument};
use vbft_consensus_core::bincode::STD_BINCODE_CONFIG;
use vbft_consensus_core::block::{ChainBlock, CrossChainMsg, TransactionRaw};
use vbft_consensus_core::exec::{ExecuteResult, StateRoot, WriteSet};
use vbft_consensus_core::height::Height;
use vbft_db::Database;
use vbft_db::error::{DbTxError, TxSnafu};

use crate::tables::{
    ledger_blocks, ledger_cross_msgs, ledger_cross_roots, ledger_height, ledger_state,
    ledger_state_roots,
};
use crate::{
    GenesisMismatchSnafu, HeightMismatchSnafu, Ledger, LedgerResult, MissingBlockSnafu,
    NotInitializedSnafu, PrevHashMismatchSnafu, ResultMismatchSnafu,
};

const LOG_TARGET: &str = "vbft::ledger";

/// Transactions with this prefix contribute to the cross-chain states root
pub const CROSS_CHAIN_TX_PREFIX: &[u8] = b"xchain:";

#[derive(Debug)]
pub struct RedbLedger {
    db: Database,
    height: Arc<AtomicU64>,
}

impl RedbLedger {
    /// Open a ledger, writing `genesis` if the database is empty
    ///
    /// Opening an already initialized ledger with the same genesis is fine.
    #[instrument(skip_all)]
    pub async fn init(db: Database, genesis: &ChainBlock) -> LedgerResult<Self> {
        let genesis_hash = genesis.hash();

        db.write_with_falliable(|dbtx| {
            let mut height_tbl = dbtx.open_table(&ledger_height::TABLE)?;
            let mut blocks_tbl = dbtx.open_table(&ledger_blocks::TABLE)?;
            let mut state_roots_tbl = dbtx.open_table(&ledger_state_roots::TABLE)?;
            let mut cross_roots_tbl = dbtx.open_table(&ledger_cross_roots::TABLE)?;
            // Read transactions fail on missing tables, so create all of them here
            dbtx.open_table(&ledger_cross_msgs::TABLE)?;
            dbtx.open_table(&ledger_state::TABLE)?;

            if height_tbl.get(&())?.is_some() {
                let existing = blocks_tbl
                    .get(&Height::ZERO)?
                    .map(|b| b.value().hash())
                    .unwrap_or_default();
                if existing != genesis_hash {
                    return GenesisMismatchSnafu { existing }.fail().context(TxSnafu);
                }
                return Ok(());
            }

            info!(target: LOG_TARGET, %genesis_hash, "Initializing ledger");
            height_tbl.insert(&(), &Height::ZERO)?;
            blocks_tbl.insert(&Height::ZERO, genesis)?;
            state_roots_tbl.insert(&Height::ZERO, &StateRoot::ZERO)?;
            cross_roots_tbl.insert(&Height::ZERO, &StateRoot::ZERO)?;
            Ok(())
        })
        .await
        .map_err(DbTxError::flatten)?;

        Self::open(db).await
    }

    /// Open an already initialized ledger
    ///
    /// Fails with [`crate::LedgerError::NotInitialized`] on an empty database.
    pub async fn open(db: Database) -> LedgerResult<Self> {
        let height = db
            .write_with(|dbtx| {
                let tbl = dbtx.open_table(&ledger_height::TABLE)?;
                Ok(tbl.get(&())?.map(|h| h.value()))
            })
            .await?
            .context(NotInitializedSnafu)?;

        debug!(target: LOG_TARGET, %height, "Opened ledger");
        Ok(Self {
            db,
            height: Arc::new(AtomicU64::new(height.to_number())),
        })
    }

    /// Current value stored under `key`
    pub async fn get_state(&self, key: &[u8]) -> LedgerResult<Option<Vec<u8>>> {
        let key = key.to_vec();
        Ok(self
            .db
            .read_with(|dbtx| {
                let tbl = dbtx.open_table(&ledger_state::TABLE)?;
                Ok(tbl.get(&key)?.map(|v| v.value()))
            })
            .await?)
    }

    fn compute_state_root(prev: StateRoot, write_set: &WriteSet) -> StateRoot {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"vbft-state");
        hasher.update(prev.as_slice());
        bincode::encode_into_std_write(write_set, &mut hasher, STD_BINCODE_CONFIG)
            .expect("Can't fail");
        hasher.finalize().into()
    }

    fn compute_cross_states_root(txs: &[TransactionRaw]) -> StateRoot {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"vbft-xchain");
        let mut any = false;
        for tx in txs
            .iter()
            .filter(|tx| tx.as_bytes().starts_with(CROSS_CHAIN_TX_PREFIX))
        {
            any = true;
            hasher.update(tx.hash().as_slice());
        }

        if any {
            hasher.finalize().into()
        } else {
            StateRoot::ZERO
        }
    }

    fn check_extends(
        block: &ChainBlock,
        tip_height: Height,
        tip: Option<ChainBlock>,
    ) -> LedgerResult<()> {
        let expected = tip_height.next_expect();
        if block.height() != expected {
            return HeightMismatchSnafu {
                expected,
                received: block.height(),
            }
            .fail();
        }
        let tip = tip.context(MissingBlockSnafu { height: tip_height })?;
        if tip.hash() != block.header.prev_block_hash {
            return PrevHashMismatchSnafu {
                height: block.height(),
            }
            .fail();
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for RedbLedger {
    fn get_current_block_height(&self) -> Height {
        Height::from(self.height.load(Ordering::SeqCst))
    }

    async fn get_block_by_height(&self, height: Height) -> LedgerResult<Option<ChainBlock>> {
        Ok(self
            .db
            .read_with(|dbtx| {
                let tbl = dbtx.open_table(&ledger_blocks::TABLE)?;
                Ok(tbl.get(&height)?.map(|b| b.value()))
            })
            .await?)
    }

    async fn get_state_merkle_root(&self, height: Height) -> LedgerResult<Option<StateRoot>> {
        Ok(self
            .db
            .read_with(|dbtx| {
                let tbl = dbtx.open_table(&ledger_state_roots::TABLE)?;
                Ok(tbl.get(&height)?.map(|r| r.value()))
            })
            .await?)
    }

    async fn get_cross_states_root(&self, height: Height) -> LedgerResult<Option<StateRoot>> {
        Ok(self
            .db
            .read_with(|dbtx| {
                let tbl = dbtx.open_table(&ledger_cross_roots::TABLE)?;
                Ok(tbl.get(&height)?.map(|r| r.value()))
            })
            .await?)
    }

    async fn get_cross_chain_msg(&self, height: Height) -> LedgerResult<Option<CrossChainMsg>> {
        Ok(self
            .db
            .read_with(|dbtx| {
                let tbl = dbtx.open_table(&ledger_cross_msgs::TABLE)?;
                Ok(tbl.get(&height)?.map(|m| m.value()))
            })
            .await?)
    }

    #[instrument(skip_all, fields(height = %block.height()))]
    async fn execute_block(&self, block: &ChainBlock) -> LedgerResult<ExecuteResult> {
        let tip_height = self.get_current_block_height();

        let (tip, prev_root) = self
            .db
            .read_with(|dbtx| {
                let blocks_tbl = dbtx.open_table(&ledger_blocks::TABLE)?;
                let roots_tbl = dbtx.open_table(&ledger_state_roots::TABLE)?;
                Ok((
                    blocks_tbl.get(&tip_height)?.map(|b| b.value()),
                    roots_tbl.get(&tip_height)?.map(|r| r.value()),
                ))
            })
            .await?;

        Self::check_extends(block, tip_height, tip)?;
        let prev_root = prev_root.context(MissingBlockSnafu { height: tip_height })?;

        let mut write_set = WriteSet::new();
        for tx in &block.transactions {
            let mut key = b"tx/".to_vec();
            key.extend_from_slice(tx.hash().as_slice());
            write_set.insert(key, tx.as_bytes());
        }
        write_set.insert(
            b"height".as_slice(),
            block.height().to_bytes().as_slice(),
        );

        let result = ExecuteResult {
            height: block.height(),
            state_root: Self::compute_state_root(prev_root, &write_set),
            cross_states_root: Self::compute_cross_states_root(&block.transactions),
            write_set,
        };

        debug!(
            target: LOG_TARGET,
            state_root = %result.state_root.to_short(),
            writes = result.write_set.len(),
            "Executed block"
        );
        Ok(result)
    }

    #[instrument(skip_all, fields(height = %block.height()))]
    async fn submit_block(
        &self,
        block: &ChainBlock,
        cross_chain_msg: Option<&CrossChainMsg>,
        result: &ExecuteResult,
    ) -> LedgerResult<()> {
        if result.height != block.height() {
            return ResultMismatchSnafu {
                height: block.height(),
                result_height: result.height,
            }
            .fail();
        }

        let cached_height = self.height.clone();
        let height = block.height();

        self.db
            .write_with_falliable(|dbtx| {
                let mut height_tbl = dbtx.open_table(&ledger_height::TABLE)?;
                let mut blocks_tbl = dbtx.open_table(&ledger_blocks::TABLE)?;

                let tip_height = height_tbl.get(&())?.map(|h| h.value()).unwrap_or_default();
                let tip = blocks_tbl.get(&tip_height)?.map(|b| b.value());
                Self::check_extends(block, tip_height, tip).context(TxSnafu)?;

                height_tbl.insert(&(), &height)?;
                blocks_tbl.insert(&height, block)?;
                dbtx.open_table(&ledger_state_roots::TABLE)?
                    .insert(&height, &result.state_root)?;
                dbtx.open_table(&ledger_cross_roots::TABLE)?
                    .insert(&height, &result.cross_states_root)?;
                if let Some(msg) = cross_chain_msg {
                    dbtx.open_table(&ledger_cross_msgs::TABLE)?
                        .insert(&height, msg)?;
                }

                let mut state_tbl = dbtx.open_table(&ledger_state::TABLE)?;
                for (k, v) in result.write_set.iter() {
                    state_tbl.insert(&k.to_vec(), &v.to_vec())?;
                }

                dbtx.on_commit(move || {
                    cached_height.store(height.to_number(), Ordering::SeqCst);
                });
                Ok(())
            })
            .await
            .map_err(DbTxError::flatten)?;

        debug!(target: LOG_TARGET, "Submitted block");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
