//! Pipeline between agreement and the ledger
//!
//! Agreed blocks are executed right away, but only submitted (persisted)
//! to the ledger once the next block arrives. So at any time there is one
//! executed-but-not-submitted block at `chained_block_num`, and at most one
//! (already submitted) block below it kept to answer queries about the
//! previous height.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use vbft_consensus_core::block::{Block, BlockHash, TransactionHash};
use vbft_consensus_core::exec::{ExecuteResult, StateRoot, WriteSet};
use vbft_consensus_core::height::Height;
use vbft_ledger::{Ledger, LedgerError};
use vbft_util_error::fmt::FmtCompact as _;

const LOG_TARGET: &str = "vbft::consensus::chain-store";

#[derive(Debug, Clone)]
pub struct PendingBlock {
    pub block: Block,
    pub execute_result: ExecuteResult,
    pub has_submitted: bool,
}

/// Notifications about blocks moving through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// Block was agreed on and executed
    BlockConsensusComplete {
        height: Height,
        block_hash: BlockHash,
        tx_hashes: Vec<TransactionHash>,
    },
    /// Block was persisted in the ledger
    SaveBlockComplete {
        height: Height,
        block_hash: BlockHash,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ChainStoreError {
    #[snafu(display("Block {height} does not follow chained block {chained}"))]
    HeightGap { chained: Height, height: Height },
    #[snafu(display("Block {height} does not extend chained block {prev}"))]
    DoesNotExtend { height: Height, prev: BlockHash },
    #[snafu(display("Ledger has no block at {height}"))]
    MissingBlock { height: Height },
    #[snafu(display("Ledger query for {height} failed"))]
    Ledger { source: LedgerError, height: Height },
    #[snafu(display("Executing block {height} failed"))]
    Execute { source: LedgerError, height: Height },
    #[snafu(display(
        "Submitting block {height} failed (chained: {chained}, persisted: {persisted})"
    ))]
    Submit {
        source: LedgerError,
        height: Height,
        chained: Height,
        persisted: Height,
    },
}

impl ChainStoreError {
    /// Broken pipeline invariant, the node must not continue
    ///
    /// Everything else is a (possibly transient) ledger failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChainStoreError::HeightGap { .. } | ChainStoreError::DoesNotExtend { .. }
        )
    }
}

pub type ChainStoreResult<T> = Result<T, ChainStoreError>;

pub struct ChainStore {
    ledger: Arc<dyn Ledger>,
    chained_block_num: AtomicU64,
    pending_blocks: std::sync::Mutex<BTreeMap<Height, PendingBlock>>,
    /// Serializes `add_block`/`submit_block`/`reload_from_ledger`
    write_lock: tokio::sync::Mutex<()>,
    notify: Option<broadcast::Sender<ChainEvent>>,
}

impl ChainStore {
    #[instrument(skip_all)]
    pub async fn open(
        ledger: Arc<dyn Ledger>,
        notify: Option<broadcast::Sender<ChainEvent>>,
    ) -> ChainStoreResult<Self> {
        let height = ledger.get_current_block_height();
        let anchor = Self::load_from_ledger(ledger.as_ref(), height).await?;

        info!(target: LOG_TARGET, %height, hash = %anchor.block.hash().to_short(), "Opened chain store");

        Ok(Self {
            ledger,
            chained_block_num: AtomicU64::new(height.to_number()),
            pending_blocks: std::sync::Mutex::new(BTreeMap::from([(height, anchor)])),
            write_lock: tokio::sync::Mutex::new(()),
            notify,
        })
    }

    async fn load_from_ledger(ledger: &dyn Ledger, height: Height) -> ChainStoreResult<PendingBlock> {
        let block = Self::load_block_from_ledger(ledger, height)
            .await?
            .context(MissingBlockSnafu { height })?;
        let state_root = ledger
            .get_state_merkle_root(height)
            .await
            .context(LedgerSnafu { height })?
            .context(MissingBlockSnafu { height })?;
        let cross_states_root = ledger
            .get_cross_states_root(height)
            .await
            .context(LedgerSnafu { height })?
            .unwrap_or_default();

        Ok(PendingBlock {
            block,
            execute_result: ExecuteResult {
                height,
                write_set: WriteSet::new(),
                state_root,
                cross_states_root,
            },
            has_submitted: true,
        })
    }

    async fn load_block_from_ledger(
        ledger: &dyn Ledger,
        height: Height,
    ) -> ChainStoreResult<Option<Block>> {
        let Some(chain_block) = ledger
            .get_block_by_height(height)
            .await
            .context(LedgerSnafu { height })?
        else {
            return Ok(None);
        };
        let cross_chain_msg = ledger
            .get_cross_chain_msg(height)
            .await
            .context(LedgerSnafu { height })?;

        Ok(Some(Block {
            chain_block,
            cross_chain_msg,
        }))
    }

    pub fn chained_block_num(&self) -> Height {
        Height::from(self.chained_block_num.load(Ordering::SeqCst))
    }

    /// Heights currently in the pipeline, with their submission status
    pub fn pending_heights(&self) -> Vec<(Height, bool)> {
        self.pending_blocks
            .lock()
            .expect("Locking failed")
            .iter()
            .map(|(h, p)| (*h, p.has_submitted))
            .collect()
    }

    fn get_pending<T>(&self, height: Height, f: impl FnOnce(&PendingBlock) -> T) -> Option<T> {
        self.pending_blocks
            .lock()
            .expect("Locking failed")
            .get(&height)
            .map(f)
    }

    fn notify(&self, event: ChainEvent) {
        if let Some(notify) = self.notify.as_ref() {
            // No receivers is fine
            let _ = notify.send(event);
        }
    }

    /// Add the next agreed block to the pipeline
    ///
    /// Submits the currently chained block, then executes `block` and makes
    /// it the new chained one.
    #[instrument(skip_all, fields(height = %block.height()))]
    pub async fn add_block(&self, block: Block) -> ChainStoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let chained = self.chained_block_num();
        let height = block.height();

        if height <= chained {
            debug!(target: LOG_TARGET, %chained, "Ignoring already chained block");
            return Ok(());
        }

        if height != chained.next_expect() {
            return HeightGapSnafu { chained, height }.fail();
        }

        let prev = self
            .get_pending(chained, |p| p.block.hash())
            .context(MissingBlockSnafu { height: chained })?;
        if block.header().prev_block_hash != prev {
            return DoesNotExtendSnafu { height, prev }.fail();
        }

        self.submit_block_locked(chained).await?;

        let execute_result = self
            .ledger
            .execute_block(&block.chain_block)
            .await
            .context(ExecuteSnafu { height })?;

        let block_hash = block.hash();
        let tx_hashes = block.chain_block.tx_hashes();

        self.pending_blocks.lock().expect("Locking failed").insert(
            height,
            PendingBlock {
                block,
                execute_result,
                has_submitted: false,
            },
        );
        self.chained_block_num
            .store(height.to_number(), Ordering::SeqCst);

        debug!(target: LOG_TARGET, hash = %block_hash.to_short(), "Block chained");
        self.notify(ChainEvent::BlockConsensusComplete {
            height,
            block_hash,
            tx_hashes,
        });
        Ok(())
    }

    /// Persist a pending block in the ledger
    ///
    /// A no-op for genesis, unknown and already submitted heights.
    pub async fn submit_block(&self, height: Height) -> ChainStoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.submit_block_locked(height).await
    }

    async fn submit_block_locked(&self, height: Height) -> ChainStoreResult<()> {
        if height == Height::ZERO {
            return Ok(());
        }

        let Some(Some((block, execute_result))) = self.get_pending(height, |p| {
            (!p.has_submitted).then(|| (p.block.clone(), p.execute_result.clone()))
        }) else {
            return Ok(());
        };

        if let Err(source) = self
            .ledger
            .submit_block(
                &block.chain_block,
                block.cross_chain_msg.as_ref(),
                &execute_result,
            )
            .await
        {
            let err = ChainStoreError::Submit {
                source,
                height,
                chained: self.chained_block_num(),
                persisted: self.ledger.get_current_block_height(),
            };
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Block submission failed");
            return Err(err);
        }

        {
            let mut pending = self.pending_blocks.lock().expect("Locking failed");
            if let Some(p) = pending.get_mut(&height) {
                p.has_submitted = true;
            }
            if let Some(prev) = height.prev() {
                pending.remove(&prev);
            }
        }

        debug!(target: LOG_TARGET, %height, "Block submitted");
        self.notify(ChainEvent::SaveBlockComplete {
            height,
            block_hash: block.hash(),
        });
        Ok(())
    }

    pub async fn get_exec_merkle_root(&self, height: Height) -> ChainStoreResult<Option<StateRoot>> {
        if let Some(root) = self.get_pending(height, |p| p.execute_result.state_root) {
            return Ok(Some(root));
        }
        self.ledger
            .get_state_merkle_root(height)
            .await
            .context(LedgerSnafu { height })
    }

    pub async fn get_cross_states_root(&self, height: Height) -> ChainStoreResult<Option<StateRoot>> {
        if let Some(root) = self.get_pending(height, |p| p.execute_result.cross_states_root) {
            return Ok(Some(root));
        }
        self.ledger
            .get_cross_states_root(height)
            .await
            .context(LedgerSnafu { height })
    }

    /// Write set of a block still in the pipeline
    ///
    /// `None` once the block was evicted, as the ledger doesn't keep them.
    pub fn get_exec_write_set(&self, height: Height) -> Option<WriteSet> {
        self.get_pending(height, |p| p.execute_result.write_set.clone())
    }

    pub async fn get_block(&self, height: Height) -> ChainStoreResult<Option<Block>> {
        if let Some(block) = self.get_pending(height, |p| p.block.clone()) {
            return Ok(Some(block));
        }
        Self::load_block_from_ledger(self.ledger.as_ref(), height).await
    }

    /// Catch up with a ledger that moved ahead of the pipeline
    ///
    /// Returns `true` if the pipeline was re-anchored.
    #[instrument(skip_all)]
    pub async fn reload_from_ledger(&self) -> ChainStoreResult<bool> {
        let _guard = self.write_lock.lock().await;

        let ledger_height = self.ledger.get_current_block_height();
        let chained = self.chained_block_num();
        if ledger_height <= chained {
            return Ok(false);
        }

        let anchor = Self::load_from_ledger(self.ledger.as_ref(), ledger_height).await?;

        {
            let mut pending = self.pending_blocks.lock().expect("Locking failed");
            pending.retain(|h, _| ledger_height < *h);
            pending.insert(ledger_height, anchor);
        }
        self.chained_block_num
            .store(ledger_height.to_number(), Ordering::SeqCst);

        info!(target: LOG_TARGET, %chained, %ledger_height, "Reloaded chain store from ledger");
        Ok(true)
    }
}

#[cfg(test)]
mod tests;
