//! Recently sealed blocks, on top of [`ChainStore`]
//!
//! Keeps the commit signatures that sealed each block, so lagging peers can
//! be served a [`SealedBlock`] they can verify on their own.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::trace;
use vbft_consensus_core::block::Block;
use vbft_consensus_core::exec::StateRoot;
use vbft_consensus_core::height::Height;
use vbft_consensus_core::msg::SealedBlock;

use crate::chain_store::{ChainStore, ChainStoreResult};

const LOG_TARGET: &str = "vbft::consensus::block-pool";

pub struct BlockPool {
    chain_store: Arc<ChainStore>,
    capacity: usize,
    sealed: Mutex<BTreeMap<Height, SealedBlock>>,
}

impl BlockPool {
    pub fn new(chain_store: Arc<ChainStore>, capacity: usize) -> Self {
        Self {
            chain_store,
            capacity,
            sealed: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn chain_store(&self) -> &Arc<ChainStore> {
        &self.chain_store
    }

    /// Cache a sealed block and hand it to the [`ChainStore`]
    ///
    /// The block stays cached even if the chain store fails to take it, so
    /// it can be re-applied later.
    pub async fn add_sealed_block(&self, sealed: SealedBlock) -> ChainStoreResult<()> {
        let block = sealed.block.clone();
        self.sealed
            .lock()
            .expect("Locking failed")
            .insert(sealed.height(), sealed);

        self.chain_store.add_block(block).await?;
        self.evict();
        Ok(())
    }

    fn evict(&self) {
        let chained = self.chain_store.chained_block_num();
        let Some(floor) = chained
            .to_number()
            .checked_sub(u64::try_from(self.capacity).unwrap_or(u64::MAX))
        else {
            return;
        };

        let mut sealed = self.sealed.lock().expect("Locking failed");
        let kept = sealed.split_off(&Height::from(floor));
        let evicted = std::mem::replace(&mut *sealed, kept);
        if !evicted.is_empty() {
            trace!(target: LOG_TARGET, %floor, num = evicted.len(), "Evicted sealed blocks");
        }
    }

    /// A cached sealed block, `None` if it is outside of the window
    pub fn get_sealed_block(&self, height: Height) -> Option<SealedBlock> {
        self.sealed
            .lock()
            .expect("Locking failed")
            .get(&height)
            .cloned()
    }

    pub async fn get_block(&self, height: Height) -> ChainStoreResult<Option<Block>> {
        self.chain_store.get_block(height).await
    }

    pub async fn submit_block(&self, height: Height) -> ChainStoreResult<()> {
        self.chain_store.submit_block(height).await
    }

    pub async fn get_exec_merkle_root(&self, height: Height) -> ChainStoreResult<Option<StateRoot>> {
        self.chain_store.get_exec_merkle_root(height).await
    }

    pub async fn get_cross_states_root(
        &self,
        height: Height,
    ) -> ChainStoreResult<Option<StateRoot>> {
        self.chain_store.get_cross_states_root(height).await
    }
}
