use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use n0_future::task::AbortOnDropHandle;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use vbft_consensus::chain_store::ChainEvent;
use vbft_consensus::network::TxPool;
use vbft_consensus_core::block::{TransactionHash, TransactionRaw};

const LOG_TARGET: &str = "vbft::node::tx-pool";

#[derive(Default)]
struct Inner {
    queue: VecDeque<TransactionRaw>,
    hashes: BTreeSet<TransactionHash>,
}

/// FIFO pool of transactions waiting to be included in a block
///
/// Transactions stay in the pool until a block containing them reaches
/// consensus, see [`MemTxPool::spawn_pruning`].
#[derive(Default)]
pub struct MemTxPool {
    inner: Mutex<Inner>,
}

impl MemTxPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tx`, returns `false` if it was already pending
    pub fn submit(&self, tx: TransactionRaw) -> bool {
        let mut inner = self.inner.lock().expect("Locking failed");
        if !inner.hashes.insert(tx.hash()) {
            return false;
        }
        inner.queue.push_back(tx);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("Locking failed").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop transactions that made it into a block
    pub fn prune(&self, included: &[TransactionHash]) {
        let included: BTreeSet<_> = included.iter().copied().collect();
        let mut inner = self.inner.lock().expect("Locking failed");
        let Inner { queue, hashes } = &mut *inner;
        queue.retain(|tx| {
            let hash = tx.hash();
            if included.contains(&hash) {
                hashes.remove(&hash);
                false
            } else {
                true
            }
        });
    }

    /// Keep pruning the pool as blocks reach consensus
    pub fn spawn_pruning(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<ChainEvent>,
    ) -> AbortOnDropHandle<()> {
        let pool = self.clone();
        AbortOnDropHandle::new(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChainEvent::BlockConsensusComplete {
                        height, tx_hashes, ..
                    }) => {
                        trace!(target: LOG_TARGET, %height, num_txs = tx_hashes.len(), "Pruning");
                        pool.prune(&tx_hashes);
                    }
                    Ok(ChainEvent::SaveBlockComplete { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: LOG_TARGET, %skipped, "Missed chain events, pool may keep included transactions");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(target: LOG_TARGET, "Chain events closed");
                        break;
                    }
                }
            }
        }))
    }
}

impl TxPool for MemTxPool {
    fn get_pending_txs(&self, max: usize) -> Vec<TransactionRaw> {
        self.inner
            .lock()
            .expect("Locking failed")
            .queue
            .iter()
            .take(max)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests;
