use std::time::Duration;

use tokio::sync::broadcast;
use vbft_consensus::chain_store::ChainEvent;
use vbft_consensus::network::TxPool as _;
use vbft_consensus_core::block::{BlockHash, TransactionRaw};
use vbft_consensus_core::height::Height;
use vbft_util_error::BoxedErrorResult;

use super::MemTxPool;

fn tx(bytes: &[u8]) -> TransactionRaw {
    TransactionRaw::from(bytes)
}

#[test]
fn keeps_insertion_order_and_skips_duplicates() {
    let pool = MemTxPool::new();

    assert!(pool.submit(tx(b"a")));
    assert!(pool.submit(tx(b"b")));
    assert!(!pool.submit(tx(b"a")));
    assert!(pool.submit(tx(b"c")));

    assert_eq!(pool.len(), 3);
    assert_eq!(pool.get_pending_txs(2), vec![tx(b"a"), tx(b"b")]);
    assert_eq!(pool.get_pending_txs(10).len(), 3);

    pool.prune(&[tx(b"b").hash()]);
    assert_eq!(pool.get_pending_txs(10), vec![tx(b"a"), tx(b"c")]);

    // Pruned transaction can be submitted again
    assert!(pool.submit(tx(b"b")));
    assert_eq!(pool.len(), 3);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn prunes_on_consensus_complete() -> BoxedErrorResult<()> {
    let pool = std::sync::Arc::new(MemTxPool::new());
    let (events_tx, events_rx) = broadcast::channel(16);
    let _task = pool.spawn_pruning(events_rx);

    pool.submit(tx(b"a"));
    pool.submit(tx(b"b"));

    events_tx.send(ChainEvent::SaveBlockComplete {
        height: Height::from(1u64),
        block_hash: BlockHash::ZERO,
    })?;
    events_tx.send(ChainEvent::BlockConsensusComplete {
        height: Height::from(2u64),
        block_hash: BlockHash::ZERO,
        tx_hashes: vec![tx(b"a").hash()],
    })?;

    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.len() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(pool.get_pending_txs(10), vec![tx(b"b")]);

    Ok(())
}
