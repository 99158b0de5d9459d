use std::sync::Arc;
use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use tokio::sync::broadcast;
use vbft_consensus_core::block::{Block, CrossChainMsg, TransactionRaw};
use vbft_consensus_core::exec::StateRoot;
use vbft_consensus_core::height::{Height, View};
use vbft_consensus_core::peer::{PeerIdx, PeerSeckey};
use vbft_ledger::Ledger as _;
use vbft_util_error::BoxedErrorResult;

use super::{ChainEvent, ChainStore, ChainStoreError};
use crate::test_utils::{BlockSpec, FlakyLedger, build_block, committee, in_memory_ledger};

/// Extend the chained block of `store` with a block holding `txs`
async fn next_block(store: &ChainStore, txs: &[&[u8]]) -> BoxedErrorResult<Block> {
    let chained = store.chained_block_num();
    let prev = store.get_block(chained).await?.expect("chained block");
    let prev_exec_merkle_root = store
        .get_exec_merkle_root(chained)
        .await?
        .expect("chained root");
    let cross_root = store
        .get_cross_states_root(chained)
        .await?
        .unwrap_or_default();

    Ok(build_block(BlockSpec {
        prev: prev.header(),
        proposer: (PeerIdx::ZERO, PeerSeckey::generate()),
        view: View::ZERO,
        prev_exec_merkle_root,
        cross_chain_msg: CrossChainMsg::expected(chained.next_expect(), cross_root),
        txs: txs.iter().map(|tx| TransactionRaw::from(*tx)).collect(),
    }))
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn pipeline_keeps_one_block_unsubmitted() -> BoxedErrorResult<()> {
    let (_, config) = committee(4);
    let ledger = in_memory_ledger(&config).await?;
    let (notify_tx, mut notify_rx) = broadcast::channel(64);
    let store = ChainStore::open(ledger.clone(), Some(notify_tx)).await?;

    assert_eq!(store.pending_heights(), vec![(Height::ZERO, true)]);

    for h in 1u64..=5 {
        let block = next_block(&store, &[format!("tx{h}").as_bytes()]).await?;
        store.add_block(block).await?;

        let h = Height::from(h);
        assert_eq!(store.chained_block_num(), h);
        assert_eq!(ledger.get_current_block_height(), h.saturating_sub(1));

        let pending = store.pending_heights();
        assert!(pending.len() <= 2);
        assert_eq!(pending.last(), Some(&(h, false)));
        assert!(pending.iter().filter(|(ph, _)| *ph < h).all(|(_, s)| *s));
    }

    assert_eq!(
        store.pending_heights(),
        vec![(Height::from(4), true), (Height::from(5), false)]
    );

    let mut consensus_complete = vec![];
    while let Ok(event) = notify_rx.try_recv() {
        if let ChainEvent::BlockConsensusComplete { height, .. } = event {
            consensus_complete.push(height.to_number());
        }
    }
    assert_eq!(consensus_complete, vec![1, 2, 3, 4, 5]);

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn submit_is_idempotent() -> BoxedErrorResult<()> {
    let (_, config) = committee(4);
    let ledger = in_memory_ledger(&config).await?;
    let store = ChainStore::open(ledger.clone(), None).await?;

    for _ in 0..2 {
        let block = next_block(&store, &[b"a"]).await?;
        store.add_block(block).await?;
    }
    let write_set = store.get_exec_write_set(Height::from(2));
    assert!(write_set.is_some());

    store.submit_block(Height::from(2)).await?;
    store.submit_block(Height::from(2)).await?;
    store.submit_block(Height::from(7)).await?;
    store.submit_block(Height::ZERO).await?;

    assert_eq!(ledger.get_current_block_height(), Height::from(2));
    assert_eq!(store.pending_heights(), vec![(Height::from(2), true)]);
    assert_eq!(store.get_exec_write_set(Height::from(1)), None);

    // Evicted blocks are still served from the ledger
    assert!(store.get_block(Height::from(1)).await?.is_some());
    assert_eq!(
        store.get_exec_merkle_root(Height::from(1)).await?,
        ledger.get_state_merkle_root(Height::from(1)).await?
    );

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn stale_blocks_are_ignored_and_broken_ones_are_fatal() -> BoxedErrorResult<()> {
    let (_, config) = committee(4);
    let ledger = in_memory_ledger(&config).await?;
    let store = ChainStore::open(ledger, None).await?;

    let b1 = next_block(&store, &[]).await?;
    store.add_block(b1.clone()).await?;
    let b2 = next_block(&store, &[]).await?;
    store.add_block(b2.clone()).await?;

    // Re-adding is fine
    store.add_block(b1.clone()).await?;
    assert_eq!(store.chained_block_num(), Height::from(2));

    let b3 = next_block(&store, &[]).await?;
    let b4 = build_block(BlockSpec {
        prev: b3.header(),
        proposer: (PeerIdx::ZERO, PeerSeckey::generate()),
        view: View::ZERO,
        prev_exec_merkle_root: StateRoot::ZERO,
        cross_chain_msg: None,
        txs: vec![],
    });
    let err = store.add_block(b4).await.expect_err("gap");
    assert_matches!(err, ChainStoreError::HeightGap { .. });
    assert!(err.is_fatal());

    // A sibling of `b2`, not extending it
    let fork = build_block(BlockSpec {
        prev: b1.header(),
        proposer: (PeerIdx::ZERO, PeerSeckey::generate()),
        view: View::from(1),
        prev_exec_merkle_root: StateRoot::ZERO,
        cross_chain_msg: None,
        txs: vec![b"y".as_slice().into()],
    });
    let fork_child = build_block(BlockSpec {
        prev: fork.header(),
        proposer: (PeerIdx::ZERO, PeerSeckey::generate()),
        view: View::ZERO,
        prev_exec_merkle_root: StateRoot::ZERO,
        cross_chain_msg: None,
        txs: vec![],
    });
    let err = store.add_block(fork_child).await.expect_err("fork");
    assert_matches!(err, ChainStoreError::DoesNotExtend { .. });
    assert!(err.is_fatal());

    assert_eq!(store.chained_block_num(), Height::from(2));
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn submit_failure_is_transient() -> BoxedErrorResult<()> {
    let (_, config) = committee(4);
    let ledger = Arc::new(FlakyLedger::new(in_memory_ledger(&config).await?));
    let store = ChainStore::open(ledger.clone(), None).await?;

    let b1 = next_block(&store, &[]).await?;
    store.add_block(b1).await?;
    let b2 = next_block(&store, &[]).await?;

    ledger.fail_submit.store(true, Ordering::SeqCst);
    let err = store.add_block(b2.clone()).await.expect_err("ledger down");
    assert_matches!(err, ChainStoreError::Submit { .. });
    assert!(!err.is_fatal());
    assert_eq!(store.chained_block_num(), Height::from(1));
    assert_eq!(store.pending_heights(), vec![(Height::ZERO, true), (Height::from(1), false)]);

    ledger.fail_submit.store(false, Ordering::SeqCst);
    store.add_block(b2).await?;
    assert_eq!(store.chained_block_num(), Height::from(2));
    assert_eq!(ledger.get_current_block_height(), Height::from(1));

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn reload_follows_ledger_ahead() -> BoxedErrorResult<()> {
    let (_, config) = committee(4);
    let ledger = in_memory_ledger(&config).await?;
    let store = ChainStore::open(ledger.clone(), None).await?;
    let other = ChainStore::open(ledger.clone(), None).await?;

    for _ in 0..3 {
        let block = next_block(&other, &[]).await?;
        other.add_block(block).await?;
    }
    assert_eq!(ledger.get_current_block_height(), Height::from(2));

    assert!(store.reload_from_ledger().await?);
    assert_eq!(store.chained_block_num(), Height::from(2));
    assert_eq!(store.pending_heights(), vec![(Height::from(2), true)]);
    assert!(!store.reload_from_ledger().await?);

    Ok(())
}
