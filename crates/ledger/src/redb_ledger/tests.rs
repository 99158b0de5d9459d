use assert_matches::assert_matches;
use vbft_consensus_core::block::{BlockHeader, ChainBlock, CrossChainMsg, TransactionRaw};
use vbft_consensus_core::chain_config::ChainConfig;
use vbft_consensus_core::exec::StateRoot;
use vbft_consensus_core::height::{Height, View};
use vbft_consensus_core::peer::{PeerIdx, PeerSeckey};
use vbft_consensus_core::peer_set::PeerSet;
use vbft_consensus_core::timestamp::Timestamp;
use vbft_consensus_core::vrf::compute_vrf;
use vbft_db::Database;
use vbft_util_error::BoxedErrorResult;

use super::RedbLedger;
use crate::{Ledger as _, LedgerError};

fn genesis() -> ChainBlock {
    let seckey = PeerSeckey::generate();
    ChainBlock::genesis(&ChainConfig::new(PeerSet::from(vec![seckey.pubkey()])))
}

fn next_block(prev: &ChainBlock, prev_exec: StateRoot, txs: &[&[u8]]) -> ChainBlock {
    let txs: Vec<TransactionRaw> = txs.iter().map(|tx| TransactionRaw::from(*tx)).collect();
    let header = BlockHeader::builder()
        .prev(&prev.header)
        .view(View::ZERO)
        .proposer(PeerIdx::ZERO)
        .timestamp(Timestamp::now())
        .prev_exec_merkle_root(prev_exec)
        .chain_config_hash(prev.header.chain_config_hash)
        .vrf(compute_vrf(
            PeerSeckey::generate(),
            prev.height().next_expect(),
            prev.header.vrf_value,
        ))
        .transactions(&txs)
        .build();
    ChainBlock {
        header,
        transactions: txs,
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn init_is_idempotent_for_same_genesis() -> BoxedErrorResult<()> {
    let genesis = genesis();
    let db = Database::new_in_memory().await?;

    assert_matches!(
        RedbLedger::open(db).await,
        Err(LedgerError::NotInitialized)
    );

    let db = Database::new_in_memory().await?;
    let ledger = RedbLedger::init(db, &genesis).await?;
    assert_eq!(ledger.get_current_block_height(), Height::ZERO);
    let RedbLedger { db, .. } = ledger;

    let ledger = RedbLedger::init(db, &genesis).await?;
    assert_eq!(
        ledger.get_block_by_height(Height::ZERO).await?,
        Some(genesis.clone())
    );
    let RedbLedger { db, .. } = ledger;

    assert_matches!(
        RedbLedger::init(db, &self::genesis()).await,
        Err(LedgerError::GenesisMismatch { .. })
    );
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn execute_then_submit_advances_tip() -> BoxedErrorResult<()> {
    let genesis = genesis();
    let ledger = RedbLedger::init(Database::new_in_memory().await?, &genesis).await?;

    let b1 = next_block(&genesis, StateRoot::ZERO, &[b"a", b"b"]);
    let r1 = ledger.execute_block(&b1).await?;
    assert_eq!(r1, ledger.execute_block(&b1).await?);
    assert_eq!(ledger.get_current_block_height(), Height::ZERO);
    assert_eq!(r1.write_set.len(), 3);
    assert!(r1.cross_states_root.is_zero());

    ledger.submit_block(&b1, None, &r1).await?;
    assert_eq!(ledger.get_current_block_height(), Height::from(1));
    assert_eq!(
        ledger.get_state_merkle_root(Height::from(1)).await?,
        Some(r1.state_root)
    );
    assert_eq!(
        ledger.get_state(b"height").await?,
        Some(Height::from(1).to_bytes().to_vec())
    );

    let b2 = next_block(&b1, r1.state_root, &[b"c"]);
    let r2 = ledger.execute_block(&b2).await?;
    assert_ne!(r2.state_root, r1.state_root);
    ledger.submit_block(&b2, None, &r2).await?;
    assert_eq!(ledger.get_current_block_height(), Height::from(2));
    assert_eq!(ledger.get_block_by_height(Height::from(2)).await?, Some(b2));

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn rejects_blocks_not_extending_tip() -> BoxedErrorResult<()> {
    let genesis = genesis();
    let ledger = RedbLedger::init(Database::new_in_memory().await?, &genesis).await?;

    let b1 = next_block(&genesis, StateRoot::ZERO, &[]);
    let b2 = next_block(&b1, StateRoot::ZERO, &[]);
    assert_matches!(
        ledger.execute_block(&b2).await,
        Err(LedgerError::HeightMismatch { .. })
    );

    let other_genesis = self::genesis();
    let forked = next_block(&other_genesis, StateRoot::ZERO, &[]);
    assert_matches!(
        ledger.execute_block(&forked).await,
        Err(LedgerError::PrevHashMismatch { .. })
    );

    let r1 = ledger.execute_block(&b1).await?;
    ledger.submit_block(&b1, None, &r1).await?;
    assert_matches!(
        ledger.submit_block(&b1, None, &r1).await,
        Err(LedgerError::HeightMismatch { .. })
    );
    assert_eq!(ledger.get_current_block_height(), Height::from(1));

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn cross_chain_transactions_produce_cross_root() -> BoxedErrorResult<()> {
    let genesis = genesis();
    let ledger = RedbLedger::init(Database::new_in_memory().await?, &genesis).await?;

    let b1 = next_block(&genesis, StateRoot::ZERO, &[b"xchain:transfer", b"local"]);
    let r1 = ledger.execute_block(&b1).await?;
    assert!(!r1.cross_states_root.is_zero());
    ledger.submit_block(&b1, None, &r1).await?;

    let msg = CrossChainMsg::expected(Height::from(2), r1.cross_states_root);
    assert!(msg.is_some());

    let b2 = next_block(&b1, r1.state_root, &[]);
    let r2 = ledger.execute_block(&b2).await?;
    ledger.submit_block(&b2, msg.as_ref(), &r2).await?;

    assert_eq!(ledger.get_cross_chain_msg(Height::from(2)).await?, msg);
    assert_eq!(
        ledger.get_cross_states_root(Height::from(1)).await?,
        Some(r1.cross_states_root)
    );
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn fresh_ledger_answers_all_queries() -> BoxedErrorResult<()> {
    let genesis = genesis();
    let ledger = RedbLedger::init(Database::new_in_memory().await?, &genesis).await?;

    assert_eq!(ledger.get_cross_chain_msg(Height::ZERO).await?, None);
    assert_eq!(ledger.get_state(b"height").await?, None);
    assert_eq!(
        ledger.get_cross_states_root(Height::ZERO).await?,
        Some(StateRoot::ZERO)
    );

    let RedbLedger { db, .. } = ledger;
    let ledger = RedbLedger::open(db).await?;
    assert_eq!(ledger.get_current_block_height(), Height::ZERO);
    assert_eq!(ledger.get_cross_chain_msg(Height::from(1)).await?, None);
    Ok(())
}
