use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vbft_consensus_core::block::{Block, BlockHeader, ChainBlock, CrossChainMsg, TransactionRaw};
use vbft_consensus_core::chain_config::ChainConfig;
use vbft_consensus_core::exec::{ExecuteResult, StateRoot};
use vbft_consensus_core::height::{Height, View};
use vbft_consensus_core::msg::{ConsensusMessage, MsgKind};
use vbft_consensus_core::peer::{PeerIdx, PeerPubkey, PeerSeckey};
use vbft_consensus_core::peer_set::PeerSet;
use vbft_consensus_core::timestamp::Timestamp;
use vbft_consensus_core::vrf::compute_vrf;
use vbft_db::Database;
use vbft_ledger::{Ledger, LedgerError, LedgerResult, RedbLedger};
use vbft_util_error::BoxedErrorResult;

use crate::network::{Network, TxPool};

/// Committee of `n` peers, secret keys ordered by their [`PeerIdx`]
pub(crate) fn committee(n: usize) -> (Vec<PeerSeckey>, ChainConfig) {
    let mut seckeys: Vec<_> = (0..n).map(|_| PeerSeckey::generate()).collect();
    seckeys.sort_unstable_by_key(|k| k.pubkey());

    let config = ChainConfig::new(PeerSet::from(
        seckeys.iter().map(|k| k.pubkey()).collect::<Vec<_>>(),
    ));
    (seckeys, config)
}

pub(crate) async fn in_memory_ledger(config: &ChainConfig) -> BoxedErrorResult<Arc<RedbLedger>> {
    Ok(Arc::new(
        RedbLedger::init(
            Database::new_in_memory().await?,
            &ChainBlock::genesis(config),
        )
        .await?,
    ))
}

pub(crate) struct BlockSpec<'a> {
    pub prev: &'a BlockHeader,
    pub proposer: (PeerIdx, PeerSeckey),
    pub view: View,
    pub prev_exec_merkle_root: StateRoot,
    pub cross_chain_msg: Option<CrossChainMsg>,
    pub txs: Vec<TransactionRaw>,
}

pub(crate) fn build_block(args: BlockSpec<'_>) -> Block {
    let (proposer, seckey) = args.proposer;
    let height = args.prev.height.next_expect();
    let header = BlockHeader::builder()
        .prev(args.prev)
        .view(args.view)
        .proposer(proposer)
        .timestamp(Timestamp::now())
        .prev_exec_merkle_root(args.prev_exec_merkle_root)
        .chain_config_hash(args.prev.chain_config_hash)
        .vrf(compute_vrf(seckey, height, args.prev.vrf_value))
        .transactions(&args.txs)
        .build();
    Block {
        chain_block: ChainBlock {
            header,
            transactions: args.txs,
        },
        cross_chain_msg: args.cross_chain_msg,
    }
}

/// [`Network`] keeping everything sent, `None` destination for broadcasts
#[derive(Default)]
pub(crate) struct RecordingNetwork {
    sent: Mutex<Vec<(Option<PeerPubkey>, ConsensusMessage)>>,
}

impl RecordingNetwork {
    pub(crate) fn take(&self) -> Vec<(Option<PeerPubkey>, ConsensusMessage)> {
        std::mem::take(&mut *self.sent.lock().expect("Locking failed"))
    }

    pub(crate) fn take_kinds(&self) -> Vec<(Option<PeerPubkey>, MsgKind)> {
        self.take()
            .into_iter()
            .map(|(to, msg)| (to, msg.kind()))
            .collect()
    }
}

impl Network for RecordingNetwork {
    fn send(&self, to: PeerPubkey, msg: ConsensusMessage) {
        self.sent
            .lock()
            .expect("Locking failed")
            .push((Some(to), msg));
    }

    fn broadcast(&self, msg: ConsensusMessage) {
        self.sent.lock().expect("Locking failed").push((None, msg));
    }
}

pub(crate) struct NoTxs;

impl TxPool for NoTxs {
    fn get_pending_txs(&self, _max: usize) -> Vec<TransactionRaw> {
        vec![]
    }
}

/// Ledger failing on demand
///
/// Submissions fail while `fail_submit` is set, and the next `fail_reads`
/// block lookups fail.
pub(crate) struct FlakyLedger {
    inner: Arc<RedbLedger>,
    pub(crate) fail_submit: AtomicBool,
    pub(crate) fail_reads: AtomicUsize,
}

impl FlakyLedger {
    pub(crate) fn new(inner: Arc<RedbLedger>) -> Self {
        Self {
            inner,
            fail_submit: AtomicBool::new(false),
            fail_reads: AtomicUsize::new(0),
        }
    }

    fn disk_on_fire() -> LedgerError {
        LedgerError::Other {
            source: "disk on fire".into(),
        }
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    fn get_current_block_height(&self) -> Height {
        self.inner.get_current_block_height()
    }

    async fn get_block_by_height(&self, height: Height) -> LedgerResult<Option<ChainBlock>> {
        if self
            .fail_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Self::disk_on_fire());
        }
        self.inner.get_block_by_height(height).await
    }

    async fn get_state_merkle_root(&self, height: Height) -> LedgerResult<Option<StateRoot>> {
        self.inner.get_state_merkle_root(height).await
    }

    async fn get_cross_states_root(&self, height: Height) -> LedgerResult<Option<StateRoot>> {
        self.inner.get_cross_states_root(height).await
    }

    async fn get_cross_chain_msg(&self, height: Height) -> LedgerResult<Option<CrossChainMsg>> {
        self.inner.get_cross_chain_msg(height).await
    }

    async fn execute_block(&self, block: &ChainBlock) -> LedgerResult<ExecuteResult> {
        self.inner.execute_block(block).await
    }

    async fn submit_block(
        &self,
        block: &ChainBlock,
        cross_chain_msg: Option<&CrossChainMsg>,
        result: &ExecuteResult,
    ) -> LedgerResult<()> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(Self::disk_on_fire());
        }
        self.inner.submit_block(block, cross_chain_msg, result).await
    }
}
