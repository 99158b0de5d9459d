// SPDX-License-Identifier: MIT

//! VBFT Node
//!
//! Wires a [`vbft_consensus::server::Server`] for a single committee member
//! with a ledger backed by a redb database, an in-memory transaction pool
//! and a network transport.
mod local_network;
mod tx_pool;

use std::path::PathBuf;
use std::sync::Arc;

use n0_future::task::AbortOnDropHandle;
use snafu::{ResultExt as _, Snafu};
use tokio::sync::broadcast;
use tracing::{info, warn};
use vbft_consensus::chain_store::{ChainEvent, ChainStoreResult};
use vbft_consensus::config::ConsensusConfig;
use vbft_consensus::server::{ConsensusError, ConsensusHandle, ConsensusStatus, Server};
use vbft_consensus_core::block::{Block, ChainBlock, TransactionRaw};
use vbft_consensus_core::chain_config::ChainConfig;
use vbft_consensus_core::height::Height;
use vbft_consensus_core::peer::{PeerPubkey, PeerSeckey};
use vbft_db::Database;
use vbft_db::error::DbError;
use vbft_ledger::{LedgerError, RedbLedger};

pub use crate::local_network::{LocalEndpoint, LocalNetwork};
pub use crate::tx_pool::MemTxPool;

const LOG_TARGET: &str = "vbft::node";

/// Capacity of the chain events channel
const CHAIN_EVENTS_CAPACITY: usize = 1024;

#[derive(Debug, Snafu)]
pub enum NodeInitError {
    Db { source: DbError },
    Ledger { source: LedgerError },
    #[snafu(transparent)]
    Consensus { source: ConsensusError },
}

pub type NodeInitResult<T> = Result<T, NodeInitError>;

pub struct Node {
    pubkey: PeerPubkey,
    server: Server,
    handle: NodeHandle,
    pruning_task: AbortOnDropHandle<()>,
}

/// Cloneable access to a [`Node`], usable while it runs
#[derive(Clone)]
pub struct NodeHandle {
    consensus: ConsensusHandle,
    tx_pool: Arc<MemTxPool>,
    chain_events: broadcast::Sender<ChainEvent>,
}

#[bon::bon]
impl Node {
    /// Open (or create) the ledger and set up consensus
    ///
    /// The node is connected to the `network` right away, so messages
    /// received before [`Node::run`] are queued.
    #[builder]
    pub async fn new(
        seckey: PeerSeckey,
        chain_config: ChainConfig,
        network: &LocalNetwork,
        db_path: Option<PathBuf>,
        #[builder(default)] consensus_config: ConsensusConfig,
    ) -> NodeInitResult<Self> {
        let db = if let Some(db_path) = db_path {
            info!(target: LOG_TARGET, path = %db_path.display(), "Opening redb database");
            Database::open(db_path).await.context(DbSnafu)?
        } else {
            warn!(target: LOG_TARGET, "Using ephemeral in-memory database");
            Database::new_in_memory().await.context(DbSnafu)?
        };
        let ledger = Arc::new(
            RedbLedger::init(db, &ChainBlock::genesis(&chain_config))
                .await
                .context(LedgerSnafu)?,
        );

        let pubkey = seckey.pubkey();
        let tx_pool = Arc::new(MemTxPool::new());
        let (chain_events, chain_events_rx) = broadcast::channel(CHAIN_EVENTS_CAPACITY);
        let pruning_task = tx_pool.spawn_pruning(chain_events_rx);

        let server = Server::builder()
            .ledger(ledger)
            .network(Arc::new(network.endpoint(pubkey)))
            .tx_pool(tx_pool.clone())
            .seckey(seckey)
            .chain_config(chain_config)
            .config(consensus_config)
            .notify(chain_events.clone())
            .build()
            .await?;

        let consensus = server.handle();
        network.connect(pubkey, consensus.clone());

        Ok(Self {
            pubkey,
            server,
            handle: NodeHandle {
                consensus,
                tx_pool,
                chain_events,
            },
            pruning_task,
        })
    }
}

impl Node {
    pub fn pubkey(&self) -> PeerPubkey {
        self.pubkey
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Run consensus until a fatal error
    pub async fn run(self) -> Result<(), ConsensusError> {
        let Self {
            pubkey,
            server,
            pruning_task,
            ..
        } = self;
        let _pruning_task = pruning_task;

        info!(target: LOG_TARGET, pubkey = %pubkey.to_short(), "Running node");
        server.run().await
    }
}

impl NodeHandle {
    pub fn status(&self) -> ConsensusStatus {
        self.consensus.status()
    }

    pub fn consensus(&self) -> &ConsensusHandle {
        &self.consensus
    }

    pub fn tx_pool(&self) -> &Arc<MemTxPool> {
        &self.tx_pool
    }

    pub fn submit_tx(&self, tx: TransactionRaw) -> bool {
        self.tx_pool.submit(tx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.chain_events.subscribe()
    }

    /// Last block handed to the chain store
    pub fn committed_height(&self) -> Height {
        self.consensus.chain_store().chained_block_num()
    }

    pub async fn get_block(&self, height: Height) -> ChainStoreResult<Option<Block>> {
        self.consensus.chain_store().get_block(height).await
    }

    /// Wait until a block at `height` reaches consensus
    pub async fn wait_committed(&self, height: Height) {
        let mut events = self.subscribe();
        while self.committed_height() < height {
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}
