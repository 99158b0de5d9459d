//! A whole committee running in one process over [`LocalNetwork`]
use std::path::PathBuf;
use std::time::Duration;

use snafu::{OptionExt as _, ResultExt as _};
use tokio::task::JoinSet;
use tracing::{info, warn};
use vbft_consensus::config::ConsensusConfig;
use vbft_consensus_core::block::TransactionRaw;
use vbft_consensus_core::chain_config::ChainConfig;
use vbft_consensus_core::height::Height;
use vbft_consensus_core::peer::PeerSeckey;
use vbft_consensus_core::peer_set::PeerSet;
use vbft_node::{LocalNetwork, Node, NodeHandle};
use vbft_util_error::WhateverResult;

const LOG_TARGET: &str = "vbft::devnet";

#[derive(bon::Builder)]
pub(crate) struct Devnet {
    num_nodes: usize,
    blocks: u64,
    block_interval: Duration,
    txs_per_interval: usize,
    data_dir: Option<PathBuf>,
}

impl Devnet {
    pub(crate) async fn run(self) -> WhateverResult<()> {
        snafu::ensure_whatever!(0 < self.num_nodes, "Devnet needs at least one node");

        let seckeys: Vec<_> = (0..self.num_nodes)
            .map(|_| PeerSeckey::generate())
            .collect();
        let chain_config = ChainConfig::new(PeerSet::from(
            seckeys.iter().map(|seckey| seckey.pubkey()).collect::<Vec<_>>(),
        ));
        let consensus_config = ConsensusConfig::builder()
            .block_interval(self.block_interval)
            .build();
        let network = LocalNetwork::new();

        info!(
            target: LOG_TARGET,
            num_nodes = self.num_nodes,
            chain = %chain_config.hash(),
            "Starting devnet"
        );

        let mut node_tasks = JoinSet::new();
        let mut handles = vec![];
        for (i, seckey) in seckeys.iter().enumerate() {
            let node = Node::builder()
                .seckey(*seckey)
                .chain_config(chain_config.clone())
                .network(&network)
                .consensus_config(consensus_config.clone())
                .maybe_db_path(
                    self.data_dir
                        .as_ref()
                        .map(|dir| dir.join(format!("node-{i}.redb"))),
                )
                .build()
                .await
                .whatever_context("Failed to start node")?;
            handles.push(node.handle());
            node_tasks.spawn(node.run());
        }

        let feeder = n0_future::task::AbortOnDropHandle::new(tokio::spawn(Self::feed_txs(
            handles.clone(),
            self.block_interval,
            self.txs_per_interval,
        )));

        let target = Height::from(self.blocks);
        let all_committed = async {
            for handle in &handles {
                handle.wait_committed(target).await;
            }
        };

        tokio::select! {
            () = all_committed => {}
            res = node_tasks.join_next() => {
                let res = res.whatever_context("No nodes running")?;
                match res {
                    Ok(Ok(())) => snafu::whatever!("Node stopped unexpectedly"),
                    Ok(Err(err)) => {
                        return Err(err).whatever_context("Node failed");
                    }
                    Err(err) => {
                        return Err(err).whatever_context("Node task panicked");
                    }
                }
            }
        }
        drop(feeder);

        let first = handles.first().whatever_context("No nodes")?;
        let mut height = Height::from(1u64);
        while height <= target {
            let block = first
                .get_block(height)
                .await
                .whatever_context("Failed to read block")?
                .whatever_context("Missing sealed block")?;
            println!(
                "{height} {} view={} proposer={} txs={}",
                block.hash(),
                block.header().view,
                block.header().proposer,
                block.transactions().len()
            );
            height = height.next_expect();
        }

        info!(target: LOG_TARGET, blocks = self.blocks, "Devnet done");
        node_tasks.abort_all();
        Ok(())
    }

    async fn feed_txs(handles: Vec<NodeHandle>, interval: Duration, per_interval: usize) {
        let mut n = 0usize;
        loop {
            for _ in 0..per_interval {
                let tx = TransactionRaw::from(format!("devnet-tx-{n}").into_bytes());
                let handle = &handles[n % handles.len()];
                if !handle.submit_tx(tx) {
                    warn!(target: LOG_TARGET, %n, "Duplicate transaction");
                }
                n += 1;
            }
            tokio::time::sleep(interval).await;
        }
    }
}
