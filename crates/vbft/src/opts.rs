use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "VBFT consensus node")]
pub(crate) struct Opts {
    #[arg(long, env = "VBFT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Run a whole committee in this process until it seals some blocks
    Devnet {
        /// Committee size
        #[arg(long, env = "VBFT_NODES", default_value = "4")]
        nodes: usize,

        /// Number of blocks to seal before exiting
        #[arg(long, env = "VBFT_BLOCKS", default_value = "10")]
        blocks: u64,

        #[arg(long, env = "VBFT_BLOCK_INTERVAL_MS", default_value = "200")]
        block_interval_ms: u64,

        /// Transactions submitted per block interval
        #[arg(long, env = "VBFT_TXS_PER_INTERVAL", default_value = "3")]
        txs_per_interval: usize,
    },
}
