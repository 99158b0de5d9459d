// SPDX-License-Identifier: MIT

//! VBFT command line
mod devnet;
mod logging;
mod opts;

use std::ffi::OsString;
use std::time::Duration;

use clap::Parser as _;
use opts::{Commands, Opts};
use snafu::ResultExt as _;
use vbft_util_error::WhateverResult;

pub struct Vbft;

#[bon::bon]
impl Vbft {
    #[builder(finish_fn = run, start_fn = builder)]
    pub async fn build(
        /// Command line to parse instead of the process arguments
        args: Option<Vec<OsString>>,
    ) -> WhateverResult<()> {
        logging::init_logging()?;

        let opts = match args {
            Some(args) => Opts::parse_from(args),
            None => Opts::parse(),
        };

        if let Some(data_dir) = opts.data_dir.as_ref() {
            tokio::fs::create_dir_all(data_dir)
                .await
                .whatever_context("Failed to create/open data dir")?;
        }

        match opts.command {
            Commands::Devnet {
                nodes,
                blocks,
                block_interval_ms,
                txs_per_interval,
            } => {
                devnet::Devnet::builder()
                    .num_nodes(nodes)
                    .blocks(blocks)
                    .block_interval(Duration::from_millis(block_interval_ms))
                    .txs_per_interval(txs_per_interval)
                    .maybe_data_dir(opts.data_dir)
                    .build()
                    .run()
                    .await
            }
        }
    }
}
