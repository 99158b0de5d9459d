use std::io;

use snafu::FromString as _;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use vbft_util_error::{Whatever, WhateverResult};

pub fn init_logging() -> WhateverResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| Whatever::without_source("Failed to initialize logging".to_string()))?;

    Ok(())
}
