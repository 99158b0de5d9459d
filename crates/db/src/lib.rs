// SPDX-License-Identifier: MIT

//! A thin wrapper over a [`redb_bincode::Database`]
//!
//! Adds commit hooks (see [`ctx::WriteTransactionCtx::on_commit`]) and
//! runs the (blocking) transactions with [`tokio::task::block_in_place`],
//! so it has to be used from a multi-threaded tokio runtime.

pub mod ctx;
pub mod error;

use std::path::PathBuf;
use std::sync::Arc;

use ctx::WriteTransactionCtx;
use error::{
    CommitSnafu, DatabaseSnafu, DbResult, DbTxResult, InvalidPathSnafu, JoinSnafu,
    TransactionSnafu,
};
use redb_bincode::ReadTransaction;
use snafu::{OptionExt as _, ResultExt as _};
use tracing::{debug, instrument, warn};
use vbft_util_error::fmt::FmtCompact as _;

const LOG_TARGET: &str = "vbft::db";

#[derive(Debug)]
pub struct Database {
    inner: redb_bincode::Database,
    commit_hook_order_lock: Arc<std::sync::Mutex<()>>,
}

impl Database {
    pub async fn new_in_memory() -> DbResult<Database> {
        debug!(target: LOG_TARGET, "Opening in-memory database");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Ok(Self::open_inner(inner))
    }

    pub async fn open(path: impl Into<PathBuf>) -> DbResult<Database> {
        let path = path.into();
        tokio::fs::create_dir_all(path.parent().context(InvalidPathSnafu)?).await?;
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database…");

        let inner = tokio::task::spawn_blocking(move || {
            let mut db = redb::Database::create(path)?;
            let _ = db.compact().inspect_err(|err| {
                warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Failed to compact database");
            });
            Ok(db)
        })
        .await
        .context(JoinSnafu)?
        .context(DatabaseSnafu)?;

        Ok(Self::open_inner(inner))
    }

    #[instrument(skip_all)]
    fn open_inner(inner: redb::Database) -> Database {
        Self {
            inner: redb_bincode::Database::from(inner),
            commit_hook_order_lock: Arc::new(std::sync::Mutex::new(())),
        }
    }

    /// Do a read-only transaction that can also fail with a logical error `E`
    pub async fn read_with_falliable<T, E>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbTxResult<T, E>,
    ) -> DbTxResult<T, E>
    where
        E: snafu::Error + 'static,
    {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(TransactionSnafu)?;
            f(&dbtx)
        })
    }

    /// Do a writeable transaction that can also fail with a logical error `E`
    ///
    /// Nothing is committed (and no commit hooks run) if `f` fails.
    pub async fn write_with_falliable<T, E>(
        &self,
        f: impl FnOnce(&'_ WriteTransactionCtx) -> DbTxResult<T, E>,
    ) -> DbTxResult<T, E>
    where
        E: snafu::Error + 'static,
    {
        tokio::task::block_in_place(|| {
            let dbtx = WriteTransactionCtx::new(
                self.inner.begin_write().context(TransactionSnafu)?,
                self.commit_hook_order_lock.clone(),
            );
            let res = f(&dbtx)?;
            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransactionCtx) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = WriteTransactionCtx::new(
                self.inner.begin_write().context(TransactionSnafu)?,
                self.commit_hook_order_lock.clone(),
            );
            let res = f(&dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(TransactionSnafu)?;

            f(&dbtx)
        })
    }
}

#[cfg(test)]
mod tests;
