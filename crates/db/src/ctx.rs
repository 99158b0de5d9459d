use std::sync::Arc;
use std::{ops, result};

use redb_bincode::WriteTransaction;

/// A write transaction that can run hooks once it is durably committed
pub struct WriteTransactionCtx {
    commit_hook_order_lock: Arc<std::sync::Mutex<()>>,
    dbtx: WriteTransaction,
    on_commit: std::sync::Mutex<Vec<Box<dyn FnOnce() + 'static>>>,
}

impl WriteTransactionCtx {
    pub fn new(dbtx: WriteTransaction, commit_hook_order_lock: Arc<std::sync::Mutex<()>>) -> Self {
        Self {
            dbtx,
            on_commit: std::sync::Mutex::new(vec![]),
            commit_hook_order_lock,
        }
    }
}

impl ops::Deref for WriteTransactionCtx {
    type Target = WriteTransaction;

    fn deref(&self) -> &Self::Target {
        &self.dbtx
    }
}

impl WriteTransactionCtx {
    /// Run `f` after the transaction commits; dropped if it doesn't
    pub fn on_commit(&self, f: impl FnOnce() + 'static) {
        self.on_commit
            .lock()
            .expect("Locking failed")
            .push(Box::new(f));
    }

    pub(super) fn commit(self) -> result::Result<(), redb::CommitError> {
        let Self {
            dbtx,
            on_commit,
            commit_hook_order_lock,
        } = self;

        // Only one write tx exists at a time, but once it's committed the
        // next one can start, so hooks of consecutive transactions could
        // interleave without this lock.
        let _guard = commit_hook_order_lock.lock().expect("Locking failed");

        dbtx.commit()?;

        for hook in on_commit.lock().expect("Locking failed").drain(..) {
            hook();
        }
        Ok(())
    }
}
