use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use snafu::{ResultExt as _, Snafu};
use vbft_util_db::def_table;
use vbft_util_error::BoxedErrorResult;

use crate::Database;
use crate::error::{DbError, DbTxError, TxSnafu};

def_table! {
    numbers: u64 => u64
}

#[derive(Debug, Snafu)]
enum TestError {
    #[snafu(transparent)]
    Db { source: DbError },
    Rejected,
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn commit_hooks_run_only_on_commit() -> BoxedErrorResult<()> {
    let db = Database::new_in_memory().await?;
    let hook_runs = Arc::new(AtomicU64::new(0));

    db.write_with(|dbtx| {
        let mut tbl = dbtx.open_table(&numbers::TABLE)?;
        tbl.insert(&1, &10)?;
        let hook_runs = hook_runs.clone();
        dbtx.on_commit(move || {
            hook_runs.fetch_add(1, Ordering::SeqCst);
        });
        Ok(())
    })
    .await?;
    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);

    let res = db
        .write_with_falliable(|dbtx| {
            let mut tbl = dbtx.open_table(&numbers::TABLE)?;
            tbl.insert(&1, &20)?;
            let hook_runs = hook_runs.clone();
            dbtx.on_commit(move || {
                hook_runs.fetch_add(1, Ordering::SeqCst);
            });
            Err::<(), _>(TestError::Rejected).context(TxSnafu)
        })
        .await;

    assert!(matches!(res.map_err(DbTxError::flatten), Err(TestError::Rejected)));
    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);

    let value = db
        .read_with(|dbtx| {
            let tbl = dbtx.open_table(&numbers::TABLE)?;
            Ok(tbl.get(&1)?.map(|v| v.value()))
        })
        .await?;
    assert_eq!(value, Some(10));

    Ok(())
}
