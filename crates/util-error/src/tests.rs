use snafu::{ResultExt as _, Snafu};

use crate::fmt::FmtCompact as _;

#[derive(Debug, Snafu)]
#[snafu(display("disk on fire"))]
struct RootError;

#[derive(Debug, Snafu)]
#[snafu(display("failed to save block {height}"))]
struct SaveError {
    height: u64,
    source: RootError,
}

#[test]
fn fmt_compact_prints_the_whole_chain() {
    let err = Err::<(), _>(RootError)
        .context(SaveSnafu { height: 3u64 })
        .unwrap_err();

    assert_eq!(
        err.fmt_compact().to_string(),
        "failed to save block 3: disk on fire"
    );
}
