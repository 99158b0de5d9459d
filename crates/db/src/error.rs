use std::io;

use snafu::{Location, Snafu};
use tokio::task::JoinError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DbError {
    #[snafu(display("Database error at {location}"))]
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        source: redb::TransactionError,
        #[snafu(implicit)]
        location: Location,
    },
    Join {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Io {
        source: io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    InvalidPath {
        #[snafu(implicit)]
        location: Location,
    },
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Database transaction error with a user-defined application error
///
/// Either some database issue bubbling up, or whatever error `E` the
/// transaction logic itself failed with.
///
/// See [`DbTxError::flatten`] to collapse it into `E` at the end.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DbTxError<E>
where
    E: snafu::Error + 'static,
{
    #[snafu(transparent)]
    DbError {
        source: DbError,

        #[snafu(implicit)]
        location: Location,
    },
    TxError {
        source: E,
        #[snafu(implicit)]
        location: Location,
    },
}

impl<E> From<redb::TableError> for DbTxError<E>
where
    E: snafu::Error,
{
    fn from(value: redb::TableError) -> Self {
        DbError::from(value).into()
    }
}

impl<E> From<redb::StorageError> for DbTxError<E>
where
    E: snafu::Error,
{
    fn from(value: redb::StorageError) -> Self {
        DbError::from(value).into()
    }
}

/// A `Result` with `T` as success, and [`DbTxError`] as the error.
pub type DbTxResult<T, E> = std::result::Result<T, DbTxError<E>>;

impl<E> DbTxError<E>
where
    E: snafu::Error + From<DbError>,
{
    /// Collapse into `E`, for error types that can carry a [`DbError`]
    pub fn flatten(self) -> E {
        match self {
            DbTxError::DbError {
                source,
                location: _,
            } => E::from(source),
            DbTxError::TxError {
                source,
                location: _,
            } => source,
        }
    }
}
