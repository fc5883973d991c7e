use std::io;

use thiserror::Error;

pub type KvResult<T> = Result<T, KvError>;

/// Message carried by [`KvError::NoAvailableDriver`].
pub const NO_DRIVER_MESSAGE: &str = "No available storage method found.";

/// Message carried by [`KvError::DriverNotCompliant`].
pub const NOT_COMPLIANT_MESSAGE: &str =
    "Custom driver not compliant; see the `StorageDriver` documentation (#definedriver)";

#[derive(Error, Debug)]
pub enum KvError {
    #[error("No available storage method found.")]
    NoAvailableDriver,

    #[error(
        "Custom driver not compliant; see the `StorageDriver` documentation (#definedriver)"
    )]
    DriverNotCompliant,

    #[error("Driver name already in use: {0}")]
    DriverNameInUse(String),

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("Can't call configure() after the store has been used.")]
    ConfigAfterReady,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Schema Version Mismatch: requested {requested}, found {found}")]
    VersionMismatch { requested: u64, found: u64 },

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),

    #[cfg(feature = "sled")]
    #[error("Sled Error: {0}")]
    Sled(#[from] sled::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite Error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "redb")]
    #[error(transparent)]
    Redb(#[from] RedbError),

    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Write scheduler shut down before the task completed")]
    SchedulerClosed,

    #[error("Storage Error: {0}")]
    Storage(String),
}

impl KvError {
    /// True for the distinguished storage-full case callers may want to react to.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, KvError::QuotaExceeded(_))
    }
}

#[cfg(feature = "redb")]
#[derive(Error, Debug)]
pub enum RedbError {
    #[error(transparent)]
    DatabaseError(#[from] redb::DatabaseError),
    #[error(transparent)]
    TransactionError(#[from] redb::TransactionError),
    #[error(transparent)]
    TableError(#[from] redb::TableError),
    #[error(transparent)]
    CommitError(#[from] redb::CommitError),
    #[error(transparent)]
    StorageError(#[from] redb::StorageError),
}

#[cfg(feature = "redb")]
macro_rules! impl_from_redb {
    ($($err:ty => $variant:ident),*) => {
        $(
            impl From<$err> for KvError {
                fn from(err: $err) -> Self {
                    KvError::Redb(RedbError::$variant(err))
                }
            }
        )*
    };
}

#[cfg(feature = "redb")]
impl_from_redb!(
    redb::DatabaseError => DatabaseError,
    redb::TransactionError => TransactionError,
    redb::TableError => TableError,
    redb::CommitError => CommitError,
    redb::StorageError => StorageError
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_messages_match_constants() {
        assert_eq!(KvError::NoAvailableDriver.to_string(), NO_DRIVER_MESSAGE);
        assert_eq!(
            KvError::DriverNotCompliant.to_string(),
            NOT_COMPLIANT_MESSAGE
        );
    }

    #[test]
    fn quota_is_distinguishable() {
        assert!(KvError::QuotaExceeded("full".into()).is_quota_exceeded());
        assert!(!KvError::Storage("full".into()).is_quota_exceeded());
    }
}
