use thiserror::Error;

/// Storage backend failures.
///
/// `Io` may be transient (disk full, lock contention). `Serialization` means a
/// stored value no longer decodes and will not fix itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O or transaction failure
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Stored value could not be encoded or decoded
    #[error("storage serialization error: {0}")]
    Serialization(String),
}
