//! Storage engine for the fileferry transfer service.
//!
//! Owns the authoritative mapping from file identifier to metadata (the
//! in-memory catalog) and one flat blob file per identifier on disk. Has
//! no knowledge of the network protocol.

mod store;

pub use store::FileStore;

/// Errors produced by the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid file id: {0}")]
    InvalidId(String),
}
