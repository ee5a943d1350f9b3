use memodb_node::{CborError, CidError};

/// Errors from store operations and name handling.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The CID or name is not present in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write attempted against a read-only backend.
    #[error("store is read-only")]
    ReadOnly,

    /// The URI does not follow the grammar.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// The URI parsed but does not denote a head, call, or CID.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Malformed CID text or binary.
    #[error("invalid CID: {0}")]
    InvalidCid(#[from] CidError),

    /// Stored or supplied bytes failed canonical decoding.
    #[error("invalid CBOR: {0}")]
    InvalidCbor(#[from] CborError),

    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transient backend contention; the operation may be retried.
    #[error("backend busy")]
    Busy,

    /// Structural damage: stored bytes disagree with their CID. Fatal for
    /// the operation, never retried.
    #[error("corrupt store: {0}")]
    Corrupt(String),

    /// Engine-specific failure from a storage backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// The URI names a backend this build does not provide.
    #[error("unsupported store URI: {0}")]
    Unsupported(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
