//! MemoDB: a content-addressed object store with a memoized
//! function-evaluation layer.
//!
//! Values ([`Node`]) are stored by the CID of their canonical encoding;
//! heads bind symbolic names to CIDs; calls cache function results. The
//! same [`Store`] contract is served by several backends, selected by URI
//! scheme through [`open`]:
//!
//! | scheme | backend | writable |
//! |---|---|---|
//! | `sqlite:<path>` | relational file | yes |
//! | `rocksdb:<path>` | log-structured KV | yes |
//! | `car:<path>` | single-file archive | no |
//! | `memory:` | in-process maps | yes |
//! | `http(s)://…` | remote transport (external) | -- |
//!
//! The [`Evaluator`] layers call-cache memoization and in-flight
//! deduplication over any of them.

use std::path::Path;

use tracing::debug;

pub use memodb_car::{export, CarStore, CarWriter};
pub use memodb_eval::{EvalError, EvalFuture, Evaluator, NodeOrCid, NodeRef};
pub use memodb_node::{cbor, Cid, Codec, Kind, Node};
pub use memodb_rocksdb::RocksStore;
pub use memodb_sqlite::SqliteStore;
pub use memodb_store::{
    Call, Head, MemoryStore, Name, PathStep, Result, Store, StoreError, Uri,
};

/// Environment variable consulted by [`open_default`] when no URI is
/// given explicitly.
pub const STORE_URI_ENV: &str = "MEMODB_STORE";

/// Open a store selected by URI scheme.
pub fn open(uri: &str) -> Result<Box<dyn Store>> {
    let parsed = Uri::parse(uri)?;
    let path = parsed.file_path();
    debug!(scheme = parsed.scheme.as_str(), "opening store");
    match parsed.scheme.as_str() {
        "sqlite" => Ok(Box::new(SqliteStore::open(Path::new(&path))?)),
        "rocksdb" => Ok(Box::new(RocksStore::open(Path::new(&path))?)),
        "car" => Ok(Box::new(CarStore::open(Path::new(&path))?)),
        "memory" => Ok(Box::new(MemoryStore::new())),
        "http" | "https" => Err(StoreError::Unsupported(format!(
            "{uri}: remote stores are served by the HTTP transport, not opened in-process"
        ))),
        "" => Err(StoreError::InvalidUri(format!("{uri}: missing scheme"))),
        other => Err(StoreError::Unsupported(format!("{uri}: unknown scheme {other}"))),
    }
}

/// Open the store named by the `MEMODB_STORE` environment variable.
pub fn open_default() -> Result<Box<dyn Store>> {
    match std::env::var(STORE_URI_ENV) {
        Ok(uri) if !uri.is_empty() => open(&uri),
        _ => Err(StoreError::InvalidUri(format!(
            "no store URI given and {STORE_URI_ENV} is not set"
        ))),
    }
}
