//! Archive-file backend for MemoDB (`car:` store URIs).
//!
//! An archive is a single file of varint-length-prefixed blocks: a CBOR
//! header naming one root, then `[CID | payload]` data blocks. The root is
//! an index node carrying the archive's head and call bindings. Archives
//! are immutable interchange artifacts: [`CarStore`] serves reads, and
//! every write returns `ReadOnly`. [`CarWriter`] and [`export`] produce
//! them.

pub mod format;
pub mod store;
pub mod writer;

pub use store::CarStore;
pub use writer::{export, CarWriter};
