//! Store abstraction for MemoDB.
//!
//! This crate defines what it means to be a MemoDB backend:
//!
//! - [`Name`] -- the addressable entities: immutable CIDs, mutable
//!   [`Head`] bindings, and memoized [`Call`] bindings.
//! - [`Uri`] -- the path grammar names travel in (`/cid/…`, `/head/…`,
//!   `/call/…`) and the scheme-bearing store URIs.
//! - [`Store`] -- the backend contract: content-addressed blocks, head and
//!   call bindings, reverse-reference discovery.
//! - [`MemoryStore`] -- a complete in-memory implementation for tests and
//!   embedding.
//!
//! Persistent backends live in their own crates and are wired together by
//! the umbrella `memodb` crate's URI-scheme factory.

pub mod error;
pub mod memory;
pub mod name;
pub mod paths;
pub mod traits;
pub mod uri;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use name::{Call, Head, Name};
pub use paths::{paths_within, PathStep};
pub use traits::Store;
pub use uri::Uri;
