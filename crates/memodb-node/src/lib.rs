//! Canonical values and content identifiers for MemoDB.
//!
//! This crate is the foundation the stores are built on:
//!
//! - [`Node`] -- an immutable, recursively defined value with structural
//!   equality and a total order.
//! - [`cbor`] -- the canonical binary encoding (dag-cbor profile): one byte
//!   sequence per value, strict rejection of malformed input.
//! - [`Cid`] -- a self-describing content identifier derived from a value's
//!   canonical bytes, with binary and multibase textual forms.
//!
//! The pieces compose: `Node::to_ipld()` yields the bytes a store persists
//! and the CID they are filed under; `Node::from_ipld()` reverses it. Tiny
//! raw payloads are inlined into identity-hash CIDs and never hit storage.

pub mod cbor;
pub mod cid;
pub mod error;
pub mod node;
pub mod varint;

pub use cbor::{decode, decode_prefix, encode, DEFAULT_MAX_DEPTH};
pub use cid::{Cid, Codec, HASH_IDENTITY, HASH_SHA2_256, INLINE_THRESHOLD};
pub use error::{CborError, CidError};
pub use node::{Kind, Node};
