//! Memoized function evaluation over a MemoDB store.
//!
//! - [`NodeRef`] -- a lazy handle holding a CID, a materialized node, or
//!   both, backed by a store.
//! - [`Evaluator`] -- registers named functions and evaluates them with
//!   results cached as call bindings in the store. Concurrent evaluations
//!   of the same (function, arguments) key are deduplicated in-process,
//!   and a worker pool serves fire-and-forget submissions.

pub mod error;
pub mod evaluator;
pub mod noderef;

pub use error::{EvalError, Result};
pub use evaluator::{EvalFuture, Evaluator};
pub use noderef::{NodeOrCid, NodeRef};
