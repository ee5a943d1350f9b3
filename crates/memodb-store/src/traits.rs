//! The [`Store`] trait defining the content-addressed storage interface.
//!
//! Every backend (in-memory, relational file, log-structured engine,
//! read-only archive) implements this trait. A `Store` holds three kinds of
//! state: immutable blocks keyed by CID, mutable head bindings, and
//! memoized call bindings.

use memodb_node::{Cid, Node};

use crate::error::{Result, StoreError};
use crate::name::{Call, Head, Name};
use crate::paths::{paths_within, PathStep};

/// Content-addressed block store with named references and a call cache.
///
/// All implementations must satisfy these invariants:
/// - `put` is deterministic and idempotent: the same node always produces
///   the same CID, and storing it twice changes nothing.
/// - Blocks are immutable once written; content addressing guarantees it.
/// - A block whose CID uses the identity hash carries its content inline
///   and is never physically stored.
/// - Each individual operation is atomic with respect to the backend;
///   readers and writers may run concurrently on a shared instance.
pub trait Store: Send + Sync {
    /// Store a node, returning its CID. No-op if already present. Identity
    /// CIDs are returned without touching storage.
    fn put(&self, node: &Node) -> Result<Cid>;

    /// Fetch a node by CID. Returns `Ok(None)` if absent. Identity CIDs
    /// decode from their inline digest without a lookup.
    fn get_optional(&self, cid: &Cid) -> Result<Option<Node>>;

    /// Fetch a node by CID, failing with [`StoreError::NotFound`] if absent.
    fn get(&self, cid: &Cid) -> Result<Node> {
        self.get_optional(cid)?
            .ok_or_else(|| StoreError::NotFound(Name::Cid(cid.clone()).to_string()))
    }

    /// Whether a block for `cid` can be fetched.
    fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.get_optional(cid)?.is_some())
    }

    /// Map a name to its bound CID. CID names resolve to themselves.
    /// Returns `Ok(None)` for unbound heads and calls.
    fn resolve_optional(&self, name: &Name) -> Result<Option<Cid>>;

    /// Map a name to its bound CID, failing with [`StoreError::NotFound`]
    /// if unbound.
    fn resolve(&self, name: &Name) -> Result<Cid> {
        self.resolve_optional(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Bind a head or call to a CID. Binding a CID name is meaningless and
    /// rejected with [`StoreError::InvalidName`].
    fn set(&self, name: &Name, cid: &Cid) -> Result<()>;

    /// Remove a head binding. Removing an absent head is a no-op.
    fn head_delete(&self, head: &Head) -> Result<()>;

    /// Remove every call binding for `func`.
    fn call_invalidate(&self, func: &str) -> Result<()>;

    /// Visit each head. The callback returns `true` to stop early.
    fn each_head(&self, f: &mut dyn FnMut(&Head) -> bool) -> Result<()>;

    /// All heads, in name order where the backend provides one.
    fn list_heads(&self) -> Result<Vec<Head>> {
        let mut result = Vec::new();
        self.each_head(&mut |head| {
            result.push(head.clone());
            false
        })?;
        Ok(result)
    }

    /// Function names with at least one call binding.
    fn list_funcs(&self) -> Result<Vec<String>>;

    /// Visit each call binding for `func`. The callback returns `true` to
    /// stop early.
    fn each_call(&self, func: &str, f: &mut dyn FnMut(&Call) -> bool) -> Result<()>;

    /// All call bindings for `func`.
    fn list_calls(&self, func: &str) -> Result<Vec<Call>> {
        let mut result = Vec::new();
        self.each_call(func, &mut |call| {
            result.push(call.clone());
            false
        })?;
        Ok(result)
    }

    /// Names known to reference `cid`: parent blocks (as CID names), heads
    /// bound to it, and calls whose result is it.
    ///
    /// Completeness is best-effort and varies per backend -- an archive has
    /// no reverse block index, for instance. The contract is only that
    /// there are no false positives; callers must not assume the list is
    /// exhaustive.
    fn names_using(&self, cid: &Cid) -> Result<Vec<Name>>;

    /// Walk `names_using` transitively, returning each (root name, path)
    /// pair where following the path of map keys and list indexes from the
    /// root's value leads to `cid`. Inherits the best-effort nature of
    /// [`Store::names_using`].
    fn list_paths_to(&self, cid: &Cid) -> Result<Vec<(Name, Vec<PathStep>)>> {
        let mut result = Vec::new();
        let mut backwards: Vec<PathStep> = Vec::new();
        let mut on_path: Vec<Cid> = Vec::new();
        walk_parents(self, cid, &mut backwards, &mut on_path, &mut result)?;
        Ok(result)
    }
}

/// Depth-first reverse walk. `on_path` cuts off revisits of a CID already
/// on the current chain (diamonds would otherwise be walked repeatedly).
fn walk_parents<S: Store + ?Sized>(
    store: &S,
    cid: &Cid,
    backwards: &mut Vec<PathStep>,
    on_path: &mut Vec<Cid>,
    out: &mut Vec<(Name, Vec<PathStep>)>,
) -> Result<()> {
    if on_path.contains(cid) {
        return Ok(());
    }
    on_path.push(cid.clone());
    for parent in store.names_using(cid)? {
        match parent {
            Name::Cid(parent_cid) => {
                let node = store.get(&parent_cid)?;
                for subpath in paths_within(&node, cid) {
                    backwards.extend(subpath.iter().rev().cloned());
                    walk_parents(store, &parent_cid, backwards, on_path, out)?;
                    backwards.truncate(backwards.len() - subpath.len());
                }
            }
            root => {
                let path = backwards.iter().rev().cloned().collect();
                out.push((root, path));
            }
        }
    }
    on_path.pop();
    Ok(())
}
