//! In-memory store.
//!
//! All state lives in maps behind a single `RwLock`, which makes each
//! operation trivially atomic. Intended for tests, the evaluator's unit
//! tests, and embedding; it implements the full [`Store`] contract,
//! including a complete reverse-reference index.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use memodb_node::{Cid, Node};
use tracing::trace;

use crate::error::{Result, StoreError};
use crate::name::{Call, Head, Name};
use crate::traits::Store;

#[derive(Debug, Clone)]
struct CallEntry {
    args: Vec<Cid>,
    result: Cid,
}

#[derive(Debug, Default)]
struct Inner {
    blocks: HashMap<Cid, Vec<u8>>,
    heads: BTreeMap<String, Cid>,
    calls: BTreeMap<String, BTreeMap<String, CallEntry>>,
    /// child CID -> parent CIDs referencing it
    parents: HashMap<Cid, BTreeSet<Cid>>,
}

/// Memory-backed store, shareable across threads.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physically stored blocks (identity CIDs never count).
    pub fn block_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").blocks.len()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect("lock poisoned");
        f.debug_struct("MemoryStore")
            .field("blocks", &inner.blocks.len())
            .field("heads", &inner.heads.len())
            .field("funcs", &inner.calls.len())
            .finish()
    }
}

impl Store for MemoryStore {
    fn put(&self, node: &Node) -> Result<Cid> {
        let (cid, bytes) = node.to_ipld();
        if cid.is_identity() {
            return Ok(cid);
        }
        let mut inner = self.inner.write().expect("lock poisoned");
        if !inner.blocks.contains_key(&cid) {
            trace!(cid = %cid, len = bytes.len(), "store block");
            for child in node.links() {
                inner.parents.entry(child).or_default().insert(cid.clone());
            }
            inner.blocks.insert(cid.clone(), bytes);
        }
        Ok(cid)
    }

    fn get_optional(&self, cid: &Cid) -> Result<Option<Node>> {
        if cid.is_identity() {
            return Ok(Some(Node::from_ipld(cid, cid.digest())?));
        }
        let inner = self.inner.read().expect("lock poisoned");
        match inner.blocks.get(cid) {
            Some(bytes) => Ok(Some(Node::from_ipld(cid, bytes)?)),
            None => Ok(None),
        }
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        if cid.is_identity() {
            return Ok(true);
        }
        Ok(self
            .inner
            .read()
            .expect("lock poisoned")
            .blocks
            .contains_key(cid))
    }

    fn resolve_optional(&self, name: &Name) -> Result<Option<Cid>> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(match name {
            Name::Cid(cid) => Some(cid.clone()),
            Name::Head(head) => inner.heads.get(head.name()).cloned(),
            Name::Call(call) => inner
                .calls
                .get(&call.func)
                .and_then(|rows| rows.get(&call.args_key()))
                .map(|entry| entry.result.clone()),
        })
    }

    fn set(&self, name: &Name, cid: &Cid) -> Result<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        match name {
            Name::Cid(_) => {
                return Err(StoreError::InvalidName(
                    "cannot bind a CID name".to_string(),
                ))
            }
            Name::Head(head) => {
                trace!(head = head.name(), cid = %cid, "set head");
                inner.heads.insert(head.name().to_string(), cid.clone());
            }
            Name::Call(call) => {
                trace!(func = call.func.as_str(), cid = %cid, "set call");
                inner.calls.entry(call.func.clone()).or_default().insert(
                    call.args_key(),
                    CallEntry {
                        args: call.args.clone(),
                        result: cid.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    fn head_delete(&self, head: &Head) -> Result<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.heads.remove(head.name());
        Ok(())
    }

    fn call_invalidate(&self, func: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.calls.remove(func);
        Ok(())
    }

    fn each_head(&self, f: &mut dyn FnMut(&Head) -> bool) -> Result<()> {
        let names: Vec<String> = {
            let inner = self.inner.read().expect("lock poisoned");
            inner.heads.keys().cloned().collect()
        };
        for name in names {
            if f(&Head(name)) {
                break;
            }
        }
        Ok(())
    }

    fn list_funcs(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(inner.calls.keys().cloned().collect())
    }

    fn each_call(&self, func: &str, f: &mut dyn FnMut(&Call) -> bool) -> Result<()> {
        let calls: Vec<Call> = {
            let inner = self.inner.read().expect("lock poisoned");
            match inner.calls.get(func) {
                Some(rows) => rows
                    .values()
                    .map(|entry| Call::new(func, entry.args.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };
        for call in calls {
            if f(&call) {
                break;
            }
        }
        Ok(())
    }

    fn names_using(&self, cid: &Cid) -> Result<Vec<Name>> {
        let inner = self.inner.read().expect("lock poisoned");
        let mut result = Vec::new();
        if let Some(parents) = inner.parents.get(cid) {
            result.extend(parents.iter().cloned().map(Name::Cid));
        }
        for (name, target) in &inner.heads {
            if target == cid {
                result.push(Name::Head(Head(name.clone())));
            }
        }
        for (func, rows) in &inner.calls {
            for entry in rows.values() {
                if entry.result == *cid {
                    result.push(Name::Call(Call::new(func.clone(), entry.args.clone())));
                }
            }
        }
        Ok(result)
    }
}
