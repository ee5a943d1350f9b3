//! Log-structured embedded KV backend for MemoDB (`rocksdb:` store URIs).
//!
//! Four column families:
//!
//! - `blocks` -- binary CID -> content bytes
//! - `heads` -- head name bytes -> binary CID
//! - `calls` -- `func \0 args_key` -> CBOR `{args, result}` row
//! - `refs_fwd` -- `child_cid ++ parent_cid` -> empty, written alongside
//!   the block in one batch
//!
//! Binary CIDs are prefix-free (the digest length is fixed by the fields
//! before it), so `refs_fwd` keys parse unambiguously and `names_using`
//! is a straight prefix scan on the child. `call_invalidate` is a prefix
//! delete on `func \0`.

use std::collections::BTreeSet;
use std::path::Path;

use memodb_node::{cbor, Cid, Node};
use memodb_store::{Call, Head, Name, Result, Store, StoreError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, trace};

const CF_BLOCKS: &str = "blocks";
const CF_HEADS: &str = "heads";
const CF_CALLS: &str = "calls";
const CF_REFS: &str = "refs_fwd";

const CALL_KEY_SEP: u8 = 0;

/// Embedded log-structured store. The handle is shared across threads;
/// the engine serializes internally.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open (creating if missing) a database directory.
    pub fn open(path: &Path) -> Result<RocksStore> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf(&opts, path, [CF_BLOCKS, CF_HEADS, CF_CALLS, CF_REFS])
            .map_err(map_rocks)?;
        debug!(path = %path.display(), "opened rocksdb store");
        Ok(RocksStore { db })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {name}")))
    }

    /// Physically stored block count; a full scan, for tests and tooling.
    pub fn block_count(&self) -> Result<usize> {
        let cf = self.cf(CF_BLOCKS)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item.map_err(map_rocks)?;
            count += 1;
        }
        Ok(count)
    }

    fn call_key(func: &str, args_key: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(func.len() + 1 + args_key.len());
        key.extend_from_slice(func.as_bytes());
        key.push(CALL_KEY_SEP);
        key.extend_from_slice(args_key.as_bytes());
        key
    }

    fn call_prefix(func: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(func.len() + 1);
        prefix.extend_from_slice(func.as_bytes());
        prefix.push(CALL_KEY_SEP);
        prefix
    }

    fn call_row(call: &Call, result: &Cid) -> Vec<u8> {
        let row: Node = [
            (
                "args".to_string(),
                Node::List(call.args.iter().cloned().map(Node::Link).collect()),
            ),
            ("result".to_string(), Node::Link(result.clone())),
        ]
        .into_iter()
        .collect();
        cbor::encode(&row)
    }

    fn parse_call_row(bytes: &[u8]) -> Result<(Vec<Cid>, Cid)> {
        let row = cbor::decode(bytes)?;
        let corrupt = || StoreError::Corrupt("malformed call row".to_string());
        let args = row
            .get("args")
            .and_then(Node::as_list)
            .ok_or_else(corrupt)?
            .iter()
            .map(|item| item.as_link().cloned().ok_or_else(corrupt))
            .collect::<Result<Vec<Cid>>>()?;
        let result = row
            .get("result")
            .and_then(Node::as_link)
            .cloned()
            .ok_or_else(corrupt)?;
        Ok((args, result))
    }

    /// Keys under `prefix` in a column family, decoded by `f`.
    fn scan_prefix<T>(
        &self,
        cf_name: &str,
        prefix: &[u8],
        mut f: impl FnMut(&[u8], &[u8]) -> Result<Option<T>>,
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(map_rocks)?;
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(decoded) = f(&key, &value)? {
                out.push(decoded);
            }
        }
        Ok(out)
    }
}

fn map_rocks(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl Store for RocksStore {
    fn put(&self, node: &Node) -> Result<Cid> {
        let (cid, bytes) = node.to_ipld();
        if cid.is_identity() {
            return Ok(cid);
        }
        let cid_bytes = cid.to_bytes();
        let children: BTreeSet<Vec<u8>> = node.links().iter().map(Cid::to_bytes).collect();

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_BLOCKS)?, &cid_bytes, &bytes);
        let empty: &[u8] = &[];
        for child in &children {
            let mut key = child.clone();
            key.extend_from_slice(&cid_bytes);
            batch.put_cf(self.cf(CF_REFS)?, key, empty);
        }
        self.db.write(batch).map_err(map_rocks)?;
        trace!(cid = %cid, len = bytes.len(), "stored block");
        Ok(cid)
    }

    fn get_optional(&self, cid: &Cid) -> Result<Option<Node>> {
        if cid.is_identity() {
            return Ok(Some(Node::from_ipld(cid, cid.digest())?));
        }
        let content = self
            .db
            .get_cf(self.cf(CF_BLOCKS)?, cid.to_bytes())
            .map_err(map_rocks)?;
        match content {
            Some(content) => {
                if !cid.verify(&content) {
                    return Err(StoreError::Corrupt(format!(
                        "stored content does not match CID {cid}"
                    )));
                }
                Ok(Some(Node::from_ipld(cid, &content)?))
            }
            None => Ok(None),
        }
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        if cid.is_identity() {
            return Ok(true);
        }
        Ok(self
            .db
            .get_cf(self.cf(CF_BLOCKS)?, cid.to_bytes())
            .map_err(map_rocks)?
            .is_some())
    }

    fn resolve_optional(&self, name: &Name) -> Result<Option<Cid>> {
        match name {
            Name::Cid(cid) => Ok(Some(cid.clone())),
            Name::Head(head) => {
                let raw = self
                    .db
                    .get_cf(self.cf(CF_HEADS)?, head.name().as_bytes())
                    .map_err(map_rocks)?;
                match raw {
                    Some(bytes) => Ok(Some(Cid::from_bytes(&bytes)?)),
                    None => Ok(None),
                }
            }
            Name::Call(call) => {
                let key = Self::call_key(&call.func, &call.args_key());
                let raw = self
                    .db
                    .get_cf(self.cf(CF_CALLS)?, key)
                    .map_err(map_rocks)?;
                match raw {
                    Some(bytes) => Ok(Some(Self::parse_call_row(&bytes)?.1)),
                    None => Ok(None),
                }
            }
        }
    }

    fn set(&self, name: &Name, cid: &Cid) -> Result<()> {
        match name {
            Name::Cid(_) => Err(StoreError::InvalidName(
                "cannot bind a CID name".to_string(),
            )),
            Name::Head(head) => {
                trace!(head = head.name(), cid = %cid, "set head");
                self.db
                    .put_cf(self.cf(CF_HEADS)?, head.name().as_bytes(), cid.to_bytes())
                    .map_err(map_rocks)
            }
            Name::Call(call) => {
                trace!(func = call.func.as_str(), cid = %cid, "set call");
                let key = Self::call_key(&call.func, &call.args_key());
                self.db
                    .put_cf(self.cf(CF_CALLS)?, key, Self::call_row(call, cid))
                    .map_err(map_rocks)
            }
        }
    }

    fn head_delete(&self, head: &Head) -> Result<()> {
        self.db
            .delete_cf(self.cf(CF_HEADS)?, head.name().as_bytes())
            .map_err(map_rocks)
    }

    fn call_invalidate(&self, func: &str) -> Result<()> {
        let keys = self.scan_prefix(CF_CALLS, &Self::call_prefix(func), |key, _| {
            Ok(Some(key.to_vec()))
        })?;
        let mut batch = WriteBatch::default();
        for key in &keys {
            batch.delete_cf(self.cf(CF_CALLS)?, key);
        }
        self.db.write(batch).map_err(map_rocks)?;
        debug!(func, removed = keys.len(), "invalidated calls");
        Ok(())
    }

    fn each_head(&self, f: &mut dyn FnMut(&Head) -> bool) -> Result<()> {
        // Key order is byte order of the names.
        let heads = self.scan_prefix(CF_HEADS, &[], |key, _| {
            Ok(Some(
                String::from_utf8(key.to_vec())
                    .map_err(|_| StoreError::Corrupt("head name is not UTF-8".into()))?,
            ))
        })?;
        for name in heads {
            if f(&Head::new(name)) {
                break;
            }
        }
        Ok(())
    }

    fn list_funcs(&self) -> Result<Vec<String>> {
        let mut funcs = BTreeSet::new();
        self.scan_prefix(CF_CALLS, &[], |key, _| {
            let sep = key
                .iter()
                .position(|&b| b == CALL_KEY_SEP)
                .ok_or_else(|| StoreError::Corrupt("call key has no separator".into()))?;
            let func = String::from_utf8(key[..sep].to_vec())
                .map_err(|_| StoreError::Corrupt("call func is not UTF-8".into()))?;
            funcs.insert(func);
            Ok(None::<()>)
        })?;
        Ok(funcs.into_iter().collect())
    }

    fn each_call(&self, func: &str, f: &mut dyn FnMut(&Call) -> bool) -> Result<()> {
        let rows = self.scan_prefix(CF_CALLS, &Self::call_prefix(func), |_, value| {
            Ok(Some(Self::parse_call_row(value)?.0))
        })?;
        for args in rows {
            if f(&Call::new(func, args)) {
                break;
            }
        }
        Ok(())
    }

    fn names_using(&self, cid: &Cid) -> Result<Vec<Name>> {
        let cid_bytes = cid.to_bytes();
        let mut result = Vec::new();

        // Parents: refs_fwd keys are child ++ parent.
        let parents = self.scan_prefix(CF_REFS, &cid_bytes, |key, _| {
            let parent = Cid::from_bytes(&key[cid_bytes.len()..])?;
            Ok(Some(Name::Cid(parent)))
        })?;
        result.extend(parents);

        let heads = self.scan_prefix(CF_HEADS, &[], |key, value| {
            if value == cid_bytes.as_slice() {
                let name = String::from_utf8(key.to_vec())
                    .map_err(|_| StoreError::Corrupt("head name is not UTF-8".into()))?;
                Ok(Some(Name::Head(Head::new(name))))
            } else {
                Ok(None)
            }
        })?;
        result.extend(heads);

        let calls = self.scan_prefix(CF_CALLS, &[], |key, value| {
            let (args, call_result) = Self::parse_call_row(value)?;
            if call_result != *cid {
                return Ok(None);
            }
            let sep = key
                .iter()
                .position(|&b| b == CALL_KEY_SEP)
                .ok_or_else(|| StoreError::Corrupt("call key has no separator".into()))?;
            let func = String::from_utf8(key[..sep].to_vec())
                .map_err(|_| StoreError::Corrupt("call func is not UTF-8".into()))?;
            Ok(Some(Name::Call(Call::new(func, args))))
        })?;
        result.extend(calls);

        Ok(result)
    }
}
