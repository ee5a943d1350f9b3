//! Relational-file backend for MemoDB (`sqlite:` store URIs).
//!
//! One SQLite database file holds four tables:
//!
//! ```sql
//! blocks(cid BLOB PRIMARY KEY, content BLOB NOT NULL)
//! heads(name TEXT PRIMARY KEY, cid BLOB NOT NULL)
//! calls(func TEXT, args_key TEXT, args BLOB, result BLOB NOT NULL,
//!       PRIMARY KEY(func, args_key))
//! refs(parent_cid BLOB, child_cid BLOB, PRIMARY KEY(parent_cid, child_cid))
//! ```
//!
//! `put` walks the node for links and fills `refs` inside the same short
//! transaction, which makes `names_using` complete for this backend.
//! `calls.args_key` is the slash-joined textual argument CIDs, matching
//! databases written by older tools; the `args` blob (a CBOR list of
//! links) is preferred when present and the key is re-parsed when not.
//!
//! WAL journal mode allows concurrent readers. `SQLITE_BUSY` maps to a
//! transient [`StoreError::Busy`] and is retried internally with a bounded
//! linear backoff before surfacing.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use memodb_node::{cbor, Cid, Node};
use memodb_store::{Call, Head, Name, Result, Store, StoreError};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, trace};

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS blocks(
  cid     BLOB PRIMARY KEY,
  content BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS heads(
  name TEXT PRIMARY KEY,
  cid  BLOB NOT NULL REFERENCES blocks(cid)
);
CREATE TABLE IF NOT EXISTS calls(
  func     TEXT,
  args_key TEXT,
  args     BLOB,
  result   BLOB NOT NULL,
  PRIMARY KEY(func, args_key)
);
CREATE TABLE IF NOT EXISTS refs(
  parent_cid BLOB,
  child_cid  BLOB,
  PRIMARY KEY(parent_cid, child_cid)
);
CREATE INDEX IF NOT EXISTS refs_by_child ON refs(child_cid);
CREATE INDEX IF NOT EXISTS heads_by_cid ON heads(cid);
CREATE INDEX IF NOT EXISTS calls_by_result ON calls(result);
";

/// Total busy-retry budget: 20 attempts with 10 ms * attempt backoff,
/// roughly two seconds.
const BUSY_RETRIES: u32 = 20;

/// Single-file relational store.
///
/// The connection is guarded by a mutex, serializing statements from this
/// handle; independent readers open their own handle against the same
/// file and proceed in parallel under WAL.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and ensure the schema.
    pub fn open(path: &Path) -> Result<SqliteStore> {
        let conn = Connection::open(path).map_err(map_sql)?;
        // journal_mode returns a row; query it rather than pragma_update.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(map_sql)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(map_sql)?;
        conn.busy_timeout(Duration::from_millis(100))
            .map_err(map_sql)?;
        conn.execute_batch(SCHEMA).map_err(map_sql)?;
        debug!(path = %path.display(), "opened sqlite store");
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Physically stored block count (identity CIDs never appear here).
    pub fn block_count(&self) -> Result<u64> {
        self.with_retry(|conn| {
            conn.query_row("SELECT count(*) FROM blocks", [], |row| row.get(0))
        })
    }

    /// Run a statement batch, retrying while SQLite reports contention.
    fn with_retry<T>(
        &self,
        mut op: impl FnMut(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            let result = {
                let mut conn = self.conn.lock().expect("lock poisoned");
                op(&mut conn)
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) => {
                    attempt += 1;
                    if attempt > BUSY_RETRIES {
                        return Err(StoreError::Busy);
                    }
                    trace!(attempt, "sqlite busy, backing off");
                    std::thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
                }
                Err(e) => return Err(map_sql(e)),
            }
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn map_sql(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Recover an argument list from a row: the CBOR `args` blob when present,
/// otherwise the legacy slash-joined textual key.
fn row_args(args_blob: Option<Vec<u8>>, args_key: &str) -> Result<Vec<Cid>> {
    if let Some(blob) = args_blob {
        let node = cbor::decode(&blob)?;
        let items = node
            .as_list()
            .ok_or_else(|| StoreError::Corrupt("call args blob is not a list".into()))?;
        return items
            .iter()
            .map(|item| {
                item.as_link()
                    .cloned()
                    .ok_or_else(|| StoreError::Corrupt("call args entry is not a link".into()))
            })
            .collect();
    }
    if args_key.is_empty() {
        return Ok(Vec::new());
    }
    args_key
        .split('/')
        .map(|text| Cid::parse(text).map_err(StoreError::from))
        .collect()
}

fn args_blob(call: &Call) -> Vec<u8> {
    let list = Node::List(call.args.iter().cloned().map(Node::Link).collect());
    cbor::encode(&list)
}

impl Store for SqliteStore {
    fn put(&self, node: &Node) -> Result<Cid> {
        let (cid, bytes) = node.to_ipld();
        if cid.is_identity() {
            return Ok(cid);
        }
        let children: BTreeSet<Vec<u8>> =
            node.links().iter().map(Cid::to_bytes).collect();
        let cid_bytes = cid.to_bytes();
        self.with_retry(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO blocks(cid, content) VALUES (?1, ?2)",
                params![cid_bytes, bytes],
            )?;
            if inserted > 0 {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO refs(parent_cid, child_cid) VALUES (?1, ?2)",
                )?;
                for child in &children {
                    stmt.execute(params![cid_bytes, child])?;
                }
            }
            tx.commit()
        })?;
        Ok(cid)
    }

    fn get_optional(&self, cid: &Cid) -> Result<Option<Node>> {
        if cid.is_identity() {
            return Ok(Some(Node::from_ipld(cid, cid.digest())?));
        }
        let cid_bytes = cid.to_bytes();
        let content: Option<Vec<u8>> = self.with_retry(|conn| {
            conn.query_row(
                "SELECT content FROM blocks WHERE cid = ?1",
                params![cid_bytes],
                |row| row.get(0),
            )
            .optional()
        })?;
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
        let cid_bytes = cid.to_bytes();
        self.with_retry(|conn| {
            conn.query_row(
                "SELECT 1 FROM blocks WHERE cid = ?1",
                params![cid_bytes],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
        })
    }

    fn resolve_optional(&self, name: &Name) -> Result<Option<Cid>> {
        let raw: Option<Vec<u8>> = match name {
            Name::Cid(cid) => return Ok(Some(cid.clone())),
            Name::Head(head) => {
                let head_name = head.name().to_string();
                self.with_retry(|conn| {
                    conn.query_row(
                        "SELECT cid FROM heads WHERE name = ?1",
                        params![head_name],
                        |row| row.get(0),
                    )
                    .optional()
                })?
            }
            Name::Call(call) => {
                let func = call.func.clone();
                let key = call.args_key();
                self.with_retry(|conn| {
                    conn.query_row(
                        "SELECT result FROM calls WHERE func = ?1 AND args_key = ?2",
                        params![func, key],
                        |row| row.get(0),
                    )
                    .optional()
                })?
            }
        };
        match raw {
            Some(bytes) => Ok(Some(Cid::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, name: &Name, cid: &Cid) -> Result<()> {
        let cid_bytes = cid.to_bytes();
        match name {
            Name::Cid(_) => Err(StoreError::InvalidName(
                "cannot bind a CID name".to_string(),
            )),
            Name::Head(head) => {
                let head_name = head.name().to_string();
                trace!(head = head_name.as_str(), cid = %cid, "set head");
                self.with_retry(|conn| {
                    conn.execute(
                        "INSERT OR REPLACE INTO heads(name, cid) VALUES (?1, ?2)",
                        params![head_name, cid_bytes],
                    )
                })?;
                Ok(())
            }
            Name::Call(call) => {
                let func = call.func.clone();
                let key = call.args_key();
                let blob = args_blob(call);
                trace!(func = func.as_str(), cid = %cid, "set call");
                self.with_retry(|conn| {
                    conn.execute(
                        "INSERT OR REPLACE INTO calls(func, args_key, args, result) \
                         VALUES (?1, ?2, ?3, ?4)",
                        params![func, key, blob, cid_bytes],
                    )
                })?;
                Ok(())
            }
        }
    }

    fn head_delete(&self, head: &Head) -> Result<()> {
        let head_name = head.name().to_string();
        self.with_retry(|conn| {
            conn.execute("DELETE FROM heads WHERE name = ?1", params![head_name])
        })?;
        Ok(())
    }

    fn call_invalidate(&self, func: &str) -> Result<()> {
        let func = func.to_string();
        let removed = self.with_retry(|conn| {
            conn.execute("DELETE FROM calls WHERE func = ?1", params![func])
        })?;
        debug!(func = func.as_str(), removed, "invalidated calls");
        Ok(())
    }

    fn each_head(&self, f: &mut dyn FnMut(&Head) -> bool) -> Result<()> {
        let names: Vec<String> = self.with_retry(|conn| {
            let mut stmt = conn.prepare_cached("SELECT name FROM heads ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })?;
        for name in names {
            if f(&Head::new(name)) {
                break;
            }
        }
        Ok(())
    }

    fn list_funcs(&self) -> Result<Vec<String>> {
        self.with_retry(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT DISTINCT func FROM calls ORDER BY func")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    fn each_call(&self, func: &str, f: &mut dyn FnMut(&Call) -> bool) -> Result<()> {
        let func_owned = func.to_string();
        let rows: Vec<(String, Option<Vec<u8>>)> = self.with_retry(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT args_key, args FROM calls WHERE func = ?1 ORDER BY args_key",
            )?;
            let rows = stmt.query_map(params![func_owned], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect()
        })?;
        for (args_key, blob) in rows {
            let args = row_args(blob, &args_key)?;
            if f(&Call::new(func, args)) {
                break;
            }
        }
        Ok(())
    }

    fn names_using(&self, cid: &Cid) -> Result<Vec<Name>> {
        let cid_bytes = cid.to_bytes();
        let mut result = Vec::new();

        let parents: Vec<Vec<u8>> = self.with_retry(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT parent_cid FROM refs WHERE child_cid = ?1")?;
            let rows = stmt.query_map(params![cid_bytes], |row| row.get(0))?;
            rows.collect()
        })?;
        for parent in parents {
            result.push(Name::Cid(Cid::from_bytes(&parent)?));
        }

        let heads: Vec<String> = self.with_retry(|conn| {
            let mut stmt = conn.prepare_cached("SELECT name FROM heads WHERE cid = ?1")?;
            let rows = stmt.query_map(params![cid_bytes], |row| row.get(0))?;
            rows.collect()
        })?;
        result.extend(heads.into_iter().map(|name| Name::Head(Head::new(name))));

        let calls: Vec<(String, String, Option<Vec<u8>>)> = self.with_retry(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT func, args_key, args FROM calls WHERE result = ?1",
            )?;
            let rows = stmt.query_map(params![cid_bytes], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect()
        })?;
        for (func, args_key, blob) in calls {
            result.push(Name::Call(Call::new(func, row_args(blob, &args_key)?)));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).unwrap();
        (dir, store)
    }

    fn node_map(entries: &[(&str, Node)]) -> Node {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn put_then_get() {
        let (_dir, store) = open_temp();
        let node = node_map(&[("answer", Node::Int(42))]);
        let cid = store.put(&node).unwrap();
        assert_eq!(store.get(&cid).unwrap(), node);
    }

    #[test]
    fn put_is_idempotent() {
        let (_dir, store) = open_temp();
        let node = Node::from("stored once");
        let a = store.put(&node).unwrap();
        let b = store.put(&node).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.block_count().unwrap(), 1);
    }

    #[test]
    fn identity_blocks_write_nothing() {
        let (_dir, store) = open_temp();
        let before = store.block_count().unwrap();
        let cid = store.put(&Node::Bytes(vec![1, 2, 3])).unwrap();
        assert!(cid.is_identity());
        assert_eq!(store.block_count().unwrap(), before);
        assert_eq!(store.get(&cid).unwrap(), Node::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn large_bytes_are_stored_raw() {
        let (_dir, store) = open_temp();
        let node = Node::Bytes(vec![0xab; 100]);
        let cid = store.put(&node).unwrap();
        assert!(!cid.is_identity());
        assert_eq!(store.block_count().unwrap(), 1);
        assert_eq!(store.get(&cid).unwrap(), node);
    }

    #[test]
    fn heads_bind_list_resolve_delete() {
        let (_dir, store) = open_temp();
        let cid = store.put(&Node::Int(42)).unwrap();
        let head = Head::new("x");
        store.set(&Name::Head(head.clone()), &cid).unwrap();
        assert_eq!(store.list_heads().unwrap(), vec![head.clone()]);
        assert_eq!(store.resolve(&Name::Head(head.clone())).unwrap(), cid);
        store.head_delete(&head).unwrap();
        assert!(store
            .resolve_optional(&Name::Head(head))
            .unwrap()
            .is_none());
    }

    #[test]
    fn heads_may_point_at_identity_cids() {
        let (_dir, store) = open_temp();
        let cid = store.put(&Node::Bytes(b"inline".to_vec())).unwrap();
        assert!(cid.is_identity());
        store.set(&Name::Head(Head::new("tiny")), &cid).unwrap();
        assert_eq!(store.resolve(&Name::Head(Head::new("tiny"))).unwrap(), cid);
    }

    #[test]
    fn calls_bind_resolve_enumerate_invalidate() {
        let (_dir, store) = open_temp();
        let arg = store.put(&Node::Int(3)).unwrap();
        let result = store.put(&Node::Int(6)).unwrap();
        let call = Call::new("double", vec![arg]);
        store.set(&Name::Call(call.clone()), &result).unwrap();

        assert_eq!(store.resolve(&Name::Call(call.clone())).unwrap(), result);
        assert_eq!(store.list_funcs().unwrap(), vec!["double".to_string()]);
        assert_eq!(store.list_calls("double").unwrap(), vec![call.clone()]);

        store.call_invalidate("double").unwrap();
        assert!(store.resolve_optional(&Name::Call(call)).unwrap().is_none());
    }

    #[test]
    fn legacy_rows_without_args_blob_are_readable() {
        let (_dir, store) = open_temp();
        let arg_a = store.put(&Node::Int(1)).unwrap();
        let arg_b = store.put(&Node::Int(2)).unwrap();
        let result = store.put(&Node::Int(3)).unwrap();
        let call = Call::new("legacy", vec![arg_a, arg_b]);

        // A row as an older tool would have written it: textual key only.
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO calls(func, args_key, args, result) VALUES (?1, ?2, NULL, ?3)",
                params![call.func, call.args_key(), result.to_bytes()],
            )
            .unwrap();
        }

        assert_eq!(store.resolve(&Name::Call(call.clone())).unwrap(), result);
        assert_eq!(store.list_calls("legacy").unwrap(), vec![call]);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let node = node_map(&[("persisted", Node::Bool(true))]);
        let cid = {
            let store = SqliteStore::open(&path).unwrap();
            let cid = store.put(&node).unwrap();
            store.set(&Name::Head(Head::new("h")), &cid).unwrap();
            cid
        };
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get(&cid).unwrap(), node);
        assert_eq!(store.resolve(&Name::Head(Head::new("h"))).unwrap(), cid);
    }

    #[test]
    fn names_using_is_complete() {
        let (_dir, store) = open_temp();
        let leaf = store.put(&Node::from("leaf")).unwrap();
        let parent = store
            .put(&node_map(&[("child", Node::Link(leaf.clone()))]))
            .unwrap();
        store.set(&Name::Head(Head::new("h")), &leaf).unwrap();
        let call = Call::new("f", vec![parent.clone()]);
        store.set(&Name::Call(call.clone()), &leaf).unwrap();

        let names = store.names_using(&leaf).unwrap();
        assert!(names.contains(&Name::Cid(parent)));
        assert!(names.contains(&Name::Head(Head::new("h"))));
        assert!(names.contains(&Name::Call(call)));
    }

    #[test]
    fn tampered_content_reports_corrupt() {
        let (_dir, store) = open_temp();
        let cid = store.put(&Node::from("honest value")).unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE blocks SET content = ?1 WHERE cid = ?2",
                params![b"tampered".to_vec(), cid.to_bytes()],
            )
            .unwrap();
        }
        assert!(matches!(
            store.get(&cid),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn concurrent_puts_agree() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("store.db")).unwrap());
        let node = node_map(&[("payload", Node::Bytes(vec![9; 64]))]);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let node = node.clone();
                thread::spawn(move || store.put(&node).unwrap())
            })
            .collect();
        let cids: Vec<Cid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(cids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.block_count().unwrap(), 1);
    }

    #[test]
    fn cid_names_reject_set() {
        let (_dir, store) = open_temp();
        let cid = store.put(&Node::Int(1)).unwrap();
        assert!(matches!(
            store.set(&Name::Cid(cid.clone()), &cid),
            Err(StoreError::InvalidName(_))
        ));
    }
}
