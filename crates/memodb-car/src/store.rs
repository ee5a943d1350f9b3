//! The read-only archive store.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use memodb_node::{Cid, Node};
use memodb_store::{Call, Head, Name, Result, Store, StoreError};
use tracing::debug;

use crate::format::{read_varint_opt, CountingReader, FORMAT_NAME, FORMAT_VERSION};

/// A single-file archive opened for reading.
///
/// `open` scans the file once, building an immutable CID-to-offset index;
/// afterwards every `get` is a positional read against the shared file
/// handle, so concurrent readers need no locking and no shared cursor.
/// All mutating operations fail with [`StoreError::ReadOnly`].
pub struct CarStore {
    file: File,
    file_len: u64,
    /// Root index node: `{heads: {...}, calls: {...}}`.
    index: Node,
    positions: HashMap<Cid, u64>,
}

impl CarStore {
    /// Open an archive file, scanning it to index every block. The scan
    /// completes before the store is returned, so the position map is
    /// never mutated once the store can be shared.
    pub fn open(path: &Path) -> Result<CarStore> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut positions = HashMap::new();
        let mut reader = CountingReader::new(BufReader::new(file.try_clone()?));

        let header_len = read_varint_opt(&mut reader)?
            .ok_or_else(|| StoreError::Corrupt("archive has no header block".into()))?;
        let header_bytes = read_block(&mut reader, header_len)?;
        let header = memodb_node::decode(&header_bytes)
            .map_err(|e| StoreError::Corrupt(format!("bad archive header: {e}")))?;

        if header.get("format").and_then(Node::as_str) != Some(FORMAT_NAME) {
            return Err(StoreError::Corrupt("not a MemoDB archive".into()));
        }
        if header.get("version").and_then(Node::as_i64) != Some(FORMAT_VERSION) {
            return Err(StoreError::Corrupt("unsupported archive version".into()));
        }
        let roots = header
            .get("roots")
            .and_then(Node::as_list)
            .ok_or_else(|| StoreError::Corrupt("archive header has no roots".into()))?;
        let root_cid = match roots {
            [Node::Link(cid)] => cid.clone(),
            _ => {
                return Err(StoreError::Corrupt(
                    "archive must declare exactly one root".into(),
                ))
            }
        };

        loop {
            let block_start = reader.position;
            let Some(block_len) = read_varint_opt(&mut reader)? else {
                break;
            };
            let block = read_block(&mut reader, block_len)?;
            let (cid, _consumed) = Cid::from_bytes_prefix(&block)
                .map_err(|e| StoreError::Corrupt(format!("bad block CID: {e}")))?;
            positions.insert(cid, block_start);
        }
        debug!(blocks = positions.len(), path = %path.display(), "scanned archive");

        let store = CarStore {
            file,
            file_len,
            index: Node::Null,
            positions,
        };
        let index = store.get(&root_cid)?;
        if index.get("heads").and_then(Node::as_map).is_none()
            || index.get("calls").and_then(Node::as_map).is_none()
        {
            return Err(StoreError::Corrupt(
                "archive index must carry heads and calls maps".into(),
            ));
        }
        Ok(CarStore { index, ..store })
    }

    /// Number of indexed blocks.
    pub fn block_count(&self) -> usize {
        self.positions.len()
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        read_full_at(&self.file, buf, offset).map_err(StoreError::Io)
    }

    /// Read the block at `offset`, returning `(cid, payload)`.
    fn read_block_at(&self, offset: u64) -> Result<(Cid, Vec<u8>)> {
        // The length varint is at most 9 bytes; read what the file has.
        let head_len = (self.file_len - offset).min(9) as usize;
        let mut head = vec![0u8; head_len];
        self.read_at(&mut head, offset)?;
        let (block_len, varint_len) = memodb_node::varint::decode_varint(&head)
            .map_err(|e| StoreError::Corrupt(format!("bad block length: {e}")))?;

        let body_offset = offset + varint_len as u64;
        if body_offset + block_len > self.file_len {
            return Err(StoreError::Corrupt("block extends past end of file".into()));
        }
        let mut block = vec![0u8; block_len as usize];
        self.read_at(&mut block, body_offset)?;

        let (cid, consumed) = Cid::from_bytes_prefix(&block)
            .map_err(|e| StoreError::Corrupt(format!("bad block CID: {e}")))?;
        Ok((cid, block[consumed..].to_vec()))
    }

    fn heads_map(&self) -> &std::collections::BTreeMap<String, Node> {
        self.index
            .get("heads")
            .and_then(Node::as_map)
            .expect("validated at open")
    }

    fn calls_map(&self) -> &std::collections::BTreeMap<String, Node> {
        self.index
            .get("calls")
            .and_then(Node::as_map)
            .expect("validated at open")
    }

    fn call_args(row: &Node) -> Option<Vec<Cid>> {
        let mut args = Vec::new();
        for item in row.get("args")?.as_list()? {
            args.push(item.as_link()?.clone());
        }
        Some(args)
    }
}

fn read_block(reader: &mut impl Read, len: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; usize::try_from(len).map_err(|_| {
        StoreError::Corrupt("block length does not fit in memory".to_string())
    })?];
    reader
        .read_exact(&mut buf)
        .map_err(|_| StoreError::Corrupt("truncated block at end of archive".to_string()))?;
    Ok(buf)
}

#[cfg(unix)]
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_full_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_read(buf, offset)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "archive shrank while reading",
            ));
        }
        buf = &mut buf[n..];
        offset += n as u64;
    }
    Ok(())
}

impl Store for CarStore {
    fn put(&self, _node: &Node) -> Result<Cid> {
        Err(StoreError::ReadOnly)
    }

    fn get_optional(&self, cid: &Cid) -> Result<Option<Node>> {
        if cid.is_identity() {
            return Ok(Some(Node::from_ipld(cid, cid.digest())?));
        }
        let Some(&offset) = self.positions.get(cid) else {
            return Ok(None);
        };
        let (stored_cid, payload) = self.read_block_at(offset)?;
        if stored_cid != *cid {
            return Err(StoreError::Corrupt(
                "block CID mismatch (file changed while reading?)".into(),
            ));
        }
        Ok(Some(Node::from_ipld(cid, &payload)?))
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(cid.is_identity() || self.positions.contains_key(cid))
    }

    fn resolve_optional(&self, name: &Name) -> Result<Option<Cid>> {
        match name {
            Name::Cid(cid) => Ok(Some(cid.clone())),
            Name::Head(head) => Ok(self
                .heads_map()
                .get(head.name())
                .and_then(Node::as_link)
                .cloned()),
            Name::Call(call) => Ok(self
                .calls_map()
                .get(&call.func)
                .and_then(|rows| rows.get(&call.args_key()))
                .and_then(|row| row.get("result"))
                .and_then(Node::as_link)
                .cloned()),
        }
    }

    fn set(&self, _name: &Name, _cid: &Cid) -> Result<()> {
        Err(StoreError::ReadOnly)
    }

    fn head_delete(&self, _head: &Head) -> Result<()> {
        Err(StoreError::ReadOnly)
    }

    fn call_invalidate(&self, _func: &str) -> Result<()> {
        Err(StoreError::ReadOnly)
    }

    fn each_head(&self, f: &mut dyn FnMut(&Head) -> bool) -> Result<()> {
        for name in self.heads_map().keys() {
            if f(&Head::new(name.clone())) {
                break;
            }
        }
        Ok(())
    }

    fn list_funcs(&self) -> Result<Vec<String>> {
        Ok(self.calls_map().keys().cloned().collect())
    }

    fn each_call(&self, func: &str, f: &mut dyn FnMut(&Call) -> bool) -> Result<()> {
        let Some(rows) = self.calls_map().get(func).and_then(Node::as_map) else {
            return Ok(());
        };
        for row in rows.values() {
            let args = Self::call_args(row)
                .ok_or_else(|| StoreError::Corrupt("malformed call row in archive".into()))?;
            if f(&Call::new(func, args)) {
                break;
            }
        }
        Ok(())
    }

    /// Only heads and calls are discoverable: the archive format carries no
    /// reverse block index, and `names_using` is allowed to be incomplete.
    fn names_using(&self, cid: &Cid) -> Result<Vec<Name>> {
        let mut result = Vec::new();
        for (name, target) in self.heads_map() {
            if target.as_link() == Some(cid) {
                result.push(Name::Head(Head::new(name.clone())));
            }
        }
        for (func, rows) in self.calls_map() {
            let Some(rows) = rows.as_map() else { continue };
            for row in rows.values() {
                if row.get("result").and_then(Node::as_link) == Some(cid) {
                    if let Some(args) = Self::call_args(row) {
                        result.push(Name::Call(Call::new(func.clone(), args)));
                    }
                }
            }
        }
        Ok(result)
    }
}
