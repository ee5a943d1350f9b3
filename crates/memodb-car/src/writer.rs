//! Archive writer: bundle a store (or hand-picked blocks) into the
//! single-file archive format.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memodb_node::varint::encode_varint;
use memodb_node::{cbor, Cid, Node};
use memodb_store::{Call, Result, Store};
use tracing::debug;

use crate::format::{FORMAT_NAME, FORMAT_VERSION};

/// Builds an archive from blocks, head bindings, and call bindings.
///
/// `finish` assembles the index node, derives the root CID, and writes
/// header plus blocks in one pass. Identity-CID blocks are skipped: they
/// carry their content in the CID itself.
pub struct CarWriter {
    blocks: Vec<(Cid, Vec<u8>)>,
    seen: HashSet<Cid>,
    heads: BTreeMap<String, Cid>,
    calls: BTreeMap<String, BTreeMap<String, (Vec<Cid>, Cid)>>,
}

impl Default for CarWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CarWriter {
    pub fn new() -> Self {
        CarWriter {
            blocks: Vec::new(),
            seen: HashSet::new(),
            heads: BTreeMap::new(),
            calls: BTreeMap::new(),
        }
    }

    /// Queue a block under a known CID. Duplicate and identity CIDs are
    /// dropped.
    pub fn add_block(&mut self, cid: Cid, payload: Vec<u8>) {
        if cid.is_identity() || !self.seen.insert(cid.clone()) {
            return;
        }
        self.blocks.push((cid, payload));
    }

    /// Queue a node, returning the CID it will be stored under.
    pub fn add_node(&mut self, node: &Node) -> Cid {
        let (cid, payload) = node.to_ipld();
        self.add_block(cid.clone(), payload);
        cid
    }

    pub fn set_head(&mut self, name: impl Into<String>, cid: Cid) {
        self.heads.insert(name.into(), cid);
    }

    pub fn set_call(&mut self, call: &Call, result: Cid) {
        self.calls
            .entry(call.func.clone())
            .or_default()
            .insert(call.args_key(), (call.args.clone(), result));
    }

    /// Number of queued blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Write the archive and return the root CID.
    pub fn finish(mut self, path: &Path) -> Result<Cid> {
        let index = self.build_index();
        let (root_cid, root_bytes) = index.to_ipld();
        self.add_block(root_cid.clone(), root_bytes);

        let header: Node = [
            ("format".to_string(), Node::from(FORMAT_NAME)),
            ("version".to_string(), Node::Int(FORMAT_VERSION)),
            (
                "roots".to_string(),
                Node::List(vec![Node::Link(root_cid.clone())]),
            ),
        ]
        .into_iter()
        .collect();

        let mut out = BufWriter::new(File::create(path)?);
        write_frame(&mut out, &cbor::encode(&header))?;
        for (cid, payload) in &self.blocks {
            let mut block = cid.to_bytes();
            block.extend_from_slice(payload);
            write_frame(&mut out, &block)?;
        }
        out.flush()?;
        debug!(blocks = self.blocks.len(), path = %path.display(), "wrote archive");
        Ok(root_cid)
    }

    fn build_index(&self) -> Node {
        let heads: Node = self
            .heads
            .iter()
            .map(|(name, cid)| (name.clone(), Node::Link(cid.clone())))
            .collect();
        let calls: Node = self
            .calls
            .iter()
            .map(|(func, rows)| {
                let rows: Node = rows
                    .iter()
                    .map(|(key, (args, result))| {
                        let row: Node = [
                            (
                                "args".to_string(),
                                Node::List(
                                    args.iter().cloned().map(Node::Link).collect(),
                                ),
                            ),
                            ("result".to_string(), Node::Link(result.clone())),
                        ]
                        .into_iter()
                        .collect();
                        (key.clone(), row)
                    })
                    .collect();
                (func.clone(), rows)
            })
            .collect();
        [
            ("calls".to_string(), calls),
            ("heads".to_string(), heads),
        ]
        .into_iter()
        .collect()
    }
}

fn write_frame(out: &mut impl Write, bytes: &[u8]) -> Result<()> {
    let mut len = Vec::with_capacity(2);
    encode_varint(&mut len, bytes.len() as u64);
    out.write_all(&len)?;
    out.write_all(bytes)?;
    Ok(())
}

/// Bundle everything reachable from a store's heads and calls into an
/// archive file, returning the root CID.
pub fn export(store: &dyn Store, path: &Path) -> Result<Cid> {
    let mut writer = CarWriter::new();
    let mut queue: VecDeque<Cid> = VecDeque::new();

    for head in store.list_heads()? {
        let cid = store.resolve(&memodb_store::Name::Head(head.clone()))?;
        writer.set_head(head.name(), cid.clone());
        queue.push_back(cid);
    }
    for func in store.list_funcs()? {
        for call in store.list_calls(&func)? {
            let result = store.resolve(&memodb_store::Name::Call(call.clone()))?;
            writer.set_call(&call, result.clone());
            queue.extend(call.args.iter().cloned());
            queue.push_back(result);
        }
    }

    let mut visited = HashSet::new();
    while let Some(cid) = queue.pop_front() {
        if cid.is_identity() || !visited.insert(cid.clone()) {
            continue;
        }
        let node = store.get(&cid)?;
        queue.extend(node.links());
        let (_, payload) = node.to_ipld();
        writer.add_block(cid, payload);
    }

    writer.finish(path)
}
