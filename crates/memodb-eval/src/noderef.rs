//! Lazy value handles.

use std::sync::Arc;

use memodb_node::{Cid, Node};
use memodb_store::Store;

use crate::error::Result;

/// A value that is either materialized or already stored. Function results
/// come in both shapes: small values are returned directly, large ones are
/// `put` by the function and returned as a CID.
#[derive(Debug, Clone)]
pub enum NodeOrCid {
    Node(Node),
    Cid(Cid),
}

impl From<Node> for NodeOrCid {
    fn from(node: Node) -> Self {
        NodeOrCid::Node(node)
    }
}

impl From<Cid> for NodeOrCid {
    fn from(cid: Cid) -> Self {
        NodeOrCid::Cid(cid)
    }
}

/// A lazy handle over a stored value: a store reference plus at least one
/// of {CID, node}.
///
/// [`NodeRef::node`] materializes the value, fetching it from the store on
/// first use; [`NodeRef::cid`] materializes the identifier, storing the
/// value on first use. [`NodeRef::free_node`] drops a large materialized
/// payload while keeping the handle addressable.
#[derive(Clone)]
pub struct NodeRef {
    store: Arc<dyn Store>,
    cid: Option<Cid>,
    node: Option<Node>,
}

impl NodeRef {
    pub fn from_cid(store: Arc<dyn Store>, cid: Cid) -> Self {
        NodeRef {
            store,
            cid: Some(cid),
            node: None,
        }
    }

    pub fn from_node(store: Arc<dyn Store>, node: Node) -> Self {
        NodeRef {
            store,
            cid: None,
            node: Some(node),
        }
    }

    pub fn new(store: Arc<dyn Store>, value: NodeOrCid) -> Self {
        match value {
            NodeOrCid::Node(node) => Self::from_node(store, node),
            NodeOrCid::Cid(cid) => Self::from_cid(store, cid),
        }
    }

    /// Both halves known up front (e.g. right after a `put`).
    pub fn from_parts(store: Arc<dyn Store>, cid: Cid, node: Node) -> Self {
        NodeRef {
            store,
            cid: Some(cid),
            node: Some(node),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The CID, if it has been computed yet.
    pub fn cid_if_known(&self) -> Option<&Cid> {
        self.cid.as_ref()
    }

    /// The value, fetching it from the store on first access.
    pub fn node(&mut self) -> Result<&Node> {
        if self.node.is_none() {
            let cid = self.cid.as_ref().expect("NodeRef holds a CID or a node");
            self.node = Some(self.store.get(cid)?);
        }
        Ok(self.node.as_ref().expect("just materialized"))
    }

    /// The CID, storing the value on first access.
    pub fn cid(&mut self) -> Result<&Cid> {
        if self.cid.is_none() {
            let node = self.node.as_ref().expect("NodeRef holds a CID or a node");
            self.cid = Some(self.store.put(node)?);
        }
        Ok(self.cid.as_ref().expect("just materialized"))
    }

    /// Collapse to CID-only, storing the value first if needed. Lets the
    /// caller drop a large payload while retaining addressability.
    pub fn free_node(&mut self) -> Result<()> {
        self.cid()?;
        self.node = None;
        Ok(())
    }
}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRef")
            .field("cid", &self.cid)
            .field("materialized", &self.node.is_some())
            .finish()
    }
}
