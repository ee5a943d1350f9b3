//! The recursive value model.
//!
//! A [`Node`] is an immutable, structurally compared value with a single
//! canonical binary encoding (see [`crate::cbor`]). Nodes are what stores
//! hold; a node referencing another stored node does so with a [`Link`]
//! carrying the target's CID, so value graphs are acyclic by construction
//! (a cycle would need a hash preimage).
//!
//! [`Link`]: Node::Link

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::cbor;
use crate::cid::{Cid, Codec};
use crate::error::CborError;

/// Canonical bit pattern for NaN. Any NaN encodes to (and compares as)
/// this pattern, which keeps encoding deterministic and equality reflexive.
pub const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

/// The kind of a node, in total-order rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Null,
    Undefined,
    Bool,
    Integer,
    Float,
    Bytes,
    String,
    List,
    Map,
    Link,
}

/// An immutable recursive value.
///
/// Integers carry their arithmetic identity, not a wire width: values in
/// `0..=i64::MAX` are always the `Int` variant, and `UInt` is reserved for
/// values above `i64::MAX`, so structural equality coincides with numeric
/// equality. Use the `From` impls or [`Node::integer`] rather than building
/// the variants directly.
#[derive(Debug, Clone)]
pub enum Node {
    Null,
    Undefined,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<Node>),
    Map(BTreeMap<String, Node>),
    Link(Cid),
}

impl Node {
    pub fn kind(&self) -> Kind {
        match self {
            Node::Null => Kind::Null,
            Node::Undefined => Kind::Undefined,
            Node::Bool(_) => Kind::Bool,
            Node::Int(_) | Node::UInt(_) => Kind::Integer,
            Node::Float(_) => Kind::Float,
            Node::Bytes(_) => Kind::Bytes,
            Node::String(_) => Kind::String,
            Node::List(_) => Kind::List,
            Node::Map(_) => Kind::Map,
            Node::Link(_) => Kind::Link,
        }
    }

    /// An unsigned integer in canonical variant form.
    pub fn integer(value: u64) -> Node {
        if value <= i64::MAX as u64 {
            Node::Int(value as i64)
        } else {
            Node::UInt(value)
        }
    }

    /// An empty map.
    pub fn map() -> Node {
        Node::Map(BTreeMap::new())
    }

    /// An empty list.
    pub fn list() -> Node {
        Node::List(Vec::new())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Int(i) => Some(*i),
            Node::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Node::Int(i) if *i >= 0 => Some(*i as u64),
            Node::UInt(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Node::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&Cid> {
        match self {
            Node::Link(cid) => Some(cid),
            _ => None,
        }
    }

    /// Map lookup; `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// List index; `None` for non-lists and out-of-range indexes.
    pub fn at(&self, index: usize) -> Option<&Node> {
        self.as_list().and_then(|l| l.get(index))
    }

    /// Every CID this node references, depth first, duplicates included.
    pub fn links(&self) -> Vec<Cid> {
        let mut out = Vec::new();
        self.collect_links(&mut out);
        out
    }

    fn collect_links(&self, out: &mut Vec<Cid>) {
        match self {
            Node::Link(cid) => out.push(cid.clone()),
            Node::List(items) => {
                for item in items {
                    item.collect_links(out);
                }
            }
            Node::Map(map) => {
                for value in map.values() {
                    value.collect_links(out);
                }
            }
            _ => {}
        }
    }

    /// The storable form of this node: its CID and the bytes the CID was
    /// derived from. Byte nodes use the raw codec (and inline under the
    /// identity threshold); everything else is canonical dag-cbor.
    pub fn to_ipld(&self) -> (Cid, Vec<u8>) {
        let (codec, bytes) = match self {
            Node::Bytes(b) => (Codec::Raw, b.clone()),
            other => (Codec::DagCbor, cbor::encode(other)),
        };
        (Cid::of(codec, &bytes), bytes)
    }

    /// Reconstruct a node from stored bytes, interpreting them per the
    /// CID's codec. For identity CIDs pass the digest as the bytes.
    pub fn from_ipld(cid: &Cid, bytes: &[u8]) -> Result<Node, CborError> {
        match cid.codec() {
            Codec::Raw => Ok(Node::Bytes(bytes.to_vec())),
            Codec::DagCbor => cbor::decode(bytes),
        }
    }

    fn float_key(f: f64) -> u64 {
        if f.is_nan() {
            CANONICAL_NAN_BITS
        } else {
            f.to_bits()
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    /// Total order: kind rank first, then payload. Integers compare by
    /// arithmetic value across the two variants; floats use IEEE total
    /// order with NaN canonicalized; lists elementwise; maps as their
    /// sorted (key, value) sequences.
    fn cmp(&self, other: &Self) -> Ordering {
        use Node::*;
        match (self, other) {
            (Null, Null) | (Undefined, Undefined) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (UInt(a), UInt(b)) => a.cmp(b),
            (Int(a), UInt(b)) => {
                if *a < 0 {
                    Ordering::Less
                } else {
                    (*a as u64).cmp(b)
                }
            }
            (UInt(a), Int(b)) => {
                if *b < 0 {
                    Ordering::Greater
                } else {
                    a.cmp(&(*b as u64))
                }
            }
            (Float(a), Float(b)) => f64::from_bits(Node::float_key(*a))
                .total_cmp(&f64::from_bits(Node::float_key(*b))),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (List(a), List(b)) => a.iter().cmp(b.iter()),
            (Map(a), Map(b)) => a.iter().cmp(b.iter()),
            (Link(a), Link(b)) => a.to_bytes().cmp(&b.to_bytes()),
            (a, b) => a.kind().cmp(&b.kind()),
        }
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::Bool(value)
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Node::Int(value)
    }
}

impl From<i32> for Node {
    fn from(value: i32) -> Self {
        Node::Int(value.into())
    }
}

impl From<u64> for Node {
    fn from(value: u64) -> Self {
        Node::integer(value)
    }
}

impl From<u32> for Node {
    fn from(value: u32) -> Self {
        Node::Int(value.into())
    }
}

impl From<f64> for Node {
    fn from(value: f64) -> Self {
        Node::Float(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::String(value.to_string())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::String(value)
    }
}

impl From<Vec<u8>> for Node {
    fn from(value: Vec<u8>) -> Self {
        Node::Bytes(value)
    }
}

impl From<&[u8]> for Node {
    fn from(value: &[u8]) -> Self {
        Node::Bytes(value.to_vec())
    }
}

impl From<Cid> for Node {
    fn from(value: Cid) -> Self {
        Node::Link(value)
    }
}

impl From<Vec<Node>> for Node {
    fn from(value: Vec<Node>) -> Self {
        Node::List(value)
    }
}

impl From<BTreeMap<String, Node>> for Node {
    fn from(value: BTreeMap<String, Node>) -> Self {
        Node::Map(value)
    }
}

impl FromIterator<Node> for Node {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        Node::List(iter.into_iter().collect())
    }
}

impl FromIterator<(String, Node)> for Node {
    fn from_iter<T: IntoIterator<Item = (String, Node)>>(iter: T) -> Self {
        Node::Map(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_undefined_are_distinct() {
        assert_ne!(Node::Null, Node::Undefined);
        assert!(Node::Null < Node::Undefined);
    }

    #[test]
    fn integer_variants_compare_arithmetically() {
        assert_eq!(Node::Int(5), Node::UInt(5));
        assert_eq!(Node::from(5u64), Node::Int(5));
        assert!(Node::Int(-1) < Node::UInt(0));
        assert!(Node::UInt(u64::MAX) > Node::Int(i64::MAX));
    }

    #[test]
    fn integer_constructor_is_canonical() {
        assert!(matches!(Node::integer(7), Node::Int(7)));
        assert!(matches!(Node::integer(u64::MAX), Node::UInt(_)));
        assert!(matches!(
            Node::integer(i64::MAX as u64),
            Node::Int(i64::MAX)
        ));
    }

    #[test]
    fn nan_equals_itself() {
        assert_eq!(Node::Float(f64::NAN), Node::Float(f64::NAN));
        // Any NaN payload compares equal to the canonical one.
        let exotic = f64::from_bits(0x7ff8_0000_0000_0001);
        assert_eq!(Node::Float(exotic), Node::Float(f64::NAN));
    }

    #[test]
    fn negative_zero_is_not_zero() {
        assert_ne!(Node::Float(0.0), Node::Float(-0.0));
        assert!(Node::Float(-0.0) < Node::Float(0.0));
    }

    #[test]
    fn kind_rank_orders_across_kinds() {
        let ascending = [
            Node::Null,
            Node::Undefined,
            Node::Bool(true),
            Node::Int(9),
            Node::Float(0.5),
            Node::Bytes(vec![1]),
            Node::from("a"),
            Node::list(),
            Node::map(),
            Node::Link(Cid::of(Codec::Raw, b"x")),
        ];
        for pair in ascending.windows(2) {
            assert!(pair[0] < pair[1], "{:?} < {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn lists_compare_elementwise() {
        let a: Node = vec![Node::Int(1), Node::Int(2)].into();
        let b: Node = vec![Node::Int(1), Node::Int(3)].into();
        let c: Node = vec![Node::Int(1)].into();
        assert!(a < b);
        assert!(c < a);
    }

    #[test]
    fn maps_compare_by_sorted_entries() {
        let a: Node = [("a".to_string(), Node::Int(1))].into_iter().collect();
        let b: Node = [("b".to_string(), Node::Int(0))].into_iter().collect();
        assert!(a < b);
        assert_eq!(
            a,
            [("a".to_string(), Node::Int(1))].into_iter().collect::<Node>()
        );
    }

    #[test]
    fn links_walk_finds_nested_cids() {
        let leaf = Cid::of(Codec::Raw, b"leaf");
        let other = Cid::of(Codec::DagCbor, b"other");
        let node: Node = [
            ("one".to_string(), Node::Link(leaf.clone())),
            (
                "many".to_string(),
                vec![Node::Int(1), Node::Link(other.clone())].into(),
            ),
        ]
        .into_iter()
        .collect();
        let links = node.links();
        assert_eq!(links.len(), 2);
        assert!(links.contains(&leaf));
        assert!(links.contains(&other));
    }

    #[test]
    fn bytes_nodes_store_as_raw() {
        let (cid, bytes) = Node::Bytes(b"abc".to_vec()).to_ipld();
        assert_eq!(cid.codec(), Codec::Raw);
        assert_eq!(bytes, b"abc");
        assert!(cid.is_identity());
        assert_eq!(Node::from_ipld(&cid, &bytes).unwrap(), Node::from(&b"abc"[..]));
    }

    #[test]
    fn structured_nodes_store_as_dag_cbor() {
        let node: Node = vec![Node::Int(1), Node::Int(2)].into();
        let (cid, bytes) = node.to_ipld();
        assert_eq!(cid.codec(), Codec::DagCbor);
        assert_eq!(Node::from_ipld(&cid, &bytes).unwrap(), node);
    }

    #[test]
    fn accessors() {
        let map: Node = [
            ("n".to_string(), Node::Int(3)),
            ("s".to_string(), Node::from("str")),
            ("l".to_string(), vec![Node::Bool(true)].into()),
        ]
        .into_iter()
        .collect();
        assert_eq!(map.get("n").and_then(Node::as_u64), Some(3));
        assert_eq!(map.get("s").and_then(Node::as_str), Some("str"));
        assert_eq!(
            map.get("l").and_then(|l| l.at(0)).and_then(Node::as_bool),
            Some(true)
        );
        assert!(map.get("missing").is_none());
        assert!(map.at(0).is_none());
    }
}
