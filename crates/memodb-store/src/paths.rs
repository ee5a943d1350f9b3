//! Embedded-path introspection: where inside a node does a link live?

use memodb_node::{Cid, Node};

/// One step along a path from a root value to an embedded link: a map key
/// or a list index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Index(usize),
    Key(String),
}

impl std::fmt::Display for PathStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathStep::Index(i) => write!(f, "{i}"),
            PathStep::Key(k) => f.write_str(k),
        }
    }
}

/// Every path from the root of `node` to a link equal to `target`.
pub fn paths_within(node: &Node, target: &Cid) -> Vec<Vec<PathStep>> {
    let mut result = Vec::new();
    let mut current = Vec::new();
    recurse(node, target, &mut current, &mut result);
    result
}

fn recurse(
    node: &Node,
    target: &Cid,
    current: &mut Vec<PathStep>,
    result: &mut Vec<Vec<PathStep>>,
) {
    match node {
        Node::Link(cid) => {
            if cid == target {
                result.push(current.clone());
            }
        }
        Node::List(items) => {
            for (i, item) in items.iter().enumerate() {
                current.push(PathStep::Index(i));
                recurse(item, target, current, result);
                current.pop();
            }
        }
        Node::Map(map) => {
            for (key, value) in map {
                current.push(PathStep::Key(key.clone()));
                recurse(value, target, current, result);
                current.pop();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memodb_node::Codec;

    #[test]
    fn finds_nested_paths() {
        let target = Cid::of(Codec::Raw, b"t");
        let other = Cid::of(Codec::Raw, b"o");
        let node: Node = [
            (
                "list".to_string(),
                Node::List(vec![Node::Link(other), Node::Link(target.clone())]),
            ),
            ("direct".to_string(), Node::Link(target.clone())),
        ]
        .into_iter()
        .collect();

        let paths = paths_within(&node, &target);
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&vec![PathStep::Key("direct".into())]));
        assert!(paths.contains(&vec![
            PathStep::Key("list".into()),
            PathStep::Index(1)
        ]));
    }

    #[test]
    fn no_match_means_no_paths() {
        let target = Cid::of(Codec::Raw, b"t");
        assert!(paths_within(&Node::Int(1), &target).is_empty());
        assert!(paths_within(&Node::List(vec![Node::Null]), &target).is_empty());
    }
}
