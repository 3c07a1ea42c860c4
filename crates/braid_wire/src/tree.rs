//! Protocol trees and their compiled form.
//!
//! A [`Protocol`] is the declarative header/body/tail tree assembled by a
//! loader (builder API, schema file, or the `ProtocolDef` derive).
//! [`Protocol::compile`] expands node groups, re-sequences siblings by
//! their `order` keys, flattens everything into a pre-order `Vec`, builds
//! the id index, parses every expression and runs the format validator.
//! The compiled tree is immutable; encode/decode runs keep their state on
//! the side.

use crate::error::{CodecError, Result};
use crate::node::{expand_groups, CondAction, Node, NodeBody};
use crate::range_spec::RangeSpec;
use crate::validate;
use ahash::AHashMap;
use braid_expr::Expr;

#[derive(Debug, Clone, Default)]
pub struct Protocol {
    pub id: String,
    pub name: String,
    pub header: Option<Node>,
    pub body: Option<Node>,
    pub tail: Option<Node>,
    pub extra: Vec<Node>,
}

impl Protocol {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Wraps the fields in a structural `header` container.
    pub fn header(self, children: Vec<Node>) -> Self {
        self.header_node(Node::structural("header", children))
    }

    /// Installs a custom header container (e.g. one with a fixed length).
    pub fn header_node(mut self, node: Node) -> Self {
        self.header = Some(node);
        self
    }

    pub fn body(self, children: Vec<Node>) -> Self {
        self.body_node(Node::structural("body", children))
    }

    pub fn body_node(mut self, node: Node) -> Self {
        self.body = Some(node);
        self
    }

    pub fn tail(self, children: Vec<Node>) -> Self {
        self.tail_node(Node::structural("tail", children))
    }

    pub fn tail_node(mut self, node: Node) -> Self {
        self.tail = Some(node);
        self
    }

    pub fn extra(mut self, node: Node) -> Self {
        self.extra.push(node);
        self
    }

    /// Validates and freezes the tree.
    pub fn compile(self) -> Result<CompiledProtocol> {
        let Protocol {
            id,
            name,
            header,
            body,
            tail,
            extra,
        } = self;

        let mut root_nodes: Vec<Node> = Vec::new();
        root_nodes.extend(header);
        root_nodes.extend(body);
        root_nodes.extend(tail);
        root_nodes.extend(extra);
        if root_nodes.is_empty() {
            return Err(CodecError::format(
                &id,
                "protocol needs at least one of header, body, tail",
            ));
        }

        let mut compiled = CompiledProtocol {
            id: id.clone(),
            name,
            nodes: Vec::new(),
            roots: Vec::new(),
            index: AHashMap::new(),
        };

        for root in root_nodes {
            let root = expand_groups(root, &id)?;
            let idx = compiled.flatten(root, None, &id)?;
            compiled.roots.push(idx);
        }

        validate::check(&mut compiled)?;
        log::debug!(
            "compiled protocol `{}`: {} node(s)",
            compiled.id,
            compiled.nodes.len()
        );
        Ok(compiled)
    }
}

/// Per-node compiled artifacts: parsed expressions, parsed range spec,
/// priority-sorted conditional rules.
#[derive(Debug, Clone)]
pub struct CompiledNode {
    /// Declarative metadata; structural children are moved into the flat
    /// vec and reachable through `children`.
    pub node: Node,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// `protocol/container/…/id`, for diagnostics.
    pub path: String,
    pub(crate) forward: Option<Expr>,
    pub(crate) backward: Option<Expr>,
    pub(crate) length: Option<Expr>,
    pub(crate) pad_length: Option<Expr>,
    pub(crate) pad_enable: Option<Expr>,
    pub(crate) conds: Vec<CompiledCond>,
    pub(crate) range: Option<RangeSpec>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledCond {
    pub ref_id: String,
    pub expr: Expr,
    pub expr_src: String,
    pub on_match: CondAction,
    pub on_mismatch: CondAction,
}

#[derive(Debug, Clone)]
pub struct CompiledProtocol {
    pub id: String,
    pub name: String,
    /// Flat nodes in pre-order; an index into this vec is a node handle.
    nodes: Vec<CompiledNode>,
    roots: Vec<usize>,
    index: AHashMap<String, usize>,
}

impl CompiledProtocol {
    /// Appends `node` and its subtree in pre-order, returning its index.
    fn flatten(&mut self, mut node: Node, parent: Option<usize>, parent_path: &str) -> Result<usize> {
        let path = format!("{parent_path}/{}", node.id);

        let mut children = match &mut node.body {
            NodeBody::Structural { children } => {
                let mut taken = std::mem::take(children);
                // Fractional sort keys re-sequence siblings; stable sort
                // keeps declared order for equal keys.
                taken.sort_by(|a, b| a.order.total_cmp(&b.order));
                taken
            }
            _ => Vec::new(),
        };

        let idx = self.nodes.len();
        self.nodes.push(CompiledNode {
            node,
            parent,
            children: Vec::new(),
            path,
            forward: None,
            backward: None,
            length: None,
            pad_length: None,
            pad_enable: None,
            conds: Vec::new(),
            range: None,
        });

        if let Some(prev) = self.index.insert(self.nodes[idx].node.id.clone(), idx) {
            let prev_path = self.nodes[prev].path.clone();
            return Err(CodecError::format(
                self.nodes[idx].path.clone(),
                format!("duplicate node id (also at `{prev_path}`)"),
            ));
        }

        let child_path = self.nodes[idx].path.clone();
        for child in children.drain(..) {
            let child_idx = self.flatten(child, Some(idx), &child_path)?;
            self.nodes[idx].children.push(child_idx);
        }
        Ok(idx)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, idx: usize) -> &CompiledNode {
        &self.nodes[idx]
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> &mut CompiledNode {
        &mut self.nodes[idx]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (usize, &CompiledNode)> {
        self.nodes.iter().enumerate()
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn lookup(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Indexes of bit-carrying nodes (leaves and padding) in wire order.
    pub fn wire_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.node.is_wire())
            .map(|(i, _)| i)
    }

    /// Whether the subtree rooted at `idx` contains any wire node.
    pub(crate) fn subtree_has_wire(&self, idx: usize) -> bool {
        let n = &self.nodes[idx];
        n.node.is_wire() || n.children.iter().any(|&c| self.subtree_has_wire(c))
    }

    /// Last flat index belonging to the subtree rooted at `idx` (pre-order
    /// flattening makes subtrees contiguous).
    pub(crate) fn subtree_end(&self, idx: usize) -> usize {
        let n = &self.nodes[idx];
        match n.children.last() {
            Some(&last) => self.subtree_end(last),
            None => idx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ValueKind;

    fn tiny() -> Protocol {
        Protocol::new("t")
            .header(vec![Node::uint("a", 8).value("1")])
            .body(vec![
                Node::uint("b", 8).value("2"),
                Node::structural("inner", vec![Node::uint("c", 4).value("3")]),
            ])
    }

    #[test]
    fn flatten_is_preorder() {
        let p = tiny().compile().unwrap();
        let ids: Vec<&str> = p.nodes().map(|(_, n)| n.node.id.as_str()).collect();
        assert_eq!(ids, vec!["header", "a", "body", "b", "inner", "c"]);
        assert_eq!(p.roots().len(), 2);
        assert_eq!(p.lookup("c"), Some(5));
        assert_eq!(p.get(5).parent, Some(4));
        assert_eq!(p.get(5).path, "t/body/inner/c");
    }

    #[test]
    fn duplicate_ids_rejected() {
        let p = Protocol::new("t").body(vec![
            Node::uint("x", 8).value("0"),
            Node::uint("x", 8).value("0"),
        ]);
        assert!(matches!(
            p.compile(),
            Err(CodecError::Format { .. })
        ));
    }

    #[test]
    fn sibling_order_keys_apply() {
        let p = Protocol::new("t")
            .body(vec![
                Node::uint("second", 8).value("0").order(2.0),
                Node::uint("first", 8).value("0").order(1.5),
            ])
            .compile()
            .unwrap();
        let ids: Vec<&str> = p.nodes().map(|(_, n)| n.node.id.as_str()).collect();
        assert_eq!(ids, vec!["body", "first", "second"]);
    }

    #[test]
    fn empty_protocol_rejected() {
        assert!(Protocol::new("t").compile().is_err());
    }

    #[test]
    fn group_nodes_flatten_disambiguated() {
        let p = Protocol::new("t")
            .body(vec![Node::group(
                "rep",
                vec![Node::leaf("v", ValueKind::Uint, 8).value("0")],
                3,
            )])
            .compile()
            .unwrap();
        assert!(p.lookup("v_1").is_some());
        assert!(p.lookup("v_2").is_some());
        assert!(p.lookup("v_3").is_some());
        assert!(p.lookup("v").is_none());
    }
}
