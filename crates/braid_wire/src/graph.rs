//! Dependency graph and topological scheduling order.
//!
//! Built fresh per encode/decode call from the compiled tree: an edge
//! `a -> b` means node `a` must be fully evaluated before node `b`.
//! Sources of edges:
//!
//!  * containers before their descendants (conditional state flows down),
//!  * expression references (`#id`, `#proto:id` stays cross-protocol and
//!    adds no edge),
//!  * range-function calls: every wire node inside the span,
//!  * conditional rules: the referenced node before the owner,
//!  * padding: everything whose actual length the filler must observe.

use crate::error::{CodecError, Result};
use crate::node::{NodeBody, PaddingStrategy};
use crate::tree::CompiledProtocol;
use ahash::AHashSet;
use braid_expr::{Expr, FunctionRegistry, NodeRef};
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub(crate) struct DependencyGraph {
    out: Vec<SmallVec<[usize; 4]>>,
    in_degree: Vec<usize>,
}

/// Which run the graph schedules. Encode is driven by forward
/// expressions; decode by length and backward expressions. Building one
/// graph for both would knot a false cycle out of a length field that is
/// computed from its payload on the way out and gives that payload its
/// size on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Encode,
    Decode,
}

pub(crate) fn build(
    proto: &CompiledProtocol,
    registry: &FunctionRegistry,
    mode: Mode,
) -> Result<DependencyGraph> {
    let n = proto.len();
    let mut graph = DependencyGraph {
        out: vec![SmallVec::new(); n],
        in_degree: vec![0; n],
    };
    let mut seen: AHashSet<(usize, usize)> = AHashSet::new();

    let mut add_edge = |graph: &mut DependencyGraph, from: usize, to: usize| {
        if from != to && seen.insert((from, to)) {
            graph.out[from].push(to);
            graph.in_degree[to] += 1;
        }
    };

    // Local resolution of a node reference; cross-protocol references are
    // satisfied by the global registry and need no edge.
    let resolve = |r: &NodeRef, path: &str| -> Result<Option<usize>> {
        match &r.protocol {
            Some(p) if p != &proto.id => Ok(None),
            _ => proto
                .lookup(&r.id)
                .map(Some)
                .ok_or_else(|| CodecError::MissingNode {
                    path: path.to_owned(),
                    id: r.id.clone(),
                }),
        }
    };

    for (idx, cn) in proto.nodes() {
        for &child in &cn.children {
            add_edge(&mut graph, idx, child);
        }

        let none: Option<Expr> = None;
        let exprs: [&Option<Expr>; 4] = match mode {
            Mode::Encode => [&cn.forward, &cn.pad_length, &cn.pad_enable, &none],
            Mode::Decode => [&cn.length, &cn.backward, &cn.pad_length, &cn.pad_enable],
        };
        for expr in exprs.into_iter().flatten() {
            let refs = expr.node_refs(registry);
            for r in &refs.refs {
                if let Some(dep) = resolve(r, &cn.path)? {
                    add_edge(&mut graph, dep, idx);
                }
            }
            for (start, end) in &refs.spans {
                let (Some(a), Some(b)) = (resolve(start, &cn.path)?, resolve(end, &cn.path)?)
                else {
                    return Err(CodecError::format(
                        &cn.path,
                        "range spans cannot cross protocols",
                    ));
                };
                if a > b {
                    return Err(CodecError::format(
                        &cn.path,
                        format!("span start `{}` does not precede end `{}`", start.id, end.id),
                    ));
                }
                for i in a..=b {
                    if proto.get(i).node.is_wire() {
                        add_edge(&mut graph, i, idx);
                    }
                }
            }
        }

        for cond in &cn.conds {
            // Validated to exist at compile time.
            let dep = proto.lookup(&cond.ref_id).unwrap();
            add_edge(&mut graph, dep, idx);
        }

        if let NodeBody::Padding { config } = &cn.node.body {
            match config.strategy {
                // The filler length depends on every preceding node's
                // *actual* encoded length, not the declared one.
                PaddingStrategy::FixedLength | PaddingStrategy::Alignment => {
                    for i in (0..idx).filter(|&i| proto.get(i).node.is_wire()) {
                        add_edge(&mut graph, i, idx);
                    }
                }
                PaddingStrategy::FillContainer => {
                    let parent = cn.parent.expect("validated");
                    for i in (parent + 1..idx).filter(|&i| proto.get(i).node.is_wire()) {
                        add_edge(&mut graph, i, idx);
                    }
                }
                PaddingStrategy::Dynamic => {}
            }
        }
    }

    Ok(graph)
}

impl DependencyGraph {
    /// Kahn's algorithm; ties broken by flat index, i.e. the tree's
    /// pre-order, so dependency-free trees encode in declared order.
    pub(crate) fn topo_order(&self, proto: &CompiledProtocol) -> Result<Vec<usize>> {
        let n = self.out.len();
        let mut in_degree = self.in_degree.clone();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(u)) = ready.pop() {
            order.push(u);
            for &v in &self.out[u] {
                in_degree[v] -= 1;
                if in_degree[v] == 0 {
                    ready.push(Reverse(v));
                }
            }
        }

        if order.len() < n {
            let cycle = self
                .find_cycle()
                .expect("Kahn left nodes, so a cycle exists");
            return Err(CodecError::CyclicDependency {
                cycle: cycle
                    .into_iter()
                    .map(|i| proto.get(i).node.id.clone())
                    .collect(),
            });
        }
        log::trace!("topological order: {order:?}");
        Ok(order)
    }

    /// DFS with a recursion stack; a back edge closes the reported cycle.
    fn find_cycle(&self) -> Option<Vec<usize>> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        fn visit(
            u: usize,
            out: &[SmallVec<[usize; 4]>],
            color: &mut [u8],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            color[u] = GRAY;
            stack.push(u);
            for &v in &out[u] {
                match color[v] {
                    WHITE => {
                        if let Some(cycle) = visit(v, out, color, stack) {
                            return Some(cycle);
                        }
                    }
                    GRAY => {
                        let pos = stack.iter().position(|&x| x == v).unwrap();
                        let mut cycle = stack[pos..].to_vec();
                        cycle.push(v);
                        return Some(cycle);
                    }
                    _ => {}
                }
            }
            stack.pop();
            color[u] = BLACK;
            None
        }

        let mut color = vec![WHITE; self.out.len()];
        let mut stack = Vec::new();
        for u in 0..self.out.len() {
            if color[u] == WHITE {
                if let Some(cycle) = visit(u, &self.out, &mut color, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::registry::default_registry;
    use crate::tree::Protocol;

    fn order_ids(proto: &CompiledProtocol) -> Vec<String> {
        let graph = build(proto, default_registry(), Mode::Encode).unwrap();
        graph
            .topo_order(proto)
            .unwrap()
            .into_iter()
            .map(|i| proto.get(i).node.id.clone())
            .collect()
    }

    #[test]
    fn no_dependencies_keeps_preorder() {
        let p = Protocol::new("t")
            .header(vec![Node::uint("a", 8).value("0")])
            .body(vec![Node::uint("b", 8).value("0"), Node::uint("c", 8).value("0")])
            .compile()
            .unwrap();
        assert_eq!(order_ids(&p), vec!["header", "a", "body", "b", "c"]);
    }

    #[test]
    fn forward_reference_reorders() {
        // `len` precedes `data` on the wire but depends on it.
        let p = Protocol::new("t")
            .body(vec![
                Node::uint("len", 16).forward("length(#data)"),
                Node::hex("data", 32).value("0xDEADBEEF"),
            ])
            .compile()
            .unwrap();
        let ids = order_ids(&p);
        let len_pos = ids.iter().position(|i| i == "len").unwrap();
        let data_pos = ids.iter().position(|i| i == "data").unwrap();
        assert!(data_pos < len_pos);
    }

    #[test]
    fn cycle_reported_in_order() {
        let p = Protocol::new("t")
            .body(vec![
                Node::uint("A", 8).forward("#B + 1"),
                Node::uint("B", 8).forward("#A + 1"),
            ])
            .compile()
            .unwrap();
        let graph = build(&p, default_registry(), Mode::Encode).unwrap();
        match graph.topo_order(&p) {
            Err(CodecError::CyclicDependency { cycle }) => {
                assert_eq!(cycle.len(), 3);
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"A".to_owned()) && cycle.contains(&"B".to_owned()));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_reference_is_missing_node() {
        let p = Protocol::new("t")
            .body(vec![Node::uint("n", 8).forward("#ghost + 1")])
            .compile()
            .unwrap();
        assert!(matches!(
            build(&p, default_registry(), Mode::Encode),
            Err(CodecError::MissingNode { .. })
        ));
    }

    #[test]
    fn span_orders_every_member_before_caller() {
        let p = Protocol::new("t")
            .body(vec![
                Node::uint("sum", 8).forward("checksumBetween(#len, #data)"),
                Node::uint("len", 16).forward("length(#data)"),
                Node::hex("data", 32).value("0xDEADBEEF"),
            ])
            .compile()
            .unwrap();
        let ids = order_ids(&p);
        let pos = |id: &str| ids.iter().position(|i| i == id).unwrap();
        assert!(pos("data") < pos("len"));
        assert!(pos("len") < pos("sum"));
    }
}
