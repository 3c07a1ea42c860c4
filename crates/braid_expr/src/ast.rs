//! Expression AST and node-reference extraction.

use crate::registry::FunctionRegistry;
use std::fmt;

/// Arithmetic and logic operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitXor,
    BitOr,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    And,
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

/// A symbolic reference to a protocol node: `#id` within the current
/// protocol, or `#proto:id` across protocols.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub protocol: Option<String>,
    pub id: String,
}

impl NodeRef {
    pub fn local(id: impl Into<String>) -> Self {
        Self {
            protocol: None,
            id: id.into(),
        }
    }

    /// The variable-map key this reference resolves through.
    pub fn qualified(&self) -> String {
        match &self.protocol {
            Some(p) => format!("{p}:{}", self.id),
            None => self.id.clone(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.qualified())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i128),
    Float(f64),
    Bool(bool),
    Str(String),
    Var(String),
    NodeRef(NodeRef),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Node references an expression depends on, split by how the dependency
/// builder must treat them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExprRefs {
    /// Plain references: an edge from the referenced node suffices.
    pub refs: Vec<NodeRef>,
    /// Range-function spans: every node between start and end (inclusive)
    /// must precede the referring node.
    pub spans: Vec<(NodeRef, NodeRef)>,
}

impl Expr {
    /// Parses an expression from source. Convenience for
    /// [`crate::parser::parse`].
    pub fn parse(src: &str) -> Result<Expr, crate::EvalError> {
        crate::parser::parse(src)
    }

    /// Collects every node reference, consulting the registry to recognize
    /// range-function calls (whose two node-id arguments denote a span, not
    /// two point dependencies).
    pub fn node_refs(&self, registry: &FunctionRegistry) -> ExprRefs {
        let mut out = ExprRefs::default();
        self.collect_refs(registry, &mut out);
        out
    }

    fn collect_refs(&self, registry: &FunctionRegistry, out: &mut ExprRefs) {
        match self {
            Expr::NodeRef(r) => out.refs.push(r.clone()),
            Expr::Unary(_, e) => e.collect_refs(registry, out),
            Expr::Binary(_, a, b) => {
                a.collect_refs(registry, out);
                b.collect_refs(registry, out);
            }
            Expr::Call(name, args) => {
                let is_range = registry.is_range(name);
                if is_range {
                    if let [Expr::NodeRef(start), Expr::NodeRef(end)] = &args[..] {
                        out.spans.push((start.clone(), end.clone()));
                        return;
                    }
                }
                for arg in args {
                    arg.collect_refs(registry, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FunctionRegistry;

    #[test]
    fn ref_extraction_sees_through_operators() {
        let reg = FunctionRegistry::new();
        let expr = Expr::parse("#a + (#b * 2) > #p:c").unwrap();
        let refs = expr.node_refs(&reg);
        assert_eq!(
            refs.refs,
            vec![
                NodeRef::local("a"),
                NodeRef::local("b"),
                NodeRef {
                    protocol: Some("p".into()),
                    id: "c".into()
                },
            ]
        );
        assert!(refs.spans.is_empty());
    }

    #[test]
    fn range_calls_become_spans() {
        let mut reg = FunctionRegistry::new();
        reg.register_range("checksumBetween", |_, _| unreachable!());
        let expr = Expr::parse("checksumBetween(#len, #data) & 0xFF").unwrap();
        let refs = expr.node_refs(&reg);
        assert!(refs.refs.is_empty());
        assert_eq!(
            refs.spans,
            vec![(NodeRef::local("len"), NodeRef::local("data"))]
        );
    }
}
