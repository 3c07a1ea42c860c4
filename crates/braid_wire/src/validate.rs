//! Pre-flight tree validation.
//!
//! Runs once at compile time: id and length legality, literal-or-expression
//! presence, range specs, enum literals, padding configuration, conditional
//! references. Expressions are parsed here and stored on the compiled node
//! so the schedulers never re-parse.

use crate::error::{CodecError, Result};
use crate::node::{NodeBody, PaddingStrategy, ValueKind};
use crate::range_spec::RangeSpec;
use crate::tree::{CompiledCond, CompiledProtocol};
use crate::value_fmt::parse_int_literal;
use braid_expr::Expr;

pub(crate) fn check(proto: &mut CompiledProtocol) -> Result<()> {
    for idx in 0..proto.len() {
        check_node(proto, idx)?;
    }
    Ok(())
}

fn parse_expr(src: &str, path: &str, what: &str) -> Result<Expr> {
    Expr::parse(src).map_err(|e| {
        CodecError::format(path, format!("unparseable {what} expression `{src}`: {e}"))
    })
}

fn check_node(proto: &mut CompiledProtocol, idx: usize) -> Result<()> {
    let cn = proto.get(idx);
    let path = cn.path.clone();
    let node = cn.node.clone();

    if node.id.is_empty() {
        return Err(CodecError::format(&path, "empty node id"));
    }

    match &node.body {
        NodeBody::Leaf { kind } => {
            check_length(*kind, node.length_bits, &path)?;
            if node.value.is_none() && node.forward_expr.is_none() && !node.optional {
                return Err(CodecError::format(
                    &path,
                    "field needs a literal value, a forward expression, or optional=true",
                ));
            }
            if let Some(enums) = &node.enums {
                if enums.is_empty() {
                    return Err(CodecError::format(&path, "empty enumerant list"));
                }
                if matches!(
                    kind,
                    ValueKind::Uint | ValueKind::Int | ValueKind::Bit | ValueKind::Time
                ) {
                    for (wire, label) in enums.entries() {
                        parse_int_literal(wire).map_err(|e| {
                            CodecError::format(
                                &path,
                                format!("enumerant `{label}` has a bad wire literal: {e}"),
                            )
                        })?;
                    }
                }
            }
        }
        NodeBody::Structural { .. } => {}
        NodeBody::Group { .. } => {
            // Groups are expanded before flattening; one surviving here is
            // a programming error in the loader.
            return Err(CodecError::format(&path, "unexpanded node group"));
        }
        NodeBody::Padding { config } => {
            if config.pattern.is_empty() {
                return Err(CodecError::format(&path, "padding pattern must not be empty"));
            }
            if let (Some(min), Some(max)) = (config.min_length, config.max_length) {
                if min > max {
                    return Err(CodecError::format(&path, "padding min_length exceeds max_length"));
                }
            }
            match config.strategy {
                PaddingStrategy::FixedLength | PaddingStrategy::Alignment => {
                    if config.target_length == 0 {
                        return Err(CodecError::format(
                            &path,
                            "padding target_length must be at least 1 byte",
                        ));
                    }
                }
                PaddingStrategy::Dynamic => {
                    if config.length_expr.is_none() {
                        return Err(CodecError::format(
                            &path,
                            "dynamic padding needs a length expression",
                        ));
                    }
                }
                PaddingStrategy::FillContainer => check_fill_container(proto, idx, &path)?,
            }
        }
    }

    // Parse every expression once, up front.
    let forward = node
        .forward_expr
        .as_deref()
        .map(|s| parse_expr(s, &path, "forward"))
        .transpose()?;
    let backward = node
        .backward_expr
        .as_deref()
        .map(|s| parse_expr(s, &path, "backward"))
        .transpose()?;
    let length = node
        .length_expr
        .as_deref()
        .map(|s| parse_expr(s, &path, "length"))
        .transpose()?;

    let (pad_length, pad_enable) = match &node.body {
        NodeBody::Padding { config } => (
            config
                .length_expr
                .as_deref()
                .map(|s| parse_expr(s, &path, "padding length"))
                .transpose()?,
            config
                .enable_condition
                .as_deref()
                .map(|s| parse_expr(s, &path, "padding enable"))
                .transpose()?,
        ),
        _ => (None, None),
    };

    let range = node
        .range_spec
        .as_deref()
        .map(|s| RangeSpec::parse(s).map_err(|e| CodecError::format(&path, e)))
        .transpose()?;

    let mut conds = Vec::with_capacity(node.conditions.len());
    for dep in &node.conditions {
        if proto.lookup(&dep.ref_id).is_none() {
            return Err(CodecError::MissingNode {
                path: path.clone(),
                id: dep.ref_id.clone(),
            });
        }
        conds.push((
            dep.priority,
            CompiledCond {
                ref_id: dep.ref_id.clone(),
                expr: parse_expr(&dep.expr, &path, "conditional")?,
                expr_src: dep.expr.clone(),
                on_match: dep.on_match,
                on_mismatch: dep.on_mismatch,
            },
        ));
    }
    // Lowest priority number first.
    conds.sort_by_key(|(p, _)| *p);

    let cn = proto.get_mut(idx);
    cn.forward = forward;
    cn.backward = backward;
    cn.length = length;
    cn.pad_length = pad_length;
    cn.pad_enable = pad_enable;
    cn.range = range;
    cn.conds = conds.into_iter().map(|(_, c)| c).collect();
    Ok(())
}

fn check_length(kind: ValueKind, bits: u64, path: &str) -> Result<()> {
    let ok = match kind {
        ValueKind::Uint | ValueKind::Int | ValueKind::Bit | ValueKind::Time => {
            (1..=64).contains(&bits)
        }
        ValueKind::Float => bits == 32 || bits == 64,
        ValueKind::String => bits > 0 && bits % 8 == 0,
        ValueKind::Hex => bits % 8 == 0,
    };
    if ok {
        Ok(())
    } else {
        Err(CodecError::format(
            path,
            format!("illegal length {bits} bit(s) for kind {}", kind.name()),
        ))
    }
}

fn check_fill_container(proto: &CompiledProtocol, idx: usize, path: &str) -> Result<()> {
    let Some(parent_idx) = proto.get(idx).parent else {
        return Err(CodecError::format(
            path,
            "fill-container padding needs an enclosing container",
        ));
    };
    let parent = proto.get(parent_idx);
    if parent.node.length_bits == 0 {
        return Err(CodecError::format(
            path,
            "fill-container padding needs a container with a declared length",
        ));
    }
    // The fill amount is what the container still misses once every other
    // child is encoded, so nothing bit-carrying may follow the padding.
    let after = parent
        .children
        .iter()
        .skip_while(|&&c| c != idx)
        .skip(1)
        .any(|&c| proto.subtree_has_wire(c));
    if after {
        return Err(CodecError::format(
            path,
            "fill-container padding must be the container's last wire child",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::error::CodecError;
    use crate::node::{Node, PaddingConfig, PaddingStrategy};
    use crate::tree::Protocol;

    #[test]
    fn numeric_zero_length_rejected() {
        let p = Protocol::new("t").body(vec![Node::uint("n", 0).value("0")]);
        assert!(matches!(p.compile(), Err(CodecError::Format { .. })));
    }

    #[test]
    fn float_width_restricted() {
        let p = Protocol::new("t").body(vec![Node::float("f", 16).value("1.0")]);
        assert!(p.compile().is_err());
        let p = Protocol::new("t").body(vec![Node::float("f", 32).value("1.0")]);
        assert!(p.compile().is_ok());
    }

    #[test]
    fn value_or_expression_required() {
        let p = Protocol::new("t").body(vec![Node::uint("n", 8)]);
        assert!(p.compile().is_err());
        let p = Protocol::new("t").body(vec![Node::uint("n", 8).optional()]);
        assert!(p.compile().is_ok());
    }

    #[test]
    fn bad_expressions_rejected_up_front() {
        let p = Protocol::new("t").body(vec![Node::uint("n", 8).forward("1 +")]);
        assert!(matches!(p.compile(), Err(CodecError::Format { .. })));
    }

    #[test]
    fn bad_range_spec_rejected() {
        let p = Protocol::new("t").body(vec![Node::uint("n", 8).value("0").range("[1,2] ||")]);
        assert!(p.compile().is_err());
    }

    #[test]
    fn conditional_ref_must_exist() {
        use crate::node::CondAction::*;
        let p = Protocol::new("t").body(vec![Node::uint("n", 8)
            .value("0")
            .condition("ghost", "value == 1", Enable, Disable)]);
        assert!(matches!(p.compile(), Err(CodecError::MissingNode { .. })));
    }

    #[test]
    fn fill_container_must_be_last() {
        let mut container = Node::structural(
            "blk",
            vec![
                Node::padding("pad", PaddingConfig::new(PaddingStrategy::FillContainer)),
                Node::uint("late", 8).value("0"),
            ],
        );
        container.length_bits = 40 * 8;
        let p = Protocol::new("t").body_node(Node::structural("body", vec![container]));
        assert!(p.compile().is_err());
    }
}
