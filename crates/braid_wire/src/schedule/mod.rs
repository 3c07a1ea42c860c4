//! Encode/decode drivers.
//!
//! Both walk the same compiled tree: the encoder evaluates nodes in
//! topological order and assembles fragments in wire order; the decoder
//! walks wire order directly, resolving expression-driven lengths and
//! conditionals from already-published values. All per-run state lives
//! here, never on the tree.

mod decode;
mod encode;

pub use decode::{Decoded, Decoder};
pub use encode::{Encoded, Encoder};

use crate::bits::BitBuffer;
use crate::cond::CondEffect;
use crate::error::{CodecError, Result};
use crate::node::ValueKind;
use crate::range_spec::RangeSpec;
use crate::registry::cross_protocol_value;
use crate::tree::{CompiledNode, CompiledProtocol};
use crate::value_fmt::{parse_float_literal, parse_int_literal};
use ahash::AHashMap;
use braid_expr::{EvalError, EvalHost, Value};
use braid_utils::format_hex;

/// Per-node outcome of one encode or decode run.
#[derive(Debug, Clone)]
pub struct FieldReport {
    pub id: String,
    pub path: String,
    /// User-facing value: enum label, post-backward value on decode.
    pub value: Option<Value>,
    /// The wire value before enum/backward mapping.
    pub raw: Option<Value>,
    /// Hex of the emitted/consumed bytes (partial bytes left-packed).
    pub encoded_hex: Option<String>,
    /// Half-open bit range `[start, end)` in the output/input.
    pub start_bit: u64,
    pub end_bit: u64,
    pub enabled: bool,
    /// Why a conditional left the node in its state.
    pub reason: Option<String>,
    /// Decode-side verification: range specs and recomputed forward
    /// expressions. `None` when nothing was checked.
    pub valid: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NodeRun {
    pub resolved: bool,
    pub enabled: bool,
    pub effect: Option<CondEffect>,
    pub reason: Option<String>,
    pub value: Option<Value>,
    pub raw: Option<Value>,
    pub frag: Option<BitBuffer>,
    pub bits: u64,
    pub start_bit: u64,
    pub end_bit: u64,
    pub valid: Option<bool>,
}

pub(crate) type VarMap = AHashMap<String, Value>;

/// A node is on the wire only if it and every ancestor container are
/// enabled.
pub(crate) fn effective_enabled(
    proto: &CompiledProtocol,
    states: &[NodeRun],
    idx: usize,
) -> bool {
    let mut cur = Some(idx);
    while let Some(i) = cur {
        if !states[i].enabled {
            return false;
        }
        cur = proto.get(i).parent;
    }
    true
}

/// Actual wire bits of the subtree rooted at `idx` (enabled nodes only).
pub(crate) fn subtree_bits(proto: &CompiledProtocol, states: &[NodeRun], idx: usize) -> u64 {
    let cn = proto.get(idx);
    if cn.node.is_wire() {
        if effective_enabled(proto, states, idx) {
            states[idx].bits
        } else {
            0
        }
    } else {
        cn.children
            .iter()
            .map(|&c| subtree_bits(proto, states, c))
            .sum()
    }
}

/// The expression host of a running encode/decode: variable lookups hit
/// the published map (falling back to the cross-protocol registry), span
/// requests concatenate the already-produced fragments.
pub(crate) struct RunHost<'a> {
    pub proto: &'a CompiledProtocol,
    pub vars: &'a VarMap,
    pub states: &'a [NodeRun],
}

impl RunHost<'_> {
    fn local_index(&self, key: &str) -> Result<usize, EvalError> {
        let id = match key.split_once(':') {
            Some((p, id)) if p == self.proto.id => id,
            Some(_) => return Err(EvalError::MissingNode(key.to_owned())),
            None => key,
        };
        self.proto
            .lookup(id)
            .ok_or_else(|| EvalError::MissingNode(key.to_owned()))
    }
}

impl EvalHost for RunHost<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.get(name) {
            return Some(v.clone());
        }
        match name.split_once(':') {
            Some((p, id)) if p != self.proto.id => cross_protocol_value(p, id),
            Some((_, id)) => self.vars.get(id).cloned(),
            None => None,
        }
    }

    fn span_bytes(&self, start: &str, end: &str) -> Result<Vec<u8>, EvalError> {
        let a = self.local_index(start)?;
        let b = self.local_index(end)?;
        if a > b {
            return Err(EvalError::Message(format!(
                "span start `{start}` does not precede `{end}`"
            )));
        }

        let mut buf = BitBuffer::new();
        for i in a..=b {
            let cn = self.proto.get(i);
            if !cn.node.is_wire() || !effective_enabled(self.proto, self.states, i) {
                continue;
            }
            let frag = self.states[i].frag.as_ref().ok_or_else(|| {
                EvalError::Message(format!("node `{}` is not encoded yet", cn.node.id))
            })?;
            buf.push_buffer(frag);
        }

        if !buf.is_byte_aligned() {
            return Err(EvalError::UnalignedSpan {
                start: start.to_owned(),
                end: end.to_owned(),
            });
        }
        Ok(buf.into_bytes())
    }

    fn node_bits(&self, id: &str) -> Result<u64, EvalError> {
        let idx = self.local_index(id)?;
        let st = &self.states[idx];
        if !st.resolved {
            return Err(EvalError::Message(format!("node `{id}` is not resolved yet")));
        }
        Ok(st.bits)
    }
}

/// Publishes a node's run results into the variable map.
pub(crate) fn publish(vars: &mut VarMap, id: &str, value: Option<Value>, frag: Option<&BitBuffer>, bits: u64) {
    if let Some(v) = value {
        vars.insert(id.to_owned(), v);
    }
    if let Some(frag) = frag {
        vars.insert(format!("{id}_encoded"), Value::Str(format_hex(frag.as_bytes())));
    }
    vars.insert(format!("{id}_length"), Value::Int(bits as i128));
}

/// Maps a user value onto its enumerant wire literal for encoding.
pub(crate) fn map_enum_encode(cn: &CompiledNode, user: &Value) -> Result<Value> {
    let Some(enums) = &cn.node.enums else {
        return Ok(user.clone());
    };
    match user {
        Value::Str(s) => {
            if let Some(wire) = enums.wire_for_label(s) {
                Ok(Value::Str(wire.to_owned()))
            } else if enums.contains_wire(s) {
                Ok(user.clone())
            } else {
                Err(CodecError::enum_mismatch(
                    &cn.path,
                    format!("`{s}` is neither a label nor a wire value"),
                ))
            }
        }
        Value::Int(i) => {
            if enums.label_for_value(*i).is_some() {
                Ok(user.clone())
            } else {
                Err(CodecError::enum_mismatch(
                    &cn.path,
                    format!("{i} is not an enumerant wire value"),
                ))
            }
        }
        other => Err(CodecError::enum_mismatch(
            &cn.path,
            format!("cannot match a {} against enumerants", other.type_name()),
        )),
    }
}

/// Maps a decoded wire value back to its enumerant label.
pub(crate) fn map_enum_decode(cn: &CompiledNode, raw: &Value) -> Result<Value> {
    let Some(enums) = &cn.node.enums else {
        return Ok(raw.clone());
    };
    let numeric = match raw {
        Value::Int(i) => Some(*i),
        Value::Str(s) => parse_int_literal(s).ok(),
        _ => None,
    };
    if let Some(n) = numeric {
        return enums
            .label_for_value(n)
            .map(|l| Value::Str(l.to_owned()))
            .ok_or_else(|| {
                CodecError::enum_mismatch(&cn.path, format!("wire value {n} has no enumerant"))
            });
    }
    Err(CodecError::enum_mismatch(
        &cn.path,
        format!("cannot match a {} against enumerants", raw.type_name()),
    ))
}

/// Range-spec check of a wire value. STRING tests character length,
/// numeric kinds the value itself; HEX fields carry no range semantics.
pub(crate) fn range_matches(kind: ValueKind, range: &RangeSpec, wire: &Value) -> Result<bool, String> {
    match kind {
        ValueKind::String => match wire {
            Value::Str(s) => Ok(range.contains_len(s.chars().count())),
            other => Err(format!("expected a string, got {}", other.type_name())),
        },
        ValueKind::Float => {
            let f = match wire {
                Value::Float(f) => *f,
                Value::Int(i) => *i as f64,
                Value::Str(s) => parse_float_literal(s)?,
                other => return Err(format!("expected a number, got {}", other.type_name())),
            };
            Ok(range.contains_float(f))
        }
        ValueKind::Hex => Ok(true),
        _ => {
            let i = match wire {
                Value::Int(i) => *i,
                Value::Str(s) => parse_int_literal(s)?,
                other => return Err(format!("expected an integer, got {}", other.type_name())),
            };
            Ok(range.contains_int(i))
        }
    }
}

/// Loose equality for decode-side verification of recomputed forward
/// expressions: numeric strings compare numerically.
pub(crate) fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    let as_int = |v: &Value| match v {
        Value::Int(i) => Some(*i),
        Value::Str(s) => parse_int_literal(s).ok(),
        _ => None,
    };
    match (as_int(a), as_int(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// The canonical literal value of a node, for publishing disabled or
/// skipped fields.
pub(crate) fn literal_value(cn: &CompiledNode) -> Option<Value> {
    let literal = cn.node.value.as_deref()?;
    Some(match cn.node.leaf_kind()? {
        ValueKind::Uint | ValueKind::Int | ValueKind::Time => match parse_int_literal(literal) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Str(literal.to_owned()),
        },
        ValueKind::Float => match parse_float_literal(literal) {
            Ok(f) => Value::Float(f),
            Err(_) => Value::Str(literal.to_owned()),
        },
        _ => Value::Str(literal.to_owned()),
    })
}

/// Assembles the per-node reports, in wire (pre-order) position.
pub(crate) fn build_reports(proto: &CompiledProtocol, states: &[NodeRun]) -> Vec<FieldReport> {
    proto
        .nodes()
        .map(|(idx, cn)| {
            let st = &states[idx];
            FieldReport {
                id: cn.node.id.clone(),
                path: cn.path.clone(),
                value: st.value.clone(),
                raw: st.raw.clone(),
                encoded_hex: st.frag.as_ref().map(|f| format_hex(f.as_bytes())),
                start_bit: st.start_bit,
                end_bit: st.end_bit,
                enabled: st.resolved && effective_enabled(proto, states, idx),
                reason: st.reason.clone(),
                valid: st.valid,
            }
        })
        .collect()
}
