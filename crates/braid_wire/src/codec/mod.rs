//! Per-kind value codecs.
//!
//! Each codec turns one field's value into bits and back. The scheduler
//! owns everything around it (expressions, enumerants, conditionals,
//! variable publishing); codecs only see the node's layout metadata and a
//! canonical [`Value`].

mod bitfield;
mod float;
mod hex;
mod int;
mod string;
mod time;
mod uint;

use crate::bits::BitBuffer;
use crate::error::Result;
use crate::node::ValueKind;
use crate::tree::CompiledNode;
use braid_expr::Value;

/// Encodes `value` into `out` according to the node's kind, width and
/// endianness. `out` starts empty; its final length is the field's actual
/// bit length (fixed widths match `length_bits`; unsized HEX is measured).
pub(crate) fn encode_value(
    cn: &CompiledNode,
    kind: ValueKind,
    value: &Value,
    out: &mut BitBuffer,
) -> Result<()> {
    match kind {
        ValueKind::Uint => uint::encode(cn, value, out),
        ValueKind::Int => int::encode(cn, value, out),
        ValueKind::Bit => bitfield::encode(cn, value, out),
        ValueKind::Hex => hex::encode(cn, value, out),
        ValueKind::Float => float::encode(cn, value, out),
        ValueKind::String => string::encode(cn, value, out),
        ValueKind::Time => time::encode(cn, value, out),
    }
}

/// Decodes `bits` bits of `buf` starting at `start` into the kind's
/// canonical value.
pub(crate) fn decode_value(
    cn: &CompiledNode,
    kind: ValueKind,
    buf: &BitBuffer,
    start: u64,
    bits: u64,
) -> Result<Value> {
    match kind {
        ValueKind::Uint => uint::decode(cn, buf, start, bits),
        ValueKind::Int => int::decode(cn, buf, start, bits),
        ValueKind::Bit => bitfield::decode(cn, buf, start, bits),
        ValueKind::Hex => hex::decode(cn, buf, start, bits),
        ValueKind::Float => float::decode(cn, buf, start, bits),
        ValueKind::String => string::decode(cn, buf, start, bits),
        ValueKind::Time => time::decode(cn, buf, start, bits),
    }
}
