//! Bit fields, 1..=64 bits, MSB-first.

use crate::bits::BitBuffer;
use crate::error::{CodecError, Result};
use crate::node::Endian;
use crate::tree::CompiledNode;
use crate::value_fmt::coerce_unsigned;
use braid_expr::Value;

fn effective_endian(cn: &CompiledNode) -> Endian {
    // Sub-byte fields are always MSB-first; only a field that crosses a
    // byte follows the declared byte order.
    if cn.node.length_bits <= 8 {
        Endian::Big
    } else {
        cn.node.endian
    }
}

pub(super) fn encode(cn: &CompiledNode, value: &Value, out: &mut BitBuffer) -> Result<()> {
    let bits = cn.node.length_bits as u32;
    let raw = coerce_unsigned(value, bits).map_err(|e| CodecError::out_of_range(&cn.path, e))?;
    out.push_bits(raw, bits, effective_endian(cn))
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))
}

pub(super) fn decode(cn: &CompiledNode, buf: &BitBuffer, start: u64, bits: u64) -> Result<Value> {
    let raw = buf
        .read_bits(start, bits as u32, effective_endian(cn))
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))?;
    // Single bits read as bare digits; anything wider keeps the width in a
    // binary literal.
    let text = if bits == 1 {
        raw.to_string()
    } else {
        format!("0b{raw:0width$b}", width = bits as usize)
    };
    Ok(Value::Str(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::tree::Protocol;

    fn compiled(node: Node) -> (crate::tree::CompiledProtocol, usize) {
        let p = Protocol::new("t").body(vec![node]).compile().unwrap();
        let idx = p.len() - 1;
        (p, idx)
    }

    #[test]
    fn binary_literal_source() {
        let (p, i) = compiled(Node::bit("n", 4).value("0"));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Str("0b1001".into()), &mut out).unwrap();
        assert_eq!(out.bit_len(), 4);
        assert_eq!(out.as_bytes(), &[0b1001_0000]);
        assert_eq!(
            decode(p.get(i), &out, 0, 4).unwrap(),
            Value::Str("0b1001".into())
        );
    }

    #[test]
    fn single_bit_decodes_to_digit() {
        let (p, i) = compiled(Node::bit("n", 1).value("0"));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Int(1), &mut out).unwrap();
        assert_eq!(decode(p.get(i), &out, 0, 1).unwrap(), Value::Str("1".into()));
    }

    #[test]
    fn negatives_and_overflow_rejected() {
        let (p, i) = compiled(Node::bit("n", 4).value("0"));
        let mut out = BitBuffer::new();
        assert!(encode(p.get(i), &Value::Int(-1), &mut out).is_err());
        assert!(encode(p.get(i), &Value::Int(16), &mut out).is_err());
    }
}
