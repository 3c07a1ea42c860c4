//! Signed two's-complement integers, 1..=64 bits.

use crate::bits::BitBuffer;
use crate::error::{CodecError, Result};
use crate::tree::CompiledNode;
use crate::value_fmt::coerce_signed;
use braid_expr::Value;

pub(super) fn encode(cn: &CompiledNode, value: &Value, out: &mut BitBuffer) -> Result<()> {
    let bits = cn.node.length_bits as u32;
    let raw = coerce_signed(value, bits).map_err(|e| CodecError::out_of_range(&cn.path, e))?;
    // The low `bits` bits are the width-sized two's-complement form.
    out.push_bits(raw as u64, bits, cn.node.endian)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))
}

pub(super) fn decode(cn: &CompiledNode, buf: &BitBuffer, start: u64, bits: u64) -> Result<Value> {
    let raw = buf
        .read_bits(start, bits as u32, cn.node.endian)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))?;
    let value = sign_extend(raw, bits as u32);
    Ok(Value::Int(value as i128))
}

fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits == 64 {
        return raw as i64;
    }
    if raw >> (bits - 1) & 1 == 1 {
        (raw | !((1u64 << bits) - 1)) as i64
    } else {
        raw as i64
    }
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
    fn negative_roundtrip() {
        let (p, i) = compiled(Node::int("n", 8).value("0"));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Int(-2), &mut out).unwrap();
        assert_eq!(out.as_bytes(), &[0xFE]);
        assert_eq!(decode(p.get(i), &out, 0, 8).unwrap(), Value::Int(-2));
    }

    #[test]
    fn narrow_signed_roundtrip() {
        let (p, i) = compiled(Node::int("n", 5).value("0"));
        for v in [-16i128, -1, 0, 15] {
            let mut out = BitBuffer::new();
            encode(p.get(i), &Value::Int(v), &mut out).unwrap();
            assert_eq!(out.bit_len(), 5);
            assert_eq!(decode(p.get(i), &out, 0, 5).unwrap(), Value::Int(v));
        }
    }

    #[test]
    fn range_enforced() {
        let (p, i) = compiled(Node::int("n", 8).value("0"));
        let mut out = BitBuffer::new();
        assert!(encode(p.get(i), &Value::Int(128), &mut out).is_err());
        assert!(encode(p.get(i), &Value::Int(-129), &mut out).is_err());
    }
}
