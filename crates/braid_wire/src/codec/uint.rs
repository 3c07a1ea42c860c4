//! Unsigned integers, 1..=64 bits.

use crate::bits::BitBuffer;
use crate::error::{CodecError, Result};
use crate::tree::CompiledNode;
use crate::value_fmt::coerce_unsigned;
use braid_expr::Value;

pub(super) fn encode(cn: &CompiledNode, value: &Value, out: &mut BitBuffer) -> Result<()> {
    let bits = cn.node.length_bits as u32;
    let raw = coerce_unsigned(value, bits).map_err(|e| CodecError::out_of_range(&cn.path, e))?;
    out.push_bits(raw, bits, cn.node.endian)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))
}

pub(super) fn decode(cn: &CompiledNode, buf: &BitBuffer, start: u64, bits: u64) -> Result<Value> {
    let raw = buf
        .read_bits(start, bits as u32, cn.node.endian)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))?;
    Ok(Value::Int(raw as i128))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Endian, Node};
    use crate::tree::Protocol;

    fn compiled(node: Node) -> (crate::tree::CompiledProtocol, usize) {
        let p = Protocol::new("t").body(vec![node]).compile().unwrap();
        let idx = p.len() - 1;
        (p, idx)
    }

    #[test]
    fn big_endian_sixteen() {
        let (p, i) = compiled(Node::uint("n", 16).value("0"));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Int(0x1234), &mut out).unwrap();
        assert_eq!(out.as_bytes(), &[0x12, 0x34]);
        assert_eq!(decode(p.get(i), &out, 0, 16).unwrap(), Value::Int(0x1234));
    }

    #[test]
    fn little_endian_sixteen() {
        let (p, i) = compiled(Node::uint("n", 16).value("0").endian(Endian::Little));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Int(0x1234), &mut out).unwrap();
        assert_eq!(out.as_bytes(), &[0x34, 0x12]);
        assert_eq!(decode(p.get(i), &out, 0, 16).unwrap(), Value::Int(0x1234));
    }

    #[test]
    fn narrow_width_occupies_exact_bits() {
        let (p, i) = compiled(Node::uint("n", 3).value("0"));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Int(5), &mut out).unwrap();
        assert_eq!(out.bit_len(), 3);
        assert_eq!(out.as_bytes(), &[0b1010_0000]);
    }

    #[test]
    fn width_overflow_rejected() {
        let (p, i) = compiled(Node::uint("n", 8).value("0"));
        let mut out = BitBuffer::new();
        assert!(matches!(
            encode(p.get(i), &Value::Int(256), &mut out),
            Err(CodecError::ValueOutOfRange { .. })
        ));
        assert!(encode(p.get(i), &Value::Int(-1), &mut out).is_err());
    }

    #[test]
    fn string_sources_accepted() {
        let (p, i) = compiled(Node::uint("n", 8).value("0"));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Str("0x7F".into()), &mut out).unwrap();
        assert_eq!(out.as_bytes(), &[0x7F]);
    }
}
