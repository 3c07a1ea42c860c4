//! IEEE 754 floats, 32 or 64 bits.

use crate::bits::BitBuffer;
use crate::error::{CodecError, Result};
use crate::tree::CompiledNode;
use crate::value_fmt::parse_float_literal;
use braid_expr::Value;

fn to_f64(cn: &CompiledNode, value: &Value) -> Result<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        Value::Str(s) => {
            parse_float_literal(s).map_err(|e| CodecError::out_of_range(&cn.path, e))
        }
        other => Err(CodecError::out_of_range(
            &cn.path,
            format!("cannot use {} as a float", other.type_name()),
        )),
    }
}

pub(super) fn encode(cn: &CompiledNode, value: &Value, out: &mut BitBuffer) -> Result<()> {
    let f = to_f64(cn, value)?;
    let bits = cn.node.length_bits as u32;
    let raw = match bits {
        32 => (f as f32).to_bits() as u64,
        64 => f.to_bits(),
        _ => unreachable!("validated"),
    };
    out.push_bits(raw, bits, cn.node.endian)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))
}

pub(super) fn decode(cn: &CompiledNode, buf: &BitBuffer, start: u64, bits: u64) -> Result<Value> {
    let raw = buf
        .read_bits(start, bits as u32, cn.node.endian)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))?;
    let f = match bits {
        32 => f32::from_bits(raw as u32) as f64,
        64 => f64::from_bits(raw),
        _ => unreachable!("validated"),
    };
    Ok(Value::Float(f))
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
    fn f32_roundtrip() {
        let (p, i) = compiled(Node::float("n", 32).value("0"));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Float(1.5), &mut out).unwrap();
        assert_eq!(out.as_bytes(), &[0x3F, 0xC0, 0x00, 0x00]);
        assert_eq!(decode(p.get(i), &out, 0, 32).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn f64_little_endian() {
        let (p, i) = compiled(Node::float("n", 64).value("0").endian(Endian::Little));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Float(-2.25), &mut out).unwrap();
        assert_eq!(out.byte_len(), 8);
        assert_eq!(decode(p.get(i), &out, 0, 64).unwrap(), Value::Float(-2.25));
    }

    #[test]
    fn string_literal_source() {
        let (p, i) = compiled(Node::float("n", 32).value("0"));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Str("2.5".into()), &mut out).unwrap();
        assert_eq!(decode(p.get(i), &out, 0, 32).unwrap(), Value::Float(2.5));
    }
}
