//! Character strings in a declared charset, zero-padded to a fixed byte
//! width.

use crate::bits::BitBuffer;
use crate::error::{CodecError, Result};
use crate::node::Charset;
use crate::tree::CompiledNode;
use braid_expr::Value;

fn encode_chars(cn: &CompiledNode, s: &str) -> Result<Vec<u8>> {
    match cn.node.charset {
        Charset::Utf8 => Ok(s.as_bytes().to_vec()),
        Charset::Ascii => {
            if !s.is_ascii() {
                return Err(CodecError::out_of_range(
                    &cn.path,
                    "non-ASCII character in an ASCII field",
                ));
            }
            Ok(s.as_bytes().to_vec())
        }
        Charset::Latin1 => s
            .chars()
            .map(|c| {
                u8::try_from(c as u32).map_err(|_| {
                    CodecError::out_of_range(
                        &cn.path,
                        format!("character {c:?} is outside Latin-1"),
                    )
                })
            })
            .collect(),
    }
}

fn decode_chars(cn: &CompiledNode, bytes: &[u8]) -> Result<String> {
    match cn.node.charset {
        Charset::Utf8 => String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::out_of_range(&cn.path, "invalid UTF-8 on the wire")),
        Charset::Ascii => {
            if !bytes.is_ascii() {
                return Err(CodecError::out_of_range(&cn.path, "invalid ASCII on the wire"));
            }
            Ok(bytes.iter().map(|&b| b as char).collect())
        }
        Charset::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}

pub(super) fn encode(cn: &CompiledNode, value: &Value, out: &mut BitBuffer) -> Result<()> {
    let s = match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    };
    let mut bytes = encode_chars(cn, &s)?;

    let width = (cn.node.length_bits / 8) as usize;
    bytes.truncate(width);
    bytes.resize(width, 0);

    let bits = bytes.len() as u64 * 8;
    out.push_bit_slice(&bytes, bits)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))
}

pub(super) fn decode(cn: &CompiledNode, buf: &BitBuffer, start: u64, bits: u64) -> Result<Value> {
    let slice = buf
        .slice(start, bits)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))?;
    let mut bytes = slice.into_bytes();
    // Only trimmed when the node says so, never silently.
    if cn.node.trim_trailing_zeros {
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
    }
    Ok(Value::Str(decode_chars(cn, &bytes)?))
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
    fn pads_to_width() {
        let (p, i) = compiled(Node::string("s", 48).optional());
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Str("abc".into()), &mut out).unwrap();
        assert_eq!(out.as_bytes(), b"abc\0\0\0");
    }

    #[test]
    fn trims_only_when_asked() {
        let (p, i) = compiled(Node::string("s", 48).optional());
        let buf = BitBuffer::from_bytes(b"abc\0\0\0".to_vec());
        assert_eq!(
            decode(p.get(i), &buf, 0, 48).unwrap(),
            Value::Str("abc\0\0\0".into())
        );

        let (p, i) = compiled(Node::string("s", 48).optional().trim_trailing_zeros());
        assert_eq!(
            decode(p.get(i), &buf, 0, 48).unwrap(),
            Value::Str("abc".into())
        );
    }

    #[test]
    fn ascii_charset_enforced() {
        use crate::node::Charset;
        let (p, i) = compiled(Node::string("s", 32).optional().charset(Charset::Ascii));
        let mut out = BitBuffer::new();
        assert!(encode(p.get(i), &Value::Str("héllo".into()), &mut out).is_err());
    }

    #[test]
    fn latin1_roundtrip() {
        use crate::node::Charset;
        let (p, i) = compiled(
            Node::string("s", 16)
                .optional()
                .charset(Charset::Latin1)
                .trim_trailing_zeros(),
        );
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Str("é".into()), &mut out).unwrap();
        assert_eq!(out.as_bytes(), &[0xE9, 0x00]);
        assert_eq!(decode(p.get(i), &out, 0, 16).unwrap(), Value::Str("é".into()));
    }

    #[test]
    fn overlong_input_truncates() {
        let (p, i) = compiled(Node::string("s", 16).optional());
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Str("abcdef".into()), &mut out).unwrap();
        assert_eq!(out.as_bytes(), b"ab");
    }
}
