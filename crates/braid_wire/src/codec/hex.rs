//! HEX byte strings; width is a byte multiple, or 0 for "take the
//! literal's length".

use crate::bits::BitBuffer;
use crate::error::{CodecError, Result};
use crate::node::Endian;
use crate::tree::CompiledNode;
use crate::value_fmt::coerce_bytes;
use braid_expr::Value;
use braid_utils::format_hex_0x;

pub(super) fn encode(cn: &CompiledNode, value: &Value, out: &mut BitBuffer) -> Result<()> {
    let mut bytes = coerce_bytes(value).map_err(|e| CodecError::out_of_range(&cn.path, e))?;

    let declared = (cn.node.length_bits / 8) as usize;
    if declared > 0 {
        if bytes.len() > declared {
            // Shrinking is only legal when it drops zero padding.
            let extra = bytes.len() - declared;
            if bytes[..extra].iter().any(|&b| b != 0) {
                return Err(CodecError::out_of_range(
                    &cn.path,
                    format!("{} byte(s) do not fit in {declared}", bytes.len()),
                ));
            }
            bytes.drain(..extra);
        } else if bytes.len() < declared {
            let mut padded = vec![0u8; declared - bytes.len()];
            padded.extend_from_slice(&bytes);
            bytes = padded;
        }
    }

    // Padding applies to the natural big-endian form; LITTLE reverses the
    // whole byte string afterwards.
    if cn.node.endian == Endian::Little {
        bytes.reverse();
    }

    let bits = bytes.len() as u64 * 8;
    out.push_bit_slice(&bytes, bits)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))
}

pub(super) fn decode(cn: &CompiledNode, buf: &BitBuffer, start: u64, bits: u64) -> Result<Value> {
    let slice = buf
        .slice(start, bits)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))?;
    let mut bytes = slice.into_bytes();
    if cn.node.endian == Endian::Little {
        bytes.reverse();
    }
    Ok(Value::Str(format_hex_0x(&bytes)))
}
