//! Literal parsing and numeric coercion.
//!
//! Field values arrive as strings from schemas, annotations and expression
//! results; everything funnels through here before a codec sees it.

use braid_expr::Value;
use braid_utils::parse_hex;

/// Parses an integer literal: decimal (optionally signed), `0x…`, `0b…`,
/// or `…H` hex.
pub fn parse_int_literal(s: &str) -> Result<i128, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty numeric literal".to_owned());
    }

    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let magnitude = if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        i128::from_str_radix(hex, 16).map_err(|_| format!("malformed hex literal `{s}`"))?
    } else if let Some(bin) = body
        .strip_prefix("0b")
        .or_else(|| body.strip_prefix("0B"))
    {
        i128::from_str_radix(bin, 2).map_err(|_| format!("malformed binary literal `{s}`"))?
    } else if let Some(hex) = body.strip_suffix('H').or_else(|| body.strip_suffix('h')) {
        i128::from_str_radix(hex, 16).map_err(|_| format!("malformed hex literal `{s}`"))?
    } else {
        body.parse::<i128>()
            .map_err(|_| format!("malformed decimal literal `{s}`"))?
    };

    Ok(if negative { -magnitude } else { magnitude })
}

pub fn parse_float_literal(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(i) = parse_int_literal(s) {
        return Ok(i as f64);
    }
    s.parse::<f64>()
        .map_err(|_| format!("malformed float literal `{s}`"))
}

fn value_to_int(value: &Value) -> Result<i128, String> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Str(s) => parse_int_literal(s),
        Value::Float(f) if f.fract() == 0.0 => Ok(*f as i128),
        Value::Float(f) => Err(format!("non-integral value {f}")),
        other => Err(format!("cannot use {} as an integer", other.type_name())),
    }
}

/// Coerces a value into an unsigned integer of exactly `bits` bits.
pub fn coerce_unsigned(value: &Value, bits: u32) -> Result<u64, String> {
    let i = value_to_int(value)?;
    if i < 0 {
        return Err(format!("negative value {i} for an unsigned field"));
    }
    let limit = if bits >= 64 { u64::MAX as i128 } else { (1i128 << bits) - 1 };
    if i > limit {
        return Err(format!("value {i} does not fit in {bits} bit(s)"));
    }
    Ok(i as u64)
}

/// Coerces a value into a signed two's-complement range of `bits` bits.
pub fn coerce_signed(value: &Value, bits: u32) -> Result<i64, String> {
    let i = value_to_int(value)?;
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << (bits - 1)) - 1;
    if i < min || i > max {
        return Err(format!("value {i} outside [{min}, {max}]"));
    }
    Ok(i as i64)
}

/// Extracts the byte string of a HEX value: raw bytes, or a hex literal.
pub fn coerce_bytes(value: &Value) -> Result<Vec<u8>, String> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::Str(s) => parse_hex(s).map_err(|e| e.to_string()),
        Value::Int(i) if *i >= 0 => {
            // Minimal big-endian representation of a number.
            let mut bytes = i.to_be_bytes().to_vec();
            while bytes.len() > 1 && bytes[0] == 0 {
                bytes.remove(0);
            }
            Ok(bytes)
        }
        other => Err(format!("cannot use {} as bytes", other.type_name())),
    }
}

/// Packs a decimal digit string as BCD, one digit per nibble, left-padded
/// with a zero nibble when the digit count is odd.
pub fn parse_bcd(digits: &str) -> Result<Vec<u8>, String> {
    let digits = digits.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("malformed BCD literal `{digits}`"));
    }
    let mut nibbles: Vec<u8> = Vec::with_capacity(digits.len() + 1);
    if digits.len() % 2 != 0 {
        nibbles.push(0);
    }
    nibbles.extend(digits.bytes().map(|b| b - b'0'));
    Ok(nibbles.chunks(2).map(|p| (p[0] << 4) | p[1]).collect())
}

/// Inverse of [`parse_bcd`]; fails on nibbles above 9.
pub fn format_bcd(bytes: &[u8]) -> Result<String, String> {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let (hi, lo) = (b >> 4, b & 0xF);
        if hi > 9 || lo > 9 {
            return Err(format!("byte {b:#04X} is not valid BCD"));
        }
        out.push((b'0' + hi) as char);
        out.push((b'0' + lo) as char);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_literals() {
        assert_eq!(parse_int_literal("42").unwrap(), 42);
        assert_eq!(parse_int_literal("-17").unwrap(), -17);
        assert_eq!(parse_int_literal("0x2A").unwrap(), 42);
        assert_eq!(parse_int_literal("0b101").unwrap(), 5);
        assert_eq!(parse_int_literal("2AH").unwrap(), 42);
        assert!(parse_int_literal("").is_err());
        assert!(parse_int_literal("0xZZ").is_err());
    }

    #[test]
    fn unsigned_bounds() {
        assert_eq!(coerce_unsigned(&Value::Int(255), 8).unwrap(), 255);
        assert!(coerce_unsigned(&Value::Int(256), 8).is_err());
        assert!(coerce_unsigned(&Value::Int(-1), 8).is_err());
        assert_eq!(
            coerce_unsigned(&Value::Int(u64::MAX as i128), 64).unwrap(),
            u64::MAX
        );
        assert_eq!(coerce_unsigned(&Value::Str("0x10".into()), 8).unwrap(), 16);
    }

    #[test]
    fn signed_bounds() {
        assert_eq!(coerce_signed(&Value::Int(-128), 8).unwrap(), -128);
        assert_eq!(coerce_signed(&Value::Int(127), 8).unwrap(), 127);
        assert!(coerce_signed(&Value::Int(128), 8).is_err());
        assert!(coerce_signed(&Value::Int(-129), 8).is_err());
        assert_eq!(coerce_signed(&Value::Int(-1), 1).unwrap(), -1);
    }

    #[test]
    fn bcd_roundtrip() {
        assert_eq!(parse_bcd("1234").unwrap(), vec![0x12, 0x34]);
        assert_eq!(parse_bcd("567").unwrap(), vec![0x05, 0x67]);
        assert_eq!(format_bcd(&[0x12, 0x34]).unwrap(), "1234");
        assert!(format_bcd(&[0xAB]).is_err());
        assert!(parse_bcd("12a").is_err());
    }
}
