//! TIME fields: a thin delegate over UINT.
//!
//! A datetime literal is converted to seconds or milliseconds since the
//! Unix epoch per the node's time-unit hint, then emitted as an unsigned
//! integer. Without a hint the field behaves as a plain number; exotic
//! layouts (week plus intra-week milliseconds and friends) belong to
//! expression helpers, not this codec.

use crate::bits::BitBuffer;
use crate::error::{CodecError, Result};
use crate::tree::CompiledNode;
use crate::value_fmt::{coerce_unsigned, parse_int_literal};
use braid_expr::Value;
use chrono::{DateTime, NaiveDateTime};

const FORMAT_MILLIS: &str = "%Y-%m-%d %H:%M:%S%.3f";
const FORMAT_SECONDS: &str = "%Y-%m-%d %H:%M:%S";

fn literal_to_number(cn: &CompiledNode, s: &str) -> Result<i128> {
    if let Ok(n) = parse_int_literal(s) {
        return Ok(n);
    }

    let dt = NaiveDateTime::parse_from_str(s, FORMAT_MILLIS)
        .or_else(|_| NaiveDateTime::parse_from_str(s, FORMAT_SECONDS))
        .map_err(|_| {
            CodecError::out_of_range(&cn.path, format!("malformed datetime literal `{s}`"))
        })?;

    let number = match cn.node.time_unit {
        Some(crate::node::TimeUnit::Seconds) => dt.and_utc().timestamp() as i128,
        Some(crate::node::TimeUnit::Millis) => dt.and_utc().timestamp_millis() as i128,
        None => {
            return Err(CodecError::out_of_range(
                &cn.path,
                "datetime literal needs a time unit hint",
            ))
        }
    };
    if number < 0 {
        return Err(CodecError::out_of_range(
            &cn.path,
            format!("datetime `{s}` precedes the epoch"),
        ));
    }
    Ok(number)
}

pub(super) fn encode(cn: &CompiledNode, value: &Value, out: &mut BitBuffer) -> Result<()> {
    let number = match value {
        Value::Str(s) => Value::Int(literal_to_number(cn, s)?),
        other => other.clone(),
    };
    let bits = cn.node.length_bits as u32;
    let raw = coerce_unsigned(&number, bits).map_err(|e| CodecError::out_of_range(&cn.path, e))?;
    out.push_bits(raw, bits, cn.node.endian)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))
}

pub(super) fn decode(cn: &CompiledNode, buf: &BitBuffer, start: u64, bits: u64) -> Result<Value> {
    let raw = buf
        .read_bits(start, bits as u32, cn.node.endian)
        .map_err(|e| CodecError::io(&cn.path, e.to_string()))? as i64;

    let Some(unit) = cn.node.time_unit else {
        return Ok(Value::Int(raw as i128));
    };

    let dt = match unit {
        crate::node::TimeUnit::Seconds => DateTime::from_timestamp(raw, 0),
        crate::node::TimeUnit::Millis => DateTime::from_timestamp_millis(raw),
    }
    .ok_or_else(|| {
        CodecError::out_of_range(&cn.path, format!("timestamp {raw} is out of range"))
    })?;

    let format = match unit {
        crate::node::TimeUnit::Seconds => FORMAT_SECONDS,
        crate::node::TimeUnit::Millis => FORMAT_MILLIS,
    };
    Ok(Value::Str(dt.naive_utc().format(format).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, TimeUnit};
    use crate::tree::Protocol;

    fn compiled(node: Node) -> (crate::tree::CompiledProtocol, usize) {
        let p = Protocol::new("t").body(vec![node]).compile().unwrap();
        let idx = p.len() - 1;
        (p, idx)
    }

    #[test]
    fn seconds_roundtrip() {
        let (p, i) = compiled(Node::time("ts", 32).value("0").time_unit(TimeUnit::Seconds));
        let mut out = BitBuffer::new();
        encode(
            p.get(i),
            &Value::Str("2024-05-01 12:00:00".into()),
            &mut out,
        )
        .unwrap();
        assert_eq!(out.bit_len(), 32);
        assert_eq!(
            decode(p.get(i), &out, 0, 32).unwrap(),
            Value::Str("2024-05-01 12:00:00".into())
        );
    }

    #[test]
    fn millis_roundtrip() {
        let (p, i) = compiled(Node::time("ts", 48).value("0").time_unit(TimeUnit::Millis));
        let mut out = BitBuffer::new();
        encode(
            p.get(i),
            &Value::Str("2024-05-01 12:00:00.250".into()),
            &mut out,
        )
        .unwrap();
        assert_eq!(
            decode(p.get(i), &out, 0, 48).unwrap(),
            Value::Str("2024-05-01 12:00:00.250".into())
        );
    }

    #[test]
    fn numeric_sources_pass_through() {
        let (p, i) = compiled(Node::time("ts", 32).value("0"));
        let mut out = BitBuffer::new();
        encode(p.get(i), &Value::Str("0x1000".into()), &mut out).unwrap();
        assert_eq!(decode(p.get(i), &out, 0, 32).unwrap(), Value::Int(0x1000));
    }

    #[test]
    fn datetime_without_unit_rejected() {
        let (p, i) = compiled(Node::time("ts", 32).value("0"));
        let mut out = BitBuffer::new();
        assert!(encode(
            p.get(i),
            &Value::Str("2024-05-01 12:00:00".into()),
            &mut out
        )
        .is_err());
    }
}
