//! Built-in expression functions.
//!
//! Ordinary library code registered into the pluggable registry at
//! startup; the evaluator itself knows none of these. Range functions pull
//! the bytes of their span from the host, which the scheduler backs with
//! the already-encoded fragments.

use crate::value_fmt::{format_bcd, parse_bcd};
use braid_expr::{EvalError, EvalHost, FunctionRegistry, Value};
use braid_utils::format_hex_0x;

/// Registers every builtin into `registry`.
pub fn install_builtins(registry: &mut FunctionRegistry) {
    registry.register_range("checksumBetween", |host, args| {
        let bytes = span(host, args)?;
        let sum: u64 = bytes.iter().map(|&b| b as u64).sum();
        Ok(Value::Int((sum % 256) as i128))
    });

    registry.register_range("crc16Between", |host, args| {
        Ok(Value::Int(crc16_ccitt(&span(host, args)?) as i128))
    });

    registry.register_range("crc32Between", |host, args| {
        Ok(Value::Int(crc32_ieee(&span(host, args)?) as i128))
    });

    registry.register_range("lengthBetween", |host, args| {
        Ok(Value::Int(span(host, args)?.len() as i128))
    });

    // Byte length of one encoded node.
    registry.register_ref("length", 1, |host, args| {
        let bits = host.node_bits(args[0].as_str()?)?;
        Ok(Value::Int(bits.div_ceil(8) as i128))
    });

    registry.register_ref("bitLength", 1, |host, args| {
        Ok(Value::Int(host.node_bits(args[0].as_str()?)? as i128))
    });

    registry.register("min", 2, |_, args| numeric2(args, i128::min, f64::min));
    registry.register("max", 2, |_, args| numeric2(args, i128::max, f64::max));

    registry.register("abs", 1, |_, args| match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(EvalError::type_err(format!(
            "abs() wants a number, got {}",
            other.type_name()
        ))),
    });

    // BCD packing: toBcd(1234) yields the hex literal "0x1234".
    registry.register("toBcd", 1, |_, args| {
        let digits = match &args[0] {
            Value::Int(i) if *i >= 0 => i.to_string(),
            Value::Str(s) => s.clone(),
            other => {
                return Err(EvalError::type_err(format!(
                    "toBcd() wants digits, got {}",
                    other.type_name()
                )))
            }
        };
        let bytes = parse_bcd(&digits).map_err(EvalError::Message)?;
        Ok(Value::Str(format_hex_0x(&bytes)))
    });

    registry.register("fromBcd", 1, |_, args| {
        let bytes = match &args[0] {
            Value::Bytes(b) => b.clone(),
            Value::Str(s) => braid_utils::parse_hex(s).map_err(|e| EvalError::Message(e.to_string()))?,
            other => {
                return Err(EvalError::type_err(format!(
                    "fromBcd() wants bytes, got {}",
                    other.type_name()
                )))
            }
        };
        let digits = format_bcd(&bytes).map_err(EvalError::Message)?;
        digits
            .parse::<i128>()
            .map(Value::Int)
            .map_err(|_| EvalError::Message("BCD value overflows".into()))
    });

    registry.register("toSeconds", 1, |_, args| {
        Ok(Value::Int(args[0].as_int()? / 1000))
    });
    registry.register("toMillis", 1, |_, args| {
        Ok(Value::Int(args[0].as_int()? * 1000))
    });
}

fn span(host: &dyn EvalHost, args: &[Value]) -> Result<Vec<u8>, EvalError> {
    host.span_bytes(args[0].as_str()?, args[1].as_str()?)
}

fn numeric2(
    args: &[Value],
    int_op: fn(i128, i128) -> i128,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        (a, b) => Ok(Value::Float(float_op(a.as_float()?, b.as_float()?))),
    }
}

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// CRC-32 (IEEE 802.3, reflected, init/xorout 0xFFFFFFFF).
pub fn crc32_ieee(bytes: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_expr::{EvalLimits, Evaluator, Expr, MapHost};

    #[test]
    fn crc_reference_vectors() {
        // Classic "123456789" check values.
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn bcd_functions() {
        let mut reg = FunctionRegistry::new();
        install_builtins(&mut reg);
        let eval = Evaluator::with_limits(&reg, EvalLimits::default());
        let host = MapHost::new();
        assert_eq!(
            eval.eval(&Expr::parse("toBcd(1234)").unwrap(), &host).unwrap(),
            Value::Str("0x1234".into())
        );
        assert_eq!(
            eval.eval(&Expr::parse("fromBcd('0x1234')").unwrap(), &host).unwrap(),
            Value::Int(1234)
        );
    }

    #[test]
    fn min_max_abs() {
        let mut reg = FunctionRegistry::new();
        install_builtins(&mut reg);
        let eval = Evaluator::with_limits(&reg, EvalLimits::default());
        let host = MapHost::new();
        assert_eq!(
            eval.eval(&Expr::parse("min(3, -4)").unwrap(), &host).unwrap(),
            Value::Int(-4)
        );
        assert_eq!(
            eval.eval(&Expr::parse("max(1.5, 2)").unwrap(), &host).unwrap(),
            Value::Float(2.0)
        );
        assert_eq!(
            eval.eval(&Expr::parse("abs(0 - 9)").unwrap(), &host).unwrap(),
            Value::Int(9)
        );
    }
}
