//! The tree-walking evaluator.

use crate::ast::{BinOp, Expr, UnOp};
use crate::registry::FunctionRegistry;
use crate::{EvalError, Value};
use ahash::AHashMap;

/// What an expression is evaluated against. Implemented by the scheduler
/// during encode/decode; [`MapHost`] covers tests and standalone use.
pub trait EvalHost {
    /// Resolves a variable or qualified node id to its current value.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Concatenated bytes of the already-encoded span `start..=end`.
    fn span_bytes(&self, start: &str, end: &str) -> Result<Vec<u8>, EvalError> {
        let _ = end;
        Err(EvalError::Message(format!(
            "no span context for `{start}..`"
        )))
    }

    /// Bit length of an encoded node.
    fn node_bits(&self, id: &str) -> Result<u64, EvalError> {
        Err(EvalError::MissingNode(id.to_owned()))
    }
}

/// A plain variable-map host.
#[derive(Debug, Clone, Default)]
pub struct MapHost {
    pub vars: AHashMap<String, Value>,
}

impl MapHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }
}

impl EvalHost for MapHost {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvalLimits {
    /// AST nodes visited per evaluation before giving up.
    pub max_steps: u32,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self { max_steps: 1000 }
    }
}

pub struct Evaluator<'r> {
    registry: &'r FunctionRegistry,
    limits: EvalLimits,
}

impl<'r> Evaluator<'r> {
    pub fn new(registry: &'r FunctionRegistry) -> Self {
        Self {
            registry,
            limits: EvalLimits::default(),
        }
    }

    pub fn with_limits(registry: &'r FunctionRegistry, limits: EvalLimits) -> Self {
        Self { registry, limits }
    }

    pub fn eval(&self, expr: &Expr, host: &dyn EvalHost) -> Result<Value, EvalError> {
        let mut steps = 0u32;
        self.eval_inner(expr, host, &mut steps)
    }

    fn eval_inner(
        &self,
        expr: &Expr,
        host: &dyn EvalHost,
        steps: &mut u32,
    ) -> Result<Value, EvalError> {
        *steps += 1;
        if *steps > self.limits.max_steps {
            return Err(EvalError::StepLimit);
        }

        match expr {
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Bool(v) => Ok(Value::Bool(*v)),
            Expr::Str(v) => Ok(Value::Str(v.clone())),
            Expr::Var(name) => host
                .lookup(name)
                .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
            Expr::NodeRef(r) => {
                let key = r.qualified();
                host.lookup(&key).ok_or(EvalError::MissingNode(key))
            }
            Expr::Unary(op, inner) => {
                let v = self.eval_inner(inner, host, steps)?;
                apply_unop(*op, v)
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                if self.eval_inner(lhs, host, steps)?.as_bool()? {
                    Ok(Value::Bool(self.eval_inner(rhs, host, steps)?.as_bool()?))
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                if self.eval_inner(lhs, host, steps)?.as_bool()? {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(self.eval_inner(rhs, host, steps)?.as_bool()?))
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval_inner(lhs, host, steps)?;
                let b = self.eval_inner(rhs, host, steps)?;
                apply_binop(*op, a, b)
            }
            Expr::Call(name, args) => self.call(name, args, host, steps),
        }
    }

    fn call(
        &self,
        name: &str,
        args: &[Expr],
        host: &dyn EvalHost,
        steps: &mut u32,
    ) -> Result<Value, EvalError> {
        let def = self
            .registry
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_owned()))?;

        if let Some(expected) = def.arity {
            if args.len() != expected {
                return Err(EvalError::Arity {
                    name: name.to_owned(),
                    expected,
                    got: args.len(),
                });
            }
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            // Ref-arg functions want node identities, not their values.
            let v = match arg {
                Expr::NodeRef(r) if def.ref_args => Value::Str(r.qualified()),
                other => self.eval_inner(other, host, steps)?,
            };
            values.push(v);
        }

        (def.callable)(host, &values)
    }
}

fn apply_unop(op: UnOp, v: Value) -> Result<Value, EvalError> {
    match op {
        UnOp::Not => Ok(Value::Bool(!v.as_bool()?)),
        UnOp::Neg => match v {
            Value::Int(i) => Ok(Value::Int(
                i.checked_neg()
                    .ok_or_else(|| EvalError::Message("integer overflow".into()))?,
            )),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(EvalError::type_err(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
    }
}

fn apply_binop(op: BinOp, a: Value, b: Value) -> Result<Value, EvalError> {
    use BinOp::*;

    // String concatenation is the only non-numeric arithmetic.
    if op == Add {
        if let (Value::Str(x), Value::Str(y)) = (&a, &b) {
            return Ok(Value::Str(format!("{x}{y}")));
        }
    }

    match op {
        Add | Sub | Mul | Div | Rem => numeric_arith(op, a, b),
        Shl | Shr | BitAnd | BitXor | BitOr => int_bitop(op, a, b),
        Lt | Lte | Gt | Gte => ordering(op, a, b),
        Eq | Neq => {
            let equal = values_equal(&a, &b)?;
            Ok(Value::Bool(if op == Eq { equal } else { !equal }))
        }
        And | Or => unreachable!("short-circuited by the evaluator"),
    }
}

fn numeric_arith(op: BinOp, a: Value, b: Value) -> Result<Value, EvalError> {
    use BinOp::*;
    if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        let overflow = || EvalError::Message("integer overflow".into());
        return Ok(Value::Int(match op {
            Add => x.checked_add(y).ok_or_else(overflow)?,
            Sub => x.checked_sub(y).ok_or_else(overflow)?,
            Mul => x.checked_mul(y).ok_or_else(overflow)?,
            Div => x.checked_div(y).ok_or(EvalError::DivisionByZero)?,
            Rem => x.checked_rem(y).ok_or(EvalError::DivisionByZero)?,
            _ => unreachable!(),
        }));
    }

    let x = a.as_float()?;
    let y = b.as_float()?;
    if matches!(op, Div | Rem) && y == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok(Value::Float(match op {
        Add => x + y,
        Sub => x - y,
        Mul => x * y,
        Div => x / y,
        Rem => x % y,
        _ => unreachable!(),
    }))
}

fn int_bitop(op: BinOp, a: Value, b: Value) -> Result<Value, EvalError> {
    use BinOp::*;
    let x = a.as_int()?;
    let y = b.as_int()?;
    Ok(Value::Int(match op {
        BitAnd => x & y,
        BitXor => x ^ y,
        BitOr => x | y,
        Shl | Shr => {
            let shift = u32::try_from(y)
                .ok()
                .filter(|s| *s < 128)
                .ok_or_else(|| EvalError::type_err(format!("bad shift amount {y}")))?;
            if op == Shl {
                x.checked_shl(shift)
                    .ok_or_else(|| EvalError::Message("integer overflow".into()))?
            } else {
                x >> shift
            }
        }
        _ => unreachable!(),
    }))
}

fn ordering(op: BinOp, a: Value, b: Value) -> Result<Value, EvalError> {
    use BinOp::*;
    let result = if let (Value::Str(x), Value::Str(y)) = (&a, &b) {
        match op {
            Lt => x < y,
            Lte => x <= y,
            Gt => x > y,
            Gte => x >= y,
            _ => unreachable!(),
        }
    } else {
        let x = a.as_float()?;
        let y = b.as_float()?;
        match op {
            Lt => x < y,
            Lte => x <= y,
            Gt => x > y,
            Gte => x >= y,
            _ => unreachable!(),
        }
    };
    Ok(Value::Bool(result))
}

fn values_equal(a: &Value, b: &Value) -> Result<bool, EvalError> {
    Ok(match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (x, y) => {
            return Err(EvalError::type_err(format!(
                "cannot compare {} with {}",
                x.type_name(),
                y.type_name()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Expr;

    fn eval_with(host: &MapHost, src: &str) -> Result<Value, EvalError> {
        let reg = FunctionRegistry::new();
        Evaluator::new(&reg).eval(&Expr::parse(src).unwrap(), host)
    }

    #[test]
    fn arithmetic() {
        let host = MapHost::new();
        assert_eq!(eval_with(&host, "1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(eval_with(&host, "(0xFF >> 4) & 0xF").unwrap(), Value::Int(15));
        assert_eq!(eval_with(&host, "7 % 4").unwrap(), Value::Int(3));
        assert_eq!(eval_with(&host, "1.5 * 2").unwrap(), Value::Float(3.0));
        assert_eq!(
            eval_with(&host, "1 / 0"),
            Err(EvalError::DivisionByZero)
        );
    }

    #[test]
    fn booleans_short_circuit() {
        let host = MapHost::new();
        assert_eq!(eval_with(&host, "true || 1 / 0 == 0").unwrap(), Value::Bool(true));
        assert_eq!(eval_with(&host, "false && 1 / 0 == 0").unwrap(), Value::Bool(false));
        assert_eq!(eval_with(&host, "!(1 == 2)").unwrap(), Value::Bool(true));
    }

    #[test]
    fn strings() {
        let host = MapHost::new();
        assert_eq!(
            eval_with(&host, "'ab' + 'cd'").unwrap(),
            Value::Str("abcd".into())
        );
        assert_eq!(eval_with(&host, "'ab' < 'b'").unwrap(), Value::Bool(true));
    }

    #[test]
    fn node_refs_resolve_through_host() {
        let mut host = MapHost::new();
        host.set("len", 4i64);
        host.set("outer:crc", 0xBEEFi64);
        assert_eq!(eval_with(&host, "#len * 8").unwrap(), Value::Int(32));
        assert_eq!(
            eval_with(&host, "#outer:crc & 0xFF").unwrap(),
            Value::Int(0xEF)
        );
        assert_eq!(
            eval_with(&host, "#missing"),
            Err(EvalError::MissingNode("missing".into()))
        );
    }

    #[test]
    fn functions_and_arity() {
        let mut reg = FunctionRegistry::new();
        reg.register("max", 2, |_, args| {
            Ok(Value::Int(args[0].as_int()?.max(args[1].as_int()?)))
        });
        let host = MapHost::new();
        let eval = Evaluator::new(&reg);
        assert_eq!(
            eval.eval(&Expr::parse("max(3, 9)").unwrap(), &host).unwrap(),
            Value::Int(9)
        );
        assert_eq!(
            eval.eval(&Expr::parse("max(3)").unwrap(), &host),
            Err(EvalError::Arity {
                name: "max".into(),
                expected: 2,
                got: 1
            })
        );
        assert_eq!(
            eval.eval(&Expr::parse("nope()").unwrap(), &host),
            Err(EvalError::UnknownFunction("nope".into()))
        );
    }

    #[test]
    fn ref_args_stay_symbolic() {
        let mut reg = FunctionRegistry::new();
        reg.register_ref("idOf", 1, |_, args| Ok(args[0].clone()));
        let host = MapHost::new();
        let eval = Evaluator::new(&reg);
        assert_eq!(
            eval.eval(&Expr::parse("idOf(#data)").unwrap(), &host).unwrap(),
            Value::Str("data".into())
        );
    }

    #[test]
    fn step_budget() {
        let reg = FunctionRegistry::new();
        let eval = Evaluator::with_limits(&reg, EvalLimits { max_steps: 4 });
        let host = MapHost::new();
        assert_eq!(
            eval.eval(&Expr::parse("1 + 1 + 1 + 1 + 1").unwrap(), &host),
            Err(EvalError::StepLimit)
        );
    }
}
