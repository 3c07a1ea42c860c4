//! Conditional-dependency resolution.
//!
//! Rules run in priority order against the currently-known node values;
//! the referenced node's value is bound to the variable `value` while the
//! rule's boolean expression runs. The first DISABLE outcome
//! short-circuits the rest.

use crate::error::{CodecError, Result};
use crate::node::CondAction;
use crate::tree::CompiledNode;
use braid_expr::{EvalError, EvalHost, Evaluator, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CondEffect {
    SetDefault,
    ClearValue,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CondResult {
    pub enabled: bool,
    pub effect: Option<CondEffect>,
    pub reason: Option<String>,
}

impl CondResult {
    pub fn enabled_default() -> Self {
        Self {
            enabled: true,
            effect: None,
            reason: None,
        }
    }
}

/// Binds `value` over an inner host; used for conditional rules and
/// backward expressions, which both see "the value at hand" that way.
pub(crate) struct WithValue<'a> {
    pub inner: &'a dyn EvalHost,
    pub value: Value,
}

impl EvalHost for WithValue<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if name == "value" {
            Some(self.value.clone())
        } else {
            self.inner.lookup(name)
        }
    }

    fn span_bytes(&self, start: &str, end: &str) -> Result<Vec<u8>, EvalError> {
        self.inner.span_bytes(start, end)
    }

    fn node_bits(&self, id: &str) -> Result<u64, EvalError> {
        self.inner.node_bits(id)
    }
}

pub(crate) fn resolve(
    cn: &CompiledNode,
    evaluator: &Evaluator<'_>,
    host: &dyn EvalHost,
) -> Result<CondResult> {
    let mut result = CondResult::enabled_default();

    for (i, rule) in cn.conds.iter().enumerate() {
        let ref_value = host.lookup(&rule.ref_id).ok_or_else(|| CodecError::MissingNode {
            path: cn.path.clone(),
            id: rule.ref_id.clone(),
        })?;

        let matched = evaluator
            .eval(&rule.expr, &WithValue {
                inner: host,
                value: ref_value,
            })
            .and_then(|v| v.as_bool())
            .map_err(|e| CodecError::from_eval(&cn.path, e))?;

        let action = if matched { rule.on_match } else { rule.on_mismatch };
        result.reason = Some(format!(
            "rule {i} on `{}` ({}) -> {action:?}",
            rule.ref_id, rule.expr_src
        ));

        match action {
            CondAction::Enable => {
                result.enabled = true;
                result.effect = None;
            }
            CondAction::Disable => {
                result.enabled = false;
                result.effect = None;
                // First DISABLE wins; remaining rules are skipped.
                break;
            }
            CondAction::SetDefault => {
                result.enabled = true;
                result.effect = Some(CondEffect::SetDefault);
            }
            CondAction::ClearValue => {
                result.enabled = true;
                result.effect = Some(CondEffect::ClearValue);
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::CondAction::*;
    use crate::node::Node;
    use crate::registry::default_registry;
    use crate::tree::Protocol;
    use braid_expr::{EvalLimits, MapHost};

    fn compiled(node: Node) -> (crate::tree::CompiledProtocol, usize) {
        let p = Protocol::new("t")
            .body(vec![Node::uint("flag", 8).value("0"), node])
            .compile()
            .unwrap();
        let idx = p.lookup("payload").unwrap();
        (p, idx)
    }

    #[test]
    fn disable_on_mismatch() {
        let (p, i) = compiled(
            Node::uint("payload", 8)
                .value("5")
                .condition("flag", "value == 1", Enable, Disable),
        );
        let evaluator = Evaluator::with_limits(default_registry(), EvalLimits::default());

        let mut host = MapHost::new();
        host.set("flag", 0i64);
        let r = resolve(p.get(i), &evaluator, &host).unwrap();
        assert!(!r.enabled);

        host.set("flag", 1i64);
        let r = resolve(p.get(i), &evaluator, &host).unwrap();
        assert!(r.enabled);
    }

    #[test]
    fn later_rules_override_earlier() {
        let (p, i) = compiled(
            Node::uint("payload", 8)
                .value("5")
                .default_value("9")
                .condition("flag", "value > 0", SetDefault, Enable)
                .condition("flag", "value > 10", ClearValue, Enable),
        );
        let evaluator = Evaluator::with_limits(default_registry(), EvalLimits::default());

        let mut host = MapHost::new();
        host.set("flag", 5i64);
        let r = resolve(p.get(i), &evaluator, &host).unwrap();
        // Rule 0 set the default, rule 1 mismatched and re-enabled plainly.
        assert!(r.enabled);
        assert_eq!(r.effect, None);

        host.set("flag", 20i64);
        let r = resolve(p.get(i), &evaluator, &host).unwrap();
        assert_eq!(r.effect, Some(CondEffect::ClearValue));
    }

    #[test]
    fn missing_ref_value_is_an_error() {
        let (p, i) = compiled(
            Node::uint("payload", 8)
                .value("5")
                .condition("flag", "value == 1", Enable, Disable),
        );
        let evaluator = Evaluator::with_limits(default_registry(), EvalLimits::default());
        let host = MapHost::new();
        assert!(matches!(
            resolve(p.get(i), &evaluator, &host),
            Err(CodecError::MissingNode { .. })
        ));
    }
}
