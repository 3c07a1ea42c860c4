//! Process-wide registries.
//!
//! Both are initialized at startup and read-only afterwards: the default
//! function registry (builtins installed once), and the protocol registry
//! backing cross-protocol `#proto:id` references. Registration during or
//! after the first encode is unsupported.

use crate::error::{CodecError, Result};
use crate::funcs::install_builtins;
use crate::node::ValueKind;
use crate::tree::CompiledProtocol;
use crate::value_fmt::{parse_float_literal, parse_int_literal};
use ahash::AHashMap;
use braid_expr::{FunctionRegistry, Value};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

static DEFAULT_FUNCTIONS: Lazy<FunctionRegistry> = Lazy::new(|| {
    let mut registry = FunctionRegistry::new();
    install_builtins(&mut registry);
    registry
});

/// The registry with every builtin installed. Custom registries can be
/// built with [`FunctionRegistry::new`] plus
/// [`install_builtins`](crate::funcs::install_builtins).
pub fn default_registry() -> &'static FunctionRegistry {
    &DEFAULT_FUNCTIONS
}

static PROTOCOLS: Lazy<RwLock<AHashMap<String, Arc<CompiledProtocol>>>> =
    Lazy::new(|| RwLock::new(AHashMap::new()));

/// Registers a compiled protocol for cross-protocol reference resolution.
/// Duplicate registration of a protocol id is fatal.
pub fn register_protocol(proto: Arc<CompiledProtocol>) -> Result<()> {
    let mut map = PROTOCOLS.write();
    if map.contains_key(&proto.id) {
        return Err(CodecError::format(
            &proto.id,
            "protocol id already registered",
        ));
    }
    log::debug!("registered protocol `{}`", proto.id);
    map.insert(proto.id.clone(), proto);
    Ok(())
}

pub fn lookup_protocol(id: &str) -> Option<Arc<CompiledProtocol>> {
    PROTOCOLS.read().get(id).cloned()
}

/// Resolves `#proto:id` to the referenced node's literal value, parsed to
/// its canonical form. Only literal-valued nodes resolve across protocols;
/// another protocol's computed state is never visible.
pub(crate) fn cross_protocol_value(proto_id: &str, node_id: &str) -> Option<Value> {
    let proto = lookup_protocol(proto_id)?;
    let idx = proto.lookup(node_id)?;
    let cn = proto.get(idx);
    let literal = cn.node.value.as_deref()?;

    Some(match cn.node.leaf_kind()? {
        ValueKind::Uint | ValueKind::Int | ValueKind::Bit | ValueKind::Time => {
            Value::Int(parse_int_literal(literal).ok()?)
        }
        ValueKind::Float => Value::Float(parse_float_literal(literal).ok()?),
        ValueKind::Hex | ValueKind::String => Value::Str(literal.to_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::tree::Protocol;

    #[test]
    fn builtin_functions_present() {
        let reg = default_registry();
        assert!(reg.is_range("checksumBetween"));
        assert!(reg.is_range("crc16Between"));
        assert!(reg.contains("length"));
        assert!(!reg.is_range("length"));
    }

    #[test]
    fn cross_protocol_literals_resolve() {
        let proto = Protocol::new("xproto-test")
            .header(vec![Node::uint("version", 8).value("0x02")])
            .compile()
            .unwrap();
        register_protocol(Arc::new(proto)).unwrap();

        assert_eq!(
            cross_protocol_value("xproto-test", "version"),
            Some(Value::Int(2))
        );
        assert_eq!(cross_protocol_value("xproto-test", "ghost"), None);
        assert_eq!(cross_protocol_value("unknown", "version"), None);

        // Same id again is fatal.
        let dup = Protocol::new("xproto-test")
            .header(vec![Node::uint("version", 8).value("1")])
            .compile()
            .unwrap();
        assert!(register_protocol(Arc::new(dup)).is_err());
    }
}
