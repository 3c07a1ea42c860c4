//! Declarative schema files.
//!
//! A TOML document describing a protocol tree; the second of the two
//! equivalent tree sources (the other being the `ProtocolDef` derive).
//! Both produce the same [`Protocol`].
//!
//! ```toml
//! id = "demo"
//!
//! [[header.node]]
//! id = "flag"
//! kind = "uint"
//! bits = 8
//! value = "1"
//!
//! [[body.node]]
//! id = "payload"
//! kind = "hex"
//! bits = 32
//! value = "0xDEADBEEF"
//! ```

use crate::node::{CondAction, CondDep, Charset, EnumSpec, Endian, Node, NodeBody, PaddingConfig, PaddingStrategy, TimeUnit, ValueKind};
use crate::tree::Protocol;
use anyhow::{anyhow, bail};
use braid_utils::{parse_hex, AnyResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaDoc {
    id: String,
    name: Option<String>,
    header: Option<SectionSchema>,
    body: Option<SectionSchema>,
    tail: Option<SectionSchema>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SectionSchema {
    /// Container capacity in bytes (FILL_CONTAINER budget).
    length: Option<u64>,
    #[serde(default, rename = "node")]
    nodes: Vec<NodeSchema>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeSchema {
    id: String,
    name: Option<String>,
    kind: Option<String>,
    bits: Option<u64>,
    bytes: Option<u64>,
    endian: Option<String>,
    charset: Option<String>,
    #[serde(default)]
    optional: bool,
    order: Option<f32>,
    #[serde(default)]
    trim_trailing_zeros: bool,
    time_unit: Option<String>,
    value: Option<String>,
    default: Option<String>,
    forward: Option<String>,
    backward: Option<String>,
    length_expr: Option<String>,
    range: Option<String>,
    /// Container capacity in bytes, for structural nodes.
    length: Option<u64>,
    #[serde(default, rename = "enum")]
    enums: Vec<EnumEntrySchema>,
    #[serde(default, rename = "conditional")]
    conditionals: Vec<CondSchema>,
    padding: Option<PaddingSchema>,
    group: Option<GroupSchema>,
    #[serde(default, rename = "node")]
    children: Vec<NodeSchema>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnumEntrySchema {
    wire: String,
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CondSchema {
    #[serde(rename = "ref")]
    ref_id: String,
    expr: String,
    #[serde(rename = "match")]
    on_match: String,
    #[serde(rename = "mismatch")]
    on_mismatch: String,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PaddingSchema {
    strategy: String,
    target: Option<u64>,
    length_expr: Option<String>,
    pattern: Option<String>,
    repeat: Option<bool>,
    min: Option<u64>,
    max: Option<u64>,
    enabled: Option<bool>,
    enable_if: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupSchema {
    count: usize,
    id_format: Option<String>,
}

/// Loads a protocol tree from a TOML schema document.
pub fn from_toml_str(text: &str) -> AnyResult<Protocol> {
    let doc: SchemaDoc = toml::from_str(text)?;

    let mut proto = Protocol::new(doc.id);
    if let Some(name) = doc.name {
        proto = proto.named(name);
    }
    if let Some(section) = doc.header {
        proto = proto.header_node(convert_section("header", section)?);
    }
    if let Some(section) = doc.body {
        proto = proto.body_node(convert_section("body", section)?);
    }
    if let Some(section) = doc.tail {
        proto = proto.tail_node(convert_section("tail", section)?);
    }
    Ok(proto)
}

fn convert_section(id: &str, section: SectionSchema) -> AnyResult<Node> {
    let children = section
        .nodes
        .into_iter()
        .map(convert_node)
        .collect::<AnyResult<Vec<_>>>()?;
    let mut node = Node::structural(id, children);
    if let Some(bytes) = section.length {
        node.length_bits = bytes * 8;
    }
    Ok(node)
}

fn convert_node(schema: NodeSchema) -> AnyResult<Node> {
    let NodeSchema {
        id,
        name,
        kind,
        bits,
        bytes,
        endian,
        charset,
        optional,
        order,
        trim_trailing_zeros,
        time_unit,
        value,
        default,
        forward,
        backward,
        length_expr,
        range,
        length,
        enums,
        conditionals,
        padding,
        group,
        children,
    } = schema;

    let children = children
        .into_iter()
        .map(convert_node)
        .collect::<AnyResult<Vec<_>>>()?;

    let mut node = if let Some(padding) = padding {
        if kind.is_some() || !children.is_empty() {
            bail!("node `{id}`: padding nodes carry no kind or children");
        }
        Node::padding(&id, convert_padding(&id, &padding)?)
    } else if let Some(group) = group {
        if children.is_empty() {
            bail!("group `{id}` needs child nodes");
        }
        let mut n = Node::group(&id, children, group.count);
        if let Some(format) = group.id_format {
            if let NodeBody::Group { id_format, .. } = &mut n.body {
                *id_format = format;
            }
        }
        n
    } else if let Some(kind_name) = kind {
        if !children.is_empty() {
            bail!("node `{id}`: leaves cannot have children");
        }
        let kind = ValueKind::parse(&kind_name)
            .ok_or_else(|| anyhow!("node `{id}`: unknown kind `{kind_name}`"))?;
        let bits = match (bits, bytes) {
            (Some(bits), None) => bits,
            (None, Some(bytes)) => bytes * 8,
            (None, None) => 0,
            (Some(_), Some(_)) => bail!("node `{id}`: give bits or bytes, not both"),
        };
        Node::leaf(&id, kind, bits)
    } else if !children.is_empty() {
        let mut n = Node::structural(&id, children);
        if let Some(bytes) = length {
            n.length_bits = bytes * 8;
        }
        n
    } else {
        bail!("node `{id}`: needs a kind, children, padding or group");
    };

    if let Some(name) = name {
        node.name = name;
    }
    if let Some(endian) = endian {
        node.endian = match endian.to_ascii_lowercase().as_str() {
            "big" | "be" => Endian::Big,
            "little" | "le" => Endian::Little,
            other => bail!("node `{id}`: unknown endian `{other}`"),
        };
    }
    if let Some(charset) = charset {
        node.charset = Charset::parse(&charset)
            .ok_or_else(|| anyhow!("node `{id}`: unknown charset `{charset}`"))?;
    }
    if let Some(unit) = time_unit {
        node.time_unit = Some(
            TimeUnit::parse(&unit)
                .ok_or_else(|| anyhow!("node `{id}`: unknown time unit `{unit}`"))?,
        );
    }
    node.optional = optional;
    node.trim_trailing_zeros = trim_trailing_zeros;
    if let Some(order) = order {
        node.order = order;
    }
    node.value = value;
    node.default_value = default;
    node.forward_expr = forward;
    node.backward_expr = backward;
    node.length_expr = length_expr;
    node.range_spec = range;

    if !enums.is_empty() {
        let mut spec = EnumSpec::new();
        for entry in enums {
            spec.push(entry.wire, entry.label);
        }
        node.enums = Some(spec);
    }

    for cond in conditionals {
        let on_match = CondAction::parse(&cond.on_match)
            .ok_or_else(|| anyhow!("node `{id}`: unknown action `{}`", cond.on_match))?;
        let on_mismatch = CondAction::parse(&cond.on_mismatch)
            .ok_or_else(|| anyhow!("node `{id}`: unknown action `{}`", cond.on_mismatch))?;
        node.conditions.push(CondDep {
            ref_id: cond.ref_id,
            expr: cond.expr,
            on_match,
            on_mismatch,
            priority: cond.priority,
        });
    }

    Ok(node)
}

fn convert_padding(id: &str, schema: &PaddingSchema) -> AnyResult<PaddingConfig> {
    let strategy = match schema.strategy.to_ascii_lowercase().as_str() {
        "fixed" | "fixed_length" => PaddingStrategy::FixedLength,
        "alignment" | "align" => PaddingStrategy::Alignment,
        "dynamic" => PaddingStrategy::Dynamic,
        "fill" | "fill_container" => PaddingStrategy::FillContainer,
        other => bail!("padding `{id}`: unknown strategy `{other}`"),
    };

    let mut config = PaddingConfig::new(strategy);
    if let Some(target) = schema.target {
        config.target_length = target;
    }
    config.length_expr = schema.length_expr.clone();
    if let Some(pattern) = &schema.pattern {
        config.pattern = parse_hex(pattern)?;
        if config.pattern.is_empty() {
            bail!("padding `{id}`: empty pattern");
        }
    }
    if let Some(repeat) = schema.repeat {
        config.repeat_pattern = repeat;
    }
    config.min_length = schema.min;
    config.max_length = schema.max;
    if let Some(enabled) = schema.enabled {
        config.enabled = enabled;
    }
    config.enable_condition = schema.enable_if.clone();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Encoder;

    const DOC: &str = r#"
id = "demo"
name = "Demo protocol"

[[header.node]]
id = "flag"
kind = "uint"
bits = 8
value = "1"

[[header.node.enum]]
wire = "0"
label = "off"

[[header.node.enum]]
wire = "1"
label = "on"

[[body.node]]
id = "payload"
kind = "hex"
bits = 32
value = "0xDEADBEEF"

[[body.node]]
id = "note"
kind = "string"
bytes = 4
charset = "ASCII"
value = "ok"

[[body.node.conditional]]
ref = "flag"
expr = "value == 'on'"
match = "ENABLE"
mismatch = "DISABLE"
"#;

    #[test]
    fn document_loads_and_encodes() {
        let proto = from_toml_str(DOC).unwrap().compile().unwrap();
        assert_eq!(proto.id, "demo");
        assert!(proto.lookup("payload").is_some());

        let out = Encoder::new(&proto).encode().unwrap();
        assert_eq!(out.bytes, vec![0x01, 0xDE, 0xAD, 0xBE, 0xEF, b'o', b'k', 0, 0]);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(from_toml_str("id = \"x\"\nbogus = 1\n").is_err());
    }

    #[test]
    fn padding_section_parses() {
        let doc = r#"
id = "p"

[body]
length = 8

[[body.node]]
id = "data"
kind = "uint"
bits = 16
value = "0xABCD"

[[body.node]]
id = "pad"

[body.node.padding]
strategy = "fill_container"
pattern = "0xFF"
"#;
        let proto = from_toml_str(doc).unwrap().compile().unwrap();
        let out = Encoder::new(&proto).encode().unwrap();
        assert_eq!(out.bytes, vec![0xAB, 0xCD, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }
}
