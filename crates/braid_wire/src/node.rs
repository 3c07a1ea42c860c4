//! The protocol node model.
//!
//! A [`Node`] is pure declarative metadata: what a field is, not what it
//! currently holds. Per-run state (values, bit ranges, enable flags) lives
//! in the scheduler's run, so one compiled tree can serve any number of
//! sequential encode/decode calls. Cross-references between nodes are
//! symbolic (ids), never pointers.

use crate::error::{CodecError, Result};
use braid_utils::format_hex_0x;

/// Byte order for multi-byte numeric fields. Sub-byte fields are always
/// MSB-first within the current byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Hex,
    Bit,
    Uint,
    Int,
    Float,
    String,
    Time,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Hex => "hex",
            ValueKind::Bit => "bit",
            ValueKind::Uint => "uint",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Time => "time",
        }
    }

    pub fn parse(s: &str) -> Option<ValueKind> {
        Some(match s.to_ascii_lowercase().as_str() {
            "hex" => ValueKind::Hex,
            "bit" => ValueKind::Bit,
            "uint" => ValueKind::Uint,
            "int" => ValueKind::Int,
            "float" => ValueKind::Float,
            "string" => ValueKind::String,
            "time" => ValueKind::Time,
            _ => return None,
        })
    }

    /// The literal a `CLEAR_VALUE` conditional outcome writes.
    pub fn zero_literal(self, length_bits: u64) -> String {
        match self {
            ValueKind::Hex => format_hex_0x(&vec![0u8; (length_bits / 8).max(1) as usize]),
            ValueKind::String => String::new(),
            _ => "0".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Ascii,
    Latin1,
}

impl Charset {
    pub fn parse(s: &str) -> Option<Charset> {
        Some(match s.to_ascii_uppercase().replace('_', "-").as_str() {
            "UTF-8" | "UTF8" => Charset::Utf8,
            "ASCII" | "US-ASCII" => Charset::Ascii,
            "LATIN-1" | "LATIN1" | "ISO-8859-1" => Charset::Latin1,
            _ => return None,
        })
    }
}

/// Time-format hint for TIME fields; governs how datetime literals map to
/// the wire number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Millis,
}

impl TimeUnit {
    pub fn parse(s: &str) -> Option<TimeUnit> {
        Some(match s.to_ascii_lowercase().as_str() {
            "s" | "sec" | "seconds" => TimeUnit::Seconds,
            "ms" | "millis" | "milliseconds" => TimeUnit::Millis,
            _ => return None,
        })
    }
}

/// Ordered mapping from wire literals to display labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumSpec {
    entries: Vec<(String, String)>,
}

impl EnumSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, wire: impl Into<String>, label: impl Into<String>) {
        self.entries.push((wire.into(), label.into()));
    }

    pub fn with(mut self, wire: impl Into<String>, label: impl Into<String>) -> Self {
        self.push(wire, label);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn wire_for_label(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, l)| l == label)
            .map(|(w, _)| w.as_str())
    }

    /// Looks up the label for a decoded numeric wire value; wire literals
    /// are compared after numeric parsing so `"0x01"` and `"1"` agree.
    pub fn label_for_value(&self, value: i128) -> Option<&str> {
        self.entries
            .iter()
            .find(|(w, _)| crate::value_fmt::parse_int_literal(w) == Ok(value))
            .map(|(_, l)| l.as_str())
    }

    pub fn contains_wire(&self, wire: &str) -> bool {
        let parsed = crate::value_fmt::parse_int_literal(wire);
        self.entries.iter().any(|(w, _)| {
            w == wire || (parsed.is_ok() && crate::value_fmt::parse_int_literal(w) == parsed)
        })
    }
}

/// What a conditional rule does to its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondAction {
    Enable,
    Disable,
    SetDefault,
    ClearValue,
}

impl CondAction {
    pub fn parse(s: &str) -> Option<CondAction> {
        Some(match s.to_ascii_uppercase().as_str() {
            "ENABLE" => CondAction::Enable,
            "DISABLE" => CondAction::Disable,
            "SET_DEFAULT" => CondAction::SetDefault,
            "CLEAR_VALUE" => CondAction::ClearValue,
            _ => return None,
        })
    }
}

/// A conditional-enable rule. `expr` sees the referenced node's current
/// value bound to the variable `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct CondDep {
    pub ref_id: String,
    pub expr: String,
    pub on_match: CondAction,
    pub on_mismatch: CondAction,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingStrategy {
    /// Fill the declared target length, minus the preceding siblings.
    FixedLength,
    /// Pad up to the next multiple of `target_length` bytes.
    Alignment,
    /// Length comes from an expression, in bytes.
    Dynamic,
    /// Fill the owning container's declared length. The padding node must
    /// be the container's last wire child.
    FillContainer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaddingConfig {
    pub strategy: PaddingStrategy,
    /// Bytes. Target for FIXED_LENGTH, alignment for ALIGNMENT.
    pub target_length: u64,
    /// Bytes, for DYNAMIC.
    pub length_expr: Option<String>,
    /// Fill pattern; at least one byte.
    pub pattern: Vec<u8>,
    /// Repeat the pattern, or write it once and zero-fill the rest.
    pub repeat_pattern: bool,
    /// Clamp bounds, bytes.
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub enabled: bool,
    pub enable_condition: Option<String>,
}

impl PaddingConfig {
    pub fn new(strategy: PaddingStrategy) -> Self {
        Self {
            strategy,
            target_length: 0,
            length_expr: None,
            pattern: vec![0x00],
            repeat_pattern: true,
            min_length: None,
            max_length: None,
            enabled: true,
            enable_condition: None,
        }
    }

    pub fn target(mut self, bytes: u64) -> Self {
        self.target_length = bytes;
        self
    }

    pub fn pattern(mut self, pattern: Vec<u8>) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn length_expr(mut self, expr: impl Into<String>) -> Self {
        self.length_expr = Some(expr.into());
        self
    }
}

/// Structural classification of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    /// Carries wire bits of one [`ValueKind`].
    Leaf { kind: ValueKind },
    /// Contributes the concatenation of its enabled children.
    Structural { children: Vec<Node> },
    /// A repeated sub-structure, expanded into flat disambiguated children
    /// before compilation.
    Group {
        children: Vec<Node>,
        count: usize,
        /// `{id}` and `{n}` placeholders; `{n}` counts from 1.
        id_format: String,
    },
    /// Filler computed at encode time.
    Padding { config: PaddingConfig },
}

/// One element of a protocol tree. Construct through the kind-specific
/// constructors and chain the setters.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub name: String,
    /// 0 means computed at encode time; legal only for HEX and padding.
    pub length_bits: u64,
    pub endian: Endian,
    pub charset: Charset,
    pub optional: bool,
    /// Fractional sort key; siblings are re-sequenced by it when the tree
    /// is compiled. Equal keys keep declared order.
    pub order: f32,
    pub trim_trailing_zeros: bool,
    pub time_unit: Option<TimeUnit>,
    /// Literal value source (decimal, `0x…`, `0b…`, quoted text, datetime).
    pub value: Option<String>,
    /// Literal written by a SET_DEFAULT conditional outcome.
    pub default_value: Option<String>,
    pub forward_expr: Option<String>,
    pub backward_expr: Option<String>,
    /// Decode-side length in bytes, for unsized HEX fields.
    pub length_expr: Option<String>,
    pub range_spec: Option<String>,
    pub enums: Option<EnumSpec>,
    pub conditions: Vec<CondDep>,
    pub body: NodeBody,
}

impl Node {
    fn base(id: impl Into<String>, body: NodeBody) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            length_bits: 0,
            endian: Endian::Big,
            charset: Charset::Utf8,
            optional: false,
            order: 0.0,
            trim_trailing_zeros: false,
            time_unit: None,
            value: None,
            default_value: None,
            forward_expr: None,
            backward_expr: None,
            length_expr: None,
            range_spec: None,
            enums: None,
            conditions: Vec::new(),
            body,
        }
    }

    pub fn leaf(id: impl Into<String>, kind: ValueKind, length_bits: u64) -> Self {
        let mut node = Self::base(id, NodeBody::Leaf { kind });
        node.length_bits = length_bits;
        node
    }

    pub fn uint(id: impl Into<String>, length_bits: u64) -> Self {
        Self::leaf(id, ValueKind::Uint, length_bits)
    }

    pub fn int(id: impl Into<String>, length_bits: u64) -> Self {
        Self::leaf(id, ValueKind::Int, length_bits)
    }

    pub fn bit(id: impl Into<String>, length_bits: u64) -> Self {
        Self::leaf(id, ValueKind::Bit, length_bits)
    }

    pub fn hex(id: impl Into<String>, length_bits: u64) -> Self {
        Self::leaf(id, ValueKind::Hex, length_bits)
    }

    pub fn float(id: impl Into<String>, length_bits: u64) -> Self {
        Self::leaf(id, ValueKind::Float, length_bits)
    }

    pub fn string(id: impl Into<String>, length_bits: u64) -> Self {
        Self::leaf(id, ValueKind::String, length_bits)
    }

    pub fn time(id: impl Into<String>, length_bits: u64) -> Self {
        Self::leaf(id, ValueKind::Time, length_bits)
    }

    pub fn structural(id: impl Into<String>, children: Vec<Node>) -> Self {
        Self::base(id, NodeBody::Structural { children })
    }

    pub fn group(id: impl Into<String>, children: Vec<Node>, count: usize) -> Self {
        Self::base(
            id,
            NodeBody::Group {
                children,
                count,
                id_format: "{id}_{n}".to_owned(),
            },
        )
    }

    pub fn padding(id: impl Into<String>, config: PaddingConfig) -> Self {
        Self::base(id, NodeBody::Padding { config })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn value(mut self, literal: impl Into<String>) -> Self {
        self.value = Some(literal.into());
        self
    }

    pub fn default_value(mut self, literal: impl Into<String>) -> Self {
        self.default_value = Some(literal.into());
        self
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn order(mut self, order: f32) -> Self {
        self.order = order;
        self
    }

    pub fn trim_trailing_zeros(mut self) -> Self {
        self.trim_trailing_zeros = true;
        self
    }

    pub fn time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = Some(unit);
        self
    }

    pub fn forward(mut self, expr: impl Into<String>) -> Self {
        self.forward_expr = Some(expr.into());
        self
    }

    pub fn backward(mut self, expr: impl Into<String>) -> Self {
        self.backward_expr = Some(expr.into());
        self
    }

    pub fn length_expr(mut self, expr: impl Into<String>) -> Self {
        self.length_expr = Some(expr.into());
        self
    }

    pub fn range(mut self, spec: impl Into<String>) -> Self {
        self.range_spec = Some(spec.into());
        self
    }

    pub fn enums(mut self, spec: EnumSpec) -> Self {
        self.enums = Some(spec);
        self
    }

    pub fn condition(
        mut self,
        ref_id: impl Into<String>,
        expr: impl Into<String>,
        on_match: CondAction,
        on_mismatch: CondAction,
    ) -> Self {
        let priority = self.conditions.len() as i32;
        self.conditions.push(CondDep {
            ref_id: ref_id.into(),
            expr: expr.into(),
            on_match,
            on_mismatch,
            priority,
        });
        self
    }

    pub fn condition_with_priority(mut self, cond: CondDep) -> Self {
        self.conditions.push(cond);
        self
    }

    pub fn is_wire(&self) -> bool {
        matches!(self.body, NodeBody::Leaf { .. } | NodeBody::Padding { .. })
    }

    pub fn leaf_kind(&self) -> Option<ValueKind> {
        match &self.body {
            NodeBody::Leaf { kind } => Some(*kind),
            _ => None,
        }
    }

    pub(crate) fn children(&self) -> &[Node] {
        match &self.body {
            NodeBody::Structural { children } | NodeBody::Group { children, .. } => children,
            _ => &[],
        }
    }
}

/// Expands every [`NodeBody::Group`] in the subtree into flat, id-renamed
/// copies of its children. `{id}` is the original id, `{n}` the 1-based
/// repetition index.
pub(crate) fn expand_groups(node: Node, path: &str) -> Result<Node> {
    let mut node = node;
    let body = std::mem::replace(&mut node.body, NodeBody::Structural { children: vec![] });
    node.body = match body {
        NodeBody::Group {
            children,
            count,
            id_format,
        } => {
            if count == 0 {
                return Err(CodecError::format(
                    format!("{path}/{}", node.id),
                    "group count must be at least 1",
                ));
            }
            let mut expanded = Vec::with_capacity(children.len() * count);
            for n in 1..=count {
                for child in &children {
                    let mut copy = child.clone();
                    rename_subtree(&mut copy, &id_format, n);
                    expanded.push(expand_groups(copy, path)?);
                }
            }
            NodeBody::Structural { children: expanded }
        }
        NodeBody::Structural { children } => {
            let child_path = format!("{path}/{}", node.id);
            let children = children
                .into_iter()
                .map(|c| expand_groups(c, &child_path))
                .collect::<Result<Vec<_>>>()?;
            NodeBody::Structural { children }
        }
        other => other,
    };
    Ok(node)
}

fn rename_subtree(node: &mut Node, id_format: &str, n: usize) {
    node.id = id_format
        .replace("{id}", &node.id)
        .replace("{n}", &n.to_string());
    match &mut node.body {
        NodeBody::Structural { children } | NodeBody::Group { children, .. } => {
            for child in children {
                rename_subtree(child, id_format, n);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_lookup_is_numeric_aware() {
        let spec = EnumSpec::new().with("0x00", "off").with("1", "on");
        assert_eq!(spec.wire_for_label("on"), Some("1"));
        assert_eq!(spec.label_for_value(0), Some("off"));
        assert_eq!(spec.label_for_value(1), Some("on"));
        assert_eq!(spec.label_for_value(9), None);
        assert!(spec.contains_wire("0"));
        assert!(spec.contains_wire("0x01"));
    }

    #[test]
    fn group_expansion_renames_ids() {
        let group = Node::group(
            "samples",
            vec![Node::uint("seq", 8), Node::uint("val", 16)],
            2,
        );
        let expanded = expand_groups(group, "p").unwrap();
        let ids: Vec<&str> = expanded.children().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["seq_1", "val_1", "seq_2", "val_2"]);
    }
}
