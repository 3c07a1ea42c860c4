//! The encode driver.

use super::{
    build_reports, effective_enabled, map_enum_encode, publish, range_matches, subtree_bits,
    FieldReport, NodeRun, RunHost, VarMap,
};
use crate::bits::BitBuffer;
use crate::codec;
use crate::cond::{self, CondEffect};
use crate::error::{CodecError, Result};
use crate::graph;
use crate::node::NodeBody;
use crate::padding::{self, PaddingContext};
use crate::registry::default_registry;
use crate::tree::CompiledProtocol;
use braid_expr::{EvalLimits, Evaluator, FunctionRegistry, Value};
use braid_utils::{format_hex, format_hex_0x};

/// Result of one encode run.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// `ceil(total_bits / 8)` bytes, MSB-first within each byte.
    pub bytes: Vec<u8>,
    pub total_bits: u64,
    /// Per-node outcomes, in wire order.
    pub fields: Vec<FieldReport>,
}

impl Encoded {
    pub fn hex(&self) -> String {
        format_hex(&self.bytes)
    }

    pub fn field(&self, id: &str) -> Option<&FieldReport> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// One-shot encoder over a compiled protocol. Values can be overridden per
/// field before the run; the tree itself is never mutated.
pub struct Encoder<'p> {
    proto: &'p CompiledProtocol,
    registry: &'p FunctionRegistry,
    limits: EvalLimits,
    overrides: VarMap,
}

impl<'p> Encoder<'p> {
    pub fn new(proto: &'p CompiledProtocol) -> Self {
        Self::with_registry(proto, default_registry())
    }

    pub fn with_registry(proto: &'p CompiledProtocol, registry: &'p FunctionRegistry) -> Self {
        Self {
            proto,
            registry,
            limits: EvalLimits::default(),
            overrides: VarMap::new(),
        }
    }

    pub fn limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Overrides a field's literal value for this encoder's runs.
    pub fn set_value(&mut self, id: &str, value: impl Into<Value>) -> &mut Self {
        self.overrides.insert(id.to_owned(), value.into());
        self
    }

    pub fn encode(&self) -> Result<Encoded> {
        let graph = graph::build(self.proto, self.registry, graph::Mode::Encode)?;
        let order = graph.topo_order(self.proto)?;
        let evaluator = Evaluator::with_limits(self.registry, self.limits);

        let mut states = vec![NodeRun::default(); self.proto.len()];
        let mut vars = VarMap::new();

        for &idx in &order {
            self.eval_node(idx, &evaluator, &mut states, &mut vars)?;
        }

        // Assembly: wire order is the tree's pre-order, regardless of the
        // evaluation order above. Bit ranges are assigned here.
        let mut buf = BitBuffer::new();
        for (idx, cn) in self.proto.nodes() {
            if !cn.node.is_wire() {
                continue;
            }
            states[idx].start_bit = buf.bit_len();
            if effective_enabled(self.proto, &states, idx) {
                if let Some(frag) = &states[idx].frag {
                    buf.push_buffer(frag);
                }
            }
            states[idx].end_bit = buf.bit_len();
        }

        // Containers span their wire descendants.
        for (idx, cn) in self.proto.nodes() {
            if cn.node.is_wire() {
                continue;
            }
            let end_idx = self.proto.subtree_end(idx);
            let wire: Vec<usize> = (idx..=end_idx)
                .filter(|&j| self.proto.get(j).node.is_wire() && states[j].resolved)
                .collect();
            if let (Some(&first), Some(&last)) = (wire.first(), wire.last()) {
                states[idx].start_bit = states[first].start_bit;
                states[idx].end_bit = states[last].end_bit;
            }
        }

        let total_bits = buf.bit_len();
        log::debug!(
            "encoded `{}`: {} bit(s), {} byte(s)",
            self.proto.id,
            total_bits,
            buf.byte_len()
        );
        Ok(Encoded {
            total_bits,
            fields: build_reports(self.proto, &states),
            bytes: buf.into_bytes(),
        })
    }

    fn eval_node(
        &self,
        idx: usize,
        evaluator: &Evaluator<'_>,
        states: &mut [NodeRun],
        vars: &mut VarMap,
    ) -> Result<()> {
        let cn = self.proto.get(idx);

        let cond = {
            let host = RunHost {
                proto: self.proto,
                vars,
                states,
            };
            cond::resolve(cn, evaluator, &host)?
        };

        {
            let st = &mut states[idx];
            st.resolved = true;
            st.enabled = cond.enabled;
            st.effect = cond.effect;
            st.reason = cond.reason;
        }

        let enabled = effective_enabled(self.proto, states, idx);

        match &cn.node.body {
            NodeBody::Structural { .. } | NodeBody::Group { .. } => Ok(()),
            NodeBody::Padding { config } => {
                if !enabled {
                    publish(vars, &cn.node.id, None, None, 0);
                    return Ok(());
                }

                let cursor_bits: u64 = self
                    .proto
                    .wire_indexes()
                    .take_while(|&j| j < idx)
                    .filter(|&j| effective_enabled(self.proto, states, j))
                    .map(|j| states[j].bits)
                    .sum();
                let (sibling_bits, container_bits) = self.sibling_context(idx, states);

                let resolved = {
                    let host = RunHost {
                        proto: self.proto,
                        vars,
                        states,
                    };
                    padding::resolve(
                        cn,
                        config,
                        &PaddingContext {
                            cursor_bits,
                            preceding_sibling_bits: sibling_bits,
                            container_bits,
                            evaluator,
                            host: &host,
                        },
                    )?
                };

                match resolved {
                    None => {
                        publish(vars, &cn.node.id, None, None, 0);
                    }
                    Some(r) => {
                        let mut frag = BitBuffer::new();
                        frag.push_bit_slice(&r.bytes, r.bits)
                            .map_err(|e| CodecError::io(&cn.path, e.to_string()))?;
                        let value = Value::Str(format_hex_0x(frag.as_bytes()));
                        publish(vars, &cn.node.id, Some(value.clone()), Some(&frag), r.bits);
                        let st = &mut states[idx];
                        st.value = Some(value);
                        st.bits = r.bits;
                        st.frag = Some(frag);
                    }
                }
                Ok(())
            }
            NodeBody::Leaf { kind } => {
                let kind = *kind;
                if !enabled {
                    publish(vars, &cn.node.id, super::literal_value(cn), None, 0);
                    return Ok(());
                }

                let effect = states[idx].effect;
                let user_value: Value = if effect == Some(CondEffect::ClearValue) {
                    Value::Str(kind.zero_literal(cn.node.length_bits))
                } else if effect == Some(CondEffect::SetDefault) {
                    Value::Str(cn.node.default_value.clone().ok_or_else(|| {
                        CodecError::format(&cn.path, "SET_DEFAULT without a configured default")
                    })?)
                } else if let Some(expr) = &cn.forward {
                    let host = RunHost {
                        proto: self.proto,
                        vars,
                        states,
                    };
                    evaluator
                        .eval(expr, &host)
                        .map_err(|e| CodecError::from_eval(&cn.path, e))?
                } else if let Some(v) = self.overrides.get(&cn.node.id) {
                    v.clone()
                } else if let Some(lit) = &cn.node.value {
                    Value::Str(lit.clone())
                } else {
                    // Optional field with nothing to encode: zero width.
                    publish(vars, &cn.node.id, None, None, 0);
                    return Ok(());
                };

                let wire_value = map_enum_encode(cn, &user_value)?;

                if let Some(range) = &cn.range {
                    let ok = range_matches(kind, range, &wire_value)
                        .map_err(|e| CodecError::out_of_range(&cn.path, e))?;
                    if !ok {
                        return Err(CodecError::out_of_range(
                            &cn.path,
                            format!("value `{wire_value}` outside range {}", range.source()),
                        ));
                    }
                }

                let mut frag = BitBuffer::new();
                codec::encode_value(cn, kind, &wire_value, &mut frag)?;
                let bits = frag.bit_len();

                // Publish the canonical user-facing value: the enum label
                // when there is one, otherwise what a decode of the
                // fragment would yield.
                let canonical = match &cn.node.enums {
                    Some(enums) => {
                        let numeric = match &wire_value {
                            Value::Int(i) => Some(*i),
                            Value::Str(s) => crate::value_fmt::parse_int_literal(s).ok(),
                            _ => None,
                        };
                        numeric
                            .and_then(|n| enums.label_for_value(n))
                            .map(|l| Value::Str(l.to_owned()))
                            .unwrap_or_else(|| user_value.clone())
                    }
                    None => codec::decode_value(cn, kind, &frag, 0, bits)?,
                };

                publish(vars, &cn.node.id, Some(canonical.clone()), Some(&frag), bits);
                let st = &mut states[idx];
                st.value = Some(canonical);
                st.raw = Some(wire_value);
                st.bits = bits;
                st.frag = Some(frag);
                Ok(())
            }
        }
    }

    /// Actual bits of enabled siblings preceding `idx` in its container,
    /// plus the container's declared capacity.
    fn sibling_context(&self, idx: usize, states: &[NodeRun]) -> (u64, Option<u64>) {
        let Some(parent) = self.proto.get(idx).parent else {
            // Root-level padding measures against the whole preceding tree.
            let bits = self
                .proto
                .roots()
                .iter()
                .take_while(|&&r| r != idx)
                .map(|&r| subtree_bits(self.proto, states, r))
                .sum();
            return (bits, None);
        };
        let pn = self.proto.get(parent);
        let bits = pn
            .children
            .iter()
            .take_while(|&&c| c != idx)
            .map(|&c| subtree_bits(self.proto, states, c))
            .sum();
        let container = (pn.node.length_bits > 0).then_some(pn.node.length_bits);
        (bits, container)
    }
}
