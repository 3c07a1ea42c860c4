//! The decode driver.

use super::{
    build_reports, loosely_equal, map_enum_decode, publish, range_matches, FieldReport, NodeRun,
    RunHost, VarMap,
};
use crate::bits::BitBuffer;
use crate::codec;
use crate::cond;
use crate::error::{CodecError, Result};
use crate::graph;
use crate::node::NodeBody;
use crate::padding::{self, PaddingContext};
use crate::registry::default_registry;
use crate::tree::CompiledProtocol;
use braid_expr::{EvalLimits, Evaluator, FunctionRegistry, Value};
use braid_utils::format_hex_0x;

/// Result of one decode run.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Bits consumed from the input; trailing input is left untouched.
    pub consumed_bits: u64,
    /// Per-node outcomes, in wire order.
    pub fields: Vec<FieldReport>,
}

impl Decoded {
    pub fn field(&self, id: &str) -> Option<&FieldReport> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// The user-facing decoded value of a field.
    pub fn value(&self, id: &str) -> Option<&Value> {
        self.field(id).and_then(|f| f.value.as_ref())
    }
}

pub struct Decoder<'p> {
    proto: &'p CompiledProtocol,
    registry: &'p FunctionRegistry,
    limits: EvalLimits,
}

impl<'p> Decoder<'p> {
    pub fn new(proto: &'p CompiledProtocol) -> Self {
        Self::with_registry(proto, default_registry())
    }

    pub fn with_registry(proto: &'p CompiledProtocol, registry: &'p FunctionRegistry) -> Self {
        Self {
            proto,
            registry,
            limits: EvalLimits::default(),
        }
    }

    pub fn limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded> {
        // Same pre-flight as the encoder, so cyclic or dangling
        // dependencies surface identically on both paths.
        let graph = graph::build(self.proto, self.registry, graph::Mode::Decode)?;
        graph.topo_order(self.proto)?;

        let buf = BitBuffer::from_bytes(bytes.to_vec());
        let evaluator = Evaluator::with_limits(self.registry, self.limits);
        let mut states = vec![NodeRun::default(); self.proto.len()];
        let mut vars = VarMap::new();

        let mut cursor = 0;
        for &root in self.proto.roots() {
            cursor = self.walk(root, cursor, &buf, &evaluator, &mut states, &mut vars)?;
        }

        self.verify(&evaluator, &mut states, &vars);

        log::debug!(
            "decoded `{}`: {cursor} of {} input bit(s) consumed",
            self.proto.id,
            buf.bit_len()
        );
        Ok(Decoded {
            consumed_bits: cursor,
            fields: build_reports(self.proto, &states),
        })
    }

    fn walk(
        &self,
        idx: usize,
        cursor: u64,
        buf: &BitBuffer,
        evaluator: &Evaluator<'_>,
        states: &mut [NodeRun],
        vars: &mut VarMap,
    ) -> Result<u64> {
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
            st.start_bit = cursor;
            st.end_bit = cursor;
        }

        if !cond.enabled {
            self.mark_skipped(idx, cursor, states);
            publish(vars, &cn.node.id, super::literal_value(cn), None, 0);
            return Ok(cursor);
        }

        match &cn.node.body {
            NodeBody::Structural { .. } | NodeBody::Group { .. } => {
                let mut c = cursor;
                for child in cn.children.clone() {
                    c = self.walk(child, c, buf, evaluator, states, vars)?;
                }
                let st = &mut states[idx];
                st.end_bit = c;
                st.bits = c - cursor;
                Ok(c)
            }
            NodeBody::Padding { config } => {
                let sibling_bits = cn
                    .parent
                    .map(|p| cursor - states[p].start_bit)
                    .unwrap_or(cursor);
                let container_bits = cn.parent.and_then(|p| {
                    let bits = self.proto.get(p).node.length_bits;
                    (bits > 0).then_some(bits)
                });

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
                            cursor_bits: cursor,
                            preceding_sibling_bits: sibling_bits,
                            container_bits,
                            evaluator,
                            host: &host,
                        },
                    )?
                };

                let bits = resolved.map(|r| r.bits).unwrap_or(0);
                self.check_available(cn, buf, cursor, bits)?;
                let frag = buf
                    .slice(cursor, bits)
                    .map_err(|e| CodecError::io(&cn.path, e.to_string()))?;

                let value = Value::Str(format_hex_0x(frag.as_bytes()));
                publish(vars, &cn.node.id, Some(value.clone()), Some(&frag), bits);
                let st = &mut states[idx];
                st.value = Some(value);
                st.bits = bits;
                st.frag = Some(frag);
                st.end_bit = cursor + bits;
                Ok(cursor + bits)
            }
            NodeBody::Leaf { kind } => {
                let kind = *kind;

                let bits = if cn.node.length_bits > 0 {
                    cn.node.length_bits
                } else if let Some(expr) = &cn.length {
                    let host = RunHost {
                        proto: self.proto,
                        vars,
                        states,
                    };
                    let length = evaluator
                        .eval(expr, &host)
                        .and_then(|v| v.as_int())
                        .map_err(|e| CodecError::from_eval(&cn.path, e))?;
                    if length < 0 {
                        return Err(CodecError::out_of_range(
                            &cn.path,
                            format!("decode length {length} is negative"),
                        ));
                    }
                    length as u64 * 8
                } else {
                    return Err(CodecError::format(
                        &cn.path,
                        "unsized field has no length expression for decoding",
                    ));
                };

                let available = buf.bit_len() - cursor;
                if bits > available && cn.node.optional {
                    // Optional tail fields may be absent.
                    publish(vars, &cn.node.id, None, None, 0);
                    return Ok(cursor);
                }
                self.check_available(cn, buf, cursor, bits)?;

                let raw = codec::decode_value(cn, kind, buf, cursor, bits)?;
                let labeled = map_enum_decode(cn, &raw)?;
                let transformed = match &cn.backward {
                    Some(expr) => {
                        let host = RunHost {
                            proto: self.proto,
                            vars,
                            states,
                        };
                        let bound = cond::WithValue {
                            inner: &host,
                            value: labeled.clone(),
                        };
                        evaluator
                            .eval(expr, &bound)
                            .map_err(|e| CodecError::from_eval(&cn.path, e))?
                    }
                    None => labeled.clone(),
                };

                let valid = match &cn.range {
                    Some(range) => Some(
                        range_matches(kind, range, &raw)
                            .map_err(|e| CodecError::out_of_range(&cn.path, e))?,
                    ),
                    None => None,
                };

                let frag = buf
                    .slice(cursor, bits)
                    .map_err(|e| CodecError::io(&cn.path, e.to_string()))?;
                publish(vars, &cn.node.id, Some(transformed.clone()), Some(&frag), bits);

                let st = &mut states[idx];
                st.value = Some(transformed);
                st.raw = Some(labeled);
                st.bits = bits;
                st.frag = Some(frag);
                st.end_bit = cursor + bits;
                st.valid = valid;
                Ok(cursor + bits)
            }
        }
    }

    fn check_available(
        &self,
        cn: &crate::tree::CompiledNode,
        buf: &BitBuffer,
        cursor: u64,
        bits: u64,
    ) -> Result<()> {
        let available = buf.bit_len() - cursor;
        if bits > available {
            return Err(CodecError::DecodeUnderrun {
                path: cn.path.clone(),
                needed: bits,
                available,
            });
        }
        Ok(())
    }

    fn mark_skipped(&self, idx: usize, cursor: u64, states: &mut [NodeRun]) {
        let end = self.proto.subtree_end(idx);
        for st in &mut states[idx..=end] {
            st.resolved = true;
            st.enabled = false;
            st.start_bit = cursor;
            st.end_bit = cursor;
        }
    }

    /// Re-evaluates verifications: every decoded field with a forward
    /// expression is recomputed from the decoded tree and compared against
    /// what was actually on the wire.
    fn verify(&self, evaluator: &Evaluator<'_>, states: &mut [NodeRun], vars: &VarMap) {
        for (idx, cn) in self.proto.nodes() {
            let Some(expr) = &cn.forward else { continue };
            if !states[idx].resolved || !states[idx].enabled {
                continue;
            }
            let expected = {
                let host = RunHost {
                    proto: self.proto,
                    vars,
                    states,
                };
                evaluator.eval(expr, &host)
            };
            match expected {
                Ok(expected) => {
                    let matches = states[idx]
                        .raw
                        .as_ref()
                        .or(states[idx].value.as_ref())
                        .map(|got| loosely_equal(&expected, got))
                        .unwrap_or(false);
                    let st = &mut states[idx];
                    st.valid = Some(st.valid.unwrap_or(true) && matches);
                }
                Err(e) => {
                    log::debug!("verification of `{}` skipped: {e}", cn.node.id);
                }
            }
        }
    }
}
