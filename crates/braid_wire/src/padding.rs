//! Padding length and fill resolution.
//!
//! Runs in the padding node's scheduling slot, where every preceding wire
//! node's *actual* encoded length is already known (conditionals and
//! unsized hex can make those differ from the declared lengths).

use crate::error::{CodecError, Result};
use crate::node::{PaddingConfig, PaddingStrategy};
use crate::tree::CompiledNode;
use braid_expr::{EvalHost, Evaluator};
use braid_utils::align_gap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedPadding {
    pub bits: u64,
    /// Fill material, `ceil(bits / 8)` bytes; a trailing partial byte is
    /// used MSB-first.
    pub bytes: Vec<u8>,
}

pub(crate) struct PaddingContext<'a> {
    /// Wire cursor: actual bits of every enabled wire node before this one.
    pub cursor_bits: u64,
    /// Actual bits of the enabled siblings preceding this node within its
    /// container.
    pub preceding_sibling_bits: u64,
    /// The owning container's declared length, when it has one.
    pub container_bits: Option<u64>,
    pub evaluator: &'a Evaluator<'a>,
    pub host: &'a dyn EvalHost,
}

/// Computes the filler for one padding node; `None` when the padding is
/// switched off (statically or by its enable condition).
pub(crate) fn resolve(
    cn: &CompiledNode,
    config: &PaddingConfig,
    ctx: &PaddingContext<'_>,
) -> Result<Option<ResolvedPadding>> {
    if !config.enabled {
        return Ok(None);
    }
    if let Some(expr) = &cn.pad_enable {
        let on = ctx
            .evaluator
            .eval(expr, ctx.host)
            .and_then(|v| v.as_bool())
            .map_err(|e| CodecError::from_eval(&cn.path, e))?;
        if !on {
            return Ok(None);
        }
    }

    let bits = match config.strategy {
        PaddingStrategy::FixedLength => {
            checked_gap(config.target_length * 8, ctx.preceding_sibling_bits, cn)?
        }
        PaddingStrategy::Alignment => align_gap(ctx.cursor_bits, config.target_length * 8),
        PaddingStrategy::Dynamic => {
            let expr = cn.pad_length.as_ref().expect("validated");
            let length = ctx
                .evaluator
                .eval(expr, ctx.host)
                .and_then(|v| v.as_int())
                .map_err(|e| CodecError::from_eval(&cn.path, e))?;
            if length < 0 {
                return Err(CodecError::out_of_range(
                    &cn.path,
                    format!("dynamic padding length {length} is negative"),
                ));
            }
            length as u64 * 8
        }
        PaddingStrategy::FillContainer => {
            let container = ctx.container_bits.expect("validated");
            checked_gap(container, ctx.preceding_sibling_bits, cn)?
        }
    };

    let bits = clamp(bits, config);
    log::trace!("padding `{}` resolved to {bits} bit(s)", cn.node.id);

    Ok(Some(ResolvedPadding {
        bytes: fill_bytes(config, bits),
        bits,
    }))
}

fn checked_gap(budget: u64, used: u64, cn: &CompiledNode) -> Result<u64> {
    if used > budget {
        return Err(CodecError::out_of_range(
            &cn.path,
            format!("content ({used} bits) already exceeds the {budget}-bit budget"),
        ));
    }
    Ok(budget - used)
}

fn clamp(bits: u64, config: &PaddingConfig) -> u64 {
    let mut bits = bits;
    if let Some(min) = config.min_length {
        bits = bits.max(min * 8);
    }
    if let Some(max) = config.max_length {
        bits = bits.min(max * 8);
    }
    bits
}

fn fill_bytes(config: &PaddingConfig, bits: u64) -> Vec<u8> {
    let nbytes = bits.div_ceil(8) as usize;
    let mut bytes = Vec::with_capacity(nbytes);
    if config.repeat_pattern {
        bytes.extend(config.pattern.iter().cycle().take(nbytes));
    } else {
        bytes.extend(config.pattern.iter().take(nbytes));
        bytes.resize(nbytes, 0);
    }
    bytes
}
