//! The union error type of the codec.
//!
//! Errors are never recovered locally; the scheduler stops on the first one
//! and surfaces it with the offending node's path.

use braid_expr::EvalError;
use thiserror::Error;

pub type Result<T, E = CodecError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// Pre-flight tree validation failure: duplicate ids, illegal lengths,
    /// malformed range specs, unparseable expressions.
    #[error("format error at `{path}`: {message}")]
    Format { path: String, message: String },

    /// A numeric value outside its declared width or range spec.
    #[error("value out of range at `{path}`: {message}")]
    ValueOutOfRange { path: String, message: String },

    /// A value absent from the node's declared enumerants.
    #[error("enum mismatch at `{path}`: {message}")]
    EnumMismatch { path: String, message: String },

    /// Expression evaluation failure.
    #[error("expression error at `{path}`: {source}")]
    Expression { path: String, source: EvalError },

    /// Forward expressions or conditionals form a cycle.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// An expression or rule references an unknown node id.
    #[error("missing node `{id}` referenced from `{path}`")]
    MissingNode { path: String, id: String },

    /// A range function's span does not cover a whole number of bytes.
    #[error("unaligned span {start}..{end} referenced from `{path}`")]
    UnalignedSpan {
        path: String,
        start: String,
        end: String,
    },

    /// The input byte stream ran out before every node was decoded.
    #[error("decode underrun at `{path}`: needed {needed} bits, {available} available")]
    DecodeUnderrun {
        path: String,
        needed: u64,
        available: u64,
    },

    /// Bit buffer misuse; unreachable when lengths are right.
    #[error("bit buffer error at `{path}`: {message}")]
    Io { path: String, message: String },
}

impl CodecError {
    pub fn format(path: impl Into<String>, message: impl Into<String>) -> Self {
        CodecError::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn out_of_range(path: impl Into<String>, message: impl Into<String>) -> Self {
        CodecError::ValueOutOfRange {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn enum_mismatch(path: impl Into<String>, message: impl Into<String>) -> Self {
        CodecError::EnumMismatch {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<String>, message: impl Into<String>) -> Self {
        CodecError::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Lifts an evaluator error, preserving the kinds that have their own
    /// place in the taxonomy.
    pub fn from_eval(path: &str, err: EvalError) -> Self {
        match err {
            EvalError::MissingNode(id) => CodecError::MissingNode {
                path: path.to_owned(),
                id,
            },
            EvalError::UnalignedSpan { start, end } => CodecError::UnalignedSpan {
                path: path.to_owned(),
                start,
                end,
            },
            other => CodecError::Expression {
                path: path.to_owned(),
                source: other,
            },
        }
    }
}
