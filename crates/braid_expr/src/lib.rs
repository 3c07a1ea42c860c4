//! A small, pure expression language.
//!
//! The codec uses expressions for computed fields, checksum spans,
//! conditional enables and dynamic padding lengths. The language is
//! deliberately tiny: arithmetic, comparison, boolean and string operators
//! over [`Value`], node references (`#id`, `#proto:id`), and calls into a
//! pluggable [`FunctionRegistry`]. Evaluation is deterministic and free of
//! side effects; everything an expression can observe comes in through the
//! [`EvalHost`] it is evaluated against.

pub mod ast;
pub mod eval;
pub mod parser;
pub mod registry;
pub mod token;
pub mod value;

pub use ast::{BinOp, Expr, ExprRefs, NodeRef, UnOp};
pub use eval::{EvalHost, EvalLimits, Evaluator, MapHost};
pub use registry::{FunctionDef, FunctionRegistry};
pub use value::Value;

use thiserror::Error;

/// Everything that can go wrong while lexing, parsing or evaluating an
/// expression. Hosts surface some of these (unaligned spans, missing nodes)
/// through their own error types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("unknown node `{0}`")]
    MissingNode(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("function `{name}` expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("evaluation step budget exceeded")]
    StepLimit,
    #[error("span {start}..{end} is not byte aligned")]
    UnalignedSpan { start: String, end: String },
    #[error("{0}")]
    Message(String),
}

impl EvalError {
    pub fn type_err(msg: impl Into<String>) -> Self {
        EvalError::Type(msg.into())
    }
}
