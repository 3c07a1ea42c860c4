//! Declarative bit-level protocol codec.
//!
//! A protocol is a tree of nodes with bit-precise lengths, numeric kinds,
//! endianness, enumerants, computed fields and structural containers.
//! Encoding walks the tree in dependency order (computed fields may
//! reference other fields, checksums may cover spans of the output) and
//! packs every field into a bit-granular buffer; decoding reverses the
//! trip, re-evaluating verifications along the way.
//!
//! Trees come from three equivalent sources: the [`Protocol`] builder API,
//! a TOML [`schema`] document, or the [`ProtocolDef`] derive macro over an
//! annotated struct.

pub mod bits;
pub mod error;
pub mod funcs;
pub mod node;
pub mod range_spec;
pub mod registry;
pub mod schedule;
pub mod schema;
pub mod tree;
pub mod value_fmt;

mod codec;
mod cond;
mod graph;
mod padding;
mod validate;


pub use bits::BitBuffer;
pub use error::{CodecError, Result};
pub use node::{
    Charset, CondAction, CondDep, Endian, EnumSpec, Node, NodeBody, PaddingConfig,
    PaddingStrategy, TimeUnit, ValueKind,
};
pub use registry::{default_registry, lookup_protocol, register_protocol};
pub use schedule::{Decoded, Decoder, Encoded, Encoder, FieldReport};
pub use tree::{CompiledNode, CompiledProtocol, Protocol};

// The expression surface callers interact with.
pub use braid_expr::{EvalError, EvalHost, EvalLimits, Evaluator, FunctionRegistry, Value};

/// Annotation-driven protocol definition. Can be derived.
///
/// The derive macro reads `#[protocol(...)]` and `#[field(...)]`
/// attributes off a plain struct and assembles the same tree a schema
/// document would; `apply_values` publishes the instance's field values
/// into an encoder by node id.
pub trait ProtocolDef {
    fn protocol() -> Protocol;
    fn apply_values(&self, encoder: &mut Encoder<'_>);
}

pub use braid_wire_proc::ProtocolDef;
