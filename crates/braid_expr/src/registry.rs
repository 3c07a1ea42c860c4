//! The pluggable function registry.
//!
//! The evaluator has no hard-coded function list; everything callable is
//! registered here by name. Range functions (operating on the bytes between
//! two nodes) and ref-arg functions (wanting node *ids*, not values) are
//! flagged so that both the evaluator and the dependency builder treat their
//! arguments correctly.

use crate::eval::EvalHost;
use crate::{EvalError, Value};
use ahash::AHashMap;

pub type Callable = Box<dyn Fn(&dyn EvalHost, &[Value]) -> Result<Value, EvalError> + Send + Sync>;

pub struct FunctionDef {
    /// Exact argument count, or `None` for variadic.
    pub arity: Option<usize>,
    /// Node-reference arguments are passed as id strings, unresolved.
    pub ref_args: bool,
    /// The two node-id arguments name a span of already-encoded output.
    pub range: bool,
    pub callable: Callable,
}

#[derive(Default)]
pub struct FunctionRegistry {
    funcs: AHashMap<String, FunctionDef>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an ordinary function with a fixed arity.
    pub fn register<F>(&mut self, name: &str, arity: usize, f: F)
    where
        F: Fn(&dyn EvalHost, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.insert(
            name,
            FunctionDef {
                arity: Some(arity),
                ref_args: false,
                range: false,
                callable: Box::new(f),
            },
        );
    }

    /// Registers a function that receives node-reference arguments as id
    /// strings instead of resolved values.
    pub fn register_ref<F>(&mut self, name: &str, arity: usize, f: F)
    where
        F: Fn(&dyn EvalHost, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.insert(
            name,
            FunctionDef {
                arity: Some(arity),
                ref_args: true,
                range: false,
                callable: Box::new(f),
            },
        );
    }

    /// Registers a range function: two node-id arguments naming the start
    /// and end of a contiguous span of the encoded output.
    pub fn register_range<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&dyn EvalHost, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.insert(
            name,
            FunctionDef {
                arity: Some(2),
                ref_args: true,
                range: true,
                callable: Box::new(f),
            },
        );
    }

    fn insert(&mut self, name: &str, def: FunctionDef) {
        self.funcs.insert(name.to_owned(), def);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.funcs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn is_range(&self, name: &str) -> bool {
        self.funcs.get(name).is_some_and(|d| d.range)
    }
}
