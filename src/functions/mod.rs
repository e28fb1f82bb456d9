//! # Function Registry and Capability Traits
//!
//! Functions plug into the expression engine through three traits:
//!
//! - [`FunctionResolver`]: overload resolution — given concrete argument
//!   columns/types, produce a [`FunctionBase`] or reject the call
//! - [`FunctionBase`]: a resolved overload — knows its argument and result
//!   types and its folding/determinism properties
//! - [`PreparedFunction`]: the executable form — evaluates argument columns
//!   into a result column
//!
//! ## Module Structure
//!
//! - `numeric`: arithmetic (`plus`, `minus`, `multiply`, `negate`, `abs`)
//! - `string`: text manipulation (`upper`, `lower`, `concat`, `length`)
//! - `system`: engine plumbing (`identity`, `ignore`, `toTypeName`,
//!   `materialize`, `in`, `globalIn`)
//!
//! ## Adding New Functions
//!
//! 1. Implement the three traits (or reuse the generic wrappers in the
//!    category modules)
//! 2. Register the resolver in `FunctionRegistry::with_builtins` or on a
//!    custom registry instance

pub mod numeric;
pub mod string;
pub mod system;

use std::sync::Arc;

use hashbrown::HashMap;

use crate::block::ColumnWithTypeAndName;
use crate::error::{ExprError, Result};
use crate::types::{Column, DataType};

/// The executable form of a resolved function.
pub trait PreparedFunction: Send + Sync {
    /// Evaluates the function over argument columns. `num_rows` is the
    /// current block height; `dry_run` asks for a plausibly-typed result
    /// without observable side effects (builtins here are pure, so they
    /// execute normally).
    fn execute(
        &self,
        args: &[ColumnWithTypeAndName],
        result_type: &DataType,
        num_rows: usize,
        dry_run: bool,
    ) -> Result<Column>;
}

/// A resolved function overload with its metadata.
pub trait FunctionBase: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn argument_types(&self) -> &[DataType];

    fn result_type(&self) -> &DataType;

    /// Non-deterministic functions are excluded from folding when compiled
    /// expressions may be cached.
    fn is_deterministic(&self) -> bool {
        true
    }

    /// Whether a call with all-constant arguments may be evaluated at
    /// planning time.
    fn is_suitable_for_constant_folding(&self) -> bool {
        true
    }

    /// For functions whose result is a constant no matter the argument
    /// values (e.g. `ignore`, `toTypeName`): the constant, when arguments
    /// are present.
    fn result_if_always_returns_constant_and_has_arguments(
        &self,
        _args: &[ColumnWithTypeAndName],
    ) -> Option<Column> {
        None
    }

    /// Produces the executable form for the given argument sample.
    fn prepare(&self, args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction>;
}

/// Overload resolution: validates argument types and produces a base.
pub trait FunctionResolver: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, args: &[ColumnWithTypeAndName]) -> Result<Arc<dyn FunctionBase>>;
}

/// Name-indexed collection of function resolvers.
pub struct FunctionRegistry {
    resolvers: HashMap<String, Arc<dyn FunctionResolver>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    /// A registry with the builtin function set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        numeric::register(&mut registry);
        string::register(&mut registry);
        system::register(&mut registry);
        registry
    }

    pub fn register(&mut self, resolver: Arc<dyn FunctionResolver>) {
        self.resolvers.insert(resolver.name().to_string(), resolver);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FunctionResolver>> {
        self.resolvers
            .get(name)
            .cloned()
            .ok_or_else(|| eyre::Report::new(ExprError::UnknownIdentifier(name.to_string())))
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// True when every argument carries a constant column.
pub(crate) fn all_arguments_const(args: &[ColumnWithTypeAndName]) -> bool {
    !args.is_empty()
        && args
            .iter()
            .all(|arg| arg.column.as_ref().is_some_and(Column::is_const))
}

/// Materializes an argument column, failing if the payload is absent.
pub(crate) fn full_argument(arg: &ColumnWithTypeAndName) -> Result<Column> {
    let column = arg.column.as_ref().ok_or_else(|| {
        ExprError::logical(format!("argument column '{}' has no data", arg.name))
    })?;
    column.convert_to_full_column_if_const()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn registry_lookup() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.get("plus").is_ok());
        assert!(registry.get("upper").is_ok());
        let err = registry.get("no_such_fn").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExprError>(),
            Some(ExprError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn const_detection() {
        let const_arg = ColumnWithTypeAndName::new(
            Some(Column::constant(Value::Int4(1), &DataType::Int4, 1).unwrap()),
            DataType::Int4,
            "c",
        );
        let full_arg = ColumnWithTypeAndName::new(
            Some(Column::int4(vec![1, 2])),
            DataType::Int4,
            "f",
        );
        assert!(all_arguments_const(std::slice::from_ref(&const_arg)));
        assert!(!all_arguments_const(&[const_arg, full_arg]));
        assert!(!all_arguments_const(&[]));
    }
}
