//! # Engine Plumbing Functions
//!
//! Builtins the planner itself leans on:
//!
//! - `identity`: passes its argument through unchanged
//! - `ignore`: discards its arguments and returns constant `0`
//! - `toTypeName`: the argument's type name as constant text
//! - `materialize`: forces a full column out of a constant one; explicitly
//!   not foldable, so constants survive to run time
//! - `in` / `globalIn`: membership of the left argument in a materialized
//!   set carried by the right argument

use std::sync::Arc;

use crate::block::ColumnWithTypeAndName;
use crate::error::{ExprError, Result};
use crate::types::{Column, ColumnData, DataType, SetData, Value};

use super::{FunctionBase, FunctionRegistry, FunctionResolver, PreparedFunction};

/// Registers the system builtins.
pub fn register(registry: &mut FunctionRegistry) {
    registry.register(Arc::new(IdentityResolver));
    registry.register(Arc::new(IgnoreResolver));
    registry.register(Arc::new(ToTypeNameResolver));
    registry.register(Arc::new(MaterializeResolver));
    registry.register(Arc::new(InResolver { name: "in" }));
    registry.register(Arc::new(InResolver { name: "globalIn" }));
}

#[derive(Debug)]
struct IdentityResolver;

impl FunctionResolver for IdentityResolver {
    fn name(&self) -> &str {
        "identity"
    }

    fn build(&self, args: &[ColumnWithTypeAndName]) -> Result<Arc<dyn FunctionBase>> {
        if args.len() != 1 {
            return Err(eyre::Report::new(ExprError::TypeMismatch(
                "identity expects exactly one argument".into(),
            )));
        }
        Ok(Arc::new(IdentityFunction {
            argument_types: vec![args[0].data_type.clone()],
            result_type: args[0].data_type.clone(),
        }))
    }
}

#[derive(Debug)]
struct IdentityFunction {
    argument_types: Vec<DataType>,
    result_type: DataType,
}

impl FunctionBase for IdentityFunction {
    fn name(&self) -> &str {
        "identity"
    }

    fn argument_types(&self) -> &[DataType] {
        &self.argument_types
    }

    fn result_type(&self) -> &DataType {
        &self.result_type
    }

    fn prepare(&self, _args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction> {
        Arc::new(PreparedIdentity)
    }
}

struct PreparedIdentity;

impl PreparedFunction for PreparedIdentity {
    fn execute(
        &self,
        args: &[ColumnWithTypeAndName],
        _result_type: &DataType,
        _num_rows: usize,
        _dry_run: bool,
    ) -> Result<Column> {
        args[0]
            .column
            .clone()
            .ok_or_else(|| ExprError::logical("identity argument has no data"))
    }
}

#[derive(Debug)]
struct IgnoreResolver;

impl FunctionResolver for IgnoreResolver {
    fn name(&self) -> &str {
        "ignore"
    }

    fn build(&self, args: &[ColumnWithTypeAndName]) -> Result<Arc<dyn FunctionBase>> {
        Ok(Arc::new(IgnoreFunction {
            argument_types: args.iter().map(|a| a.data_type.clone()).collect(),
            result_type: DataType::Int8,
        }))
    }
}

#[derive(Debug)]
struct IgnoreFunction {
    argument_types: Vec<DataType>,
    result_type: DataType,
}

impl FunctionBase for IgnoreFunction {
    fn name(&self) -> &str {
        "ignore"
    }

    fn argument_types(&self) -> &[DataType] {
        &self.argument_types
    }

    fn result_type(&self) -> &DataType {
        &self.result_type
    }

    fn result_if_always_returns_constant_and_has_arguments(
        &self,
        args: &[ColumnWithTypeAndName],
    ) -> Option<Column> {
        if args.is_empty() {
            return None;
        }
        Column::constant(Value::Int8(0), &DataType::Int8, 1).ok()
    }

    fn prepare(&self, _args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction> {
        Arc::new(PreparedIgnore)
    }
}

struct PreparedIgnore;

impl PreparedFunction for PreparedIgnore {
    fn execute(
        &self,
        _args: &[ColumnWithTypeAndName],
        result_type: &DataType,
        num_rows: usize,
        _dry_run: bool,
    ) -> Result<Column> {
        Column::constant(Value::Int8(0), result_type, num_rows)
    }
}

#[derive(Debug)]
struct ToTypeNameResolver;

impl FunctionResolver for ToTypeNameResolver {
    fn name(&self) -> &str {
        "toTypeName"
    }

    fn build(&self, args: &[ColumnWithTypeAndName]) -> Result<Arc<dyn FunctionBase>> {
        if args.len() != 1 {
            return Err(eyre::Report::new(ExprError::TypeMismatch(
                "toTypeName expects exactly one argument".into(),
            )));
        }
        Ok(Arc::new(ToTypeNameFunction {
            argument_types: vec![args[0].data_type.clone()],
            result_type: DataType::Text,
        }))
    }
}

#[derive(Debug)]
struct ToTypeNameFunction {
    argument_types: Vec<DataType>,
    result_type: DataType,
}

impl ToTypeNameFunction {
    fn type_name(&self) -> String {
        self.argument_types[0].name()
    }
}

impl FunctionBase for ToTypeNameFunction {
    fn name(&self) -> &str {
        "toTypeName"
    }

    fn argument_types(&self) -> &[DataType] {
        &self.argument_types
    }

    fn result_type(&self) -> &DataType {
        &self.result_type
    }

    fn result_if_always_returns_constant_and_has_arguments(
        &self,
        args: &[ColumnWithTypeAndName],
    ) -> Option<Column> {
        if args.is_empty() {
            return None;
        }
        Column::constant(Value::Text(self.type_name()), &DataType::Text, 1).ok()
    }

    fn prepare(&self, _args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction> {
        Arc::new(PreparedToTypeName {
            type_name: self.type_name(),
        })
    }
}

struct PreparedToTypeName {
    type_name: String,
}

impl PreparedFunction for PreparedToTypeName {
    fn execute(
        &self,
        _args: &[ColumnWithTypeAndName],
        result_type: &DataType,
        num_rows: usize,
        _dry_run: bool,
    ) -> Result<Column> {
        Column::constant(Value::Text(self.type_name.clone()), result_type, num_rows)
    }
}

#[derive(Debug)]
struct MaterializeResolver;

impl FunctionResolver for MaterializeResolver {
    fn name(&self) -> &str {
        "materialize"
    }

    fn build(&self, args: &[ColumnWithTypeAndName]) -> Result<Arc<dyn FunctionBase>> {
        if args.len() != 1 {
            return Err(eyre::Report::new(ExprError::TypeMismatch(
                "materialize expects exactly one argument".into(),
            )));
        }
        Ok(Arc::new(MaterializeFunction {
            argument_types: vec![args[0].data_type.clone()],
            result_type: args[0].data_type.clone(),
        }))
    }
}

#[derive(Debug)]
struct MaterializeFunction {
    argument_types: Vec<DataType>,
    result_type: DataType,
}

impl FunctionBase for MaterializeFunction {
    fn name(&self) -> &str {
        "materialize"
    }

    fn argument_types(&self) -> &[DataType] {
        &self.argument_types
    }

    fn result_type(&self) -> &DataType {
        &self.result_type
    }

    fn is_suitable_for_constant_folding(&self) -> bool {
        false
    }

    fn prepare(&self, _args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction> {
        Arc::new(PreparedMaterialize)
    }
}

struct PreparedMaterialize;

impl PreparedFunction for PreparedMaterialize {
    fn execute(
        &self,
        args: &[ColumnWithTypeAndName],
        _result_type: &DataType,
        _num_rows: usize,
        _dry_run: bool,
    ) -> Result<Column> {
        let column = args[0]
            .column
            .as_ref()
            .ok_or_else(|| ExprError::logical("materialize argument has no data"))?;
        column.convert_to_full_column_if_const()
    }
}

#[derive(Debug)]
struct InResolver {
    name: &'static str,
}

impl FunctionResolver for InResolver {
    fn name(&self) -> &str {
        self.name
    }

    fn build(&self, args: &[ColumnWithTypeAndName]) -> Result<Arc<dyn FunctionBase>> {
        if args.len() != 2 {
            return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                "{} expects exactly two arguments",
                self.name
            ))));
        }
        let set = args[1]
            .column
            .as_ref()
            .and_then(Column::as_set)
            .cloned()
            .ok_or_else(|| {
                eyre::Report::new(ExprError::TypeMismatch(format!(
                    "second argument of {} must carry a materialized set, got {}",
                    self.name,
                    args[1].data_type.name()
                )))
            })?;
        Ok(Arc::new(InFunction {
            name: self.name,
            argument_types: args.iter().map(|a| a.data_type.clone()).collect(),
            result_type: DataType::Bool,
            set,
        }))
    }
}

#[derive(Debug)]
struct InFunction {
    name: &'static str,
    argument_types: Vec<DataType>,
    result_type: DataType,
    set: Arc<SetData>,
}

impl FunctionBase for InFunction {
    fn name(&self) -> &str {
        self.name
    }

    fn argument_types(&self) -> &[DataType] {
        &self.argument_types
    }

    fn result_type(&self) -> &DataType {
        &self.result_type
    }

    /// Folding through a set that has not been filled yet would bake in a
    /// wrong answer.
    fn is_suitable_for_constant_folding(&self) -> bool {
        self.set.is_created()
    }

    fn prepare(&self, _args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction> {
        Arc::new(PreparedIn {
            set: self.set.clone(),
        })
    }
}

struct PreparedIn {
    set: Arc<SetData>,
}

impl PreparedFunction for PreparedIn {
    fn execute(
        &self,
        args: &[ColumnWithTypeAndName],
        result_type: &DataType,
        num_rows: usize,
        _dry_run: bool,
    ) -> Result<Column> {
        if !self.set.is_created() {
            return Err(ExprError::logical("the set for IN has not been created"));
        }
        let left = args[0]
            .column
            .as_ref()
            .ok_or_else(|| ExprError::logical("IN left argument has no data"))?;

        if left.is_const() {
            let hit = self.set.contains(&left.value_at(0)?);
            return Column::constant(Value::Bool(hit), result_type, num_rows);
        }

        let mut out = Vec::with_capacity(left.len());
        for row in 0..left.len() {
            out.push(self.set.contains(&left.value_at(row)?));
        }
        Ok(Column::full(ColumnData::Bool(out)))
    }
}
