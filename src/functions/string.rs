//! # String Functions
//!
//! Text manipulation builtins: `upper`, `lower`, `concat` (n-ary), and
//! `length` (in bytes, as `Int8`).

use std::sync::Arc;

use crate::block::ColumnWithTypeAndName;
use crate::error::{ExprError, Result};
use crate::types::{Column, ColumnData, DataType, Value};

use super::{
    all_arguments_const, full_argument, FunctionBase, FunctionRegistry, FunctionResolver,
    PreparedFunction,
};

/// Registers the string builtins.
pub fn register(registry: &mut FunctionRegistry) {
    registry.register(Arc::new(StringResolver { kind: Kind::Upper }));
    registry.register(Arc::new(StringResolver { kind: Kind::Lower }));
    registry.register(Arc::new(StringResolver { kind: Kind::Concat }));
    registry.register(Arc::new(StringResolver { kind: Kind::Length }));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Upper,
    Lower,
    Concat,
    Length,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Upper => "upper",
            Kind::Lower => "lower",
            Kind::Concat => "concat",
            Kind::Length => "length",
        }
    }

    fn result_type(self) -> DataType {
        match self {
            Kind::Upper | Kind::Lower | Kind::Concat => DataType::Text,
            Kind::Length => DataType::Int8,
        }
    }
}

#[derive(Debug)]
struct StringResolver {
    kind: Kind,
}

impl FunctionResolver for StringResolver {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn build(&self, args: &[ColumnWithTypeAndName]) -> Result<Arc<dyn FunctionBase>> {
        let arity_ok = match self.kind {
            Kind::Upper | Kind::Lower | Kind::Length => args.len() == 1,
            Kind::Concat => args.len() >= 2,
        };
        if !arity_ok || args.iter().any(|a| a.data_type != DataType::Text) {
            return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                "no overload of {} for argument types ({})",
                self.kind.name(),
                args.iter()
                    .map(|a| a.data_type.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))));
        }
        Ok(Arc::new(StringFunction {
            kind: self.kind,
            argument_types: args.iter().map(|a| a.data_type.clone()).collect(),
            result_type: self.kind.result_type(),
        }))
    }
}

#[derive(Debug)]
struct StringFunction {
    kind: Kind,
    argument_types: Vec<DataType>,
    result_type: DataType,
}

impl FunctionBase for StringFunction {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn argument_types(&self) -> &[DataType] {
        &self.argument_types
    }

    fn result_type(&self) -> &DataType {
        &self.result_type
    }

    fn prepare(&self, _args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction> {
        Arc::new(PreparedString { kind: self.kind })
    }
}

struct PreparedString {
    kind: Kind,
}

fn text_rows(column: &Column) -> Result<Vec<String>> {
    match column.data() {
        ColumnData::Text(rows) => Ok(rows.clone()),
        other => Err(eyre::Report::new(ExprError::TypeMismatch(format!(
            "expected a Text column, got {}",
            other.data_type().name()
        )))),
    }
}

impl PreparedFunction for PreparedString {
    fn execute(
        &self,
        args: &[ColumnWithTypeAndName],
        result_type: &DataType,
        num_rows: usize,
        _dry_run: bool,
    ) -> Result<Column> {
        if all_arguments_const(args) {
            let mut scalars = Vec::with_capacity(args.len());
            for arg in args {
                match arg.column.as_ref().unwrap().value_at(0)? {
                    Value::Text(s) => scalars.push(s),
                    other => {
                        return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                            "{} expects Text arguments, got {:?}",
                            self.kind.name(),
                            other
                        ))))
                    }
                }
            }
            let value = match self.kind {
                Kind::Upper => Value::Text(scalars[0].to_uppercase()),
                Kind::Lower => Value::Text(scalars[0].to_lowercase()),
                Kind::Concat => Value::Text(scalars.concat()),
                Kind::Length => Value::Int8(scalars[0].len() as i64),
            };
            return Column::constant(value, result_type, num_rows);
        }

        let columns = args
            .iter()
            .map(|arg| full_argument(arg).and_then(|c| text_rows(&c)))
            .collect::<Result<Vec<_>>>()?;

        let data = match self.kind {
            Kind::Upper => {
                ColumnData::Text(columns[0].iter().map(|s| s.to_uppercase()).collect())
            }
            Kind::Lower => {
                ColumnData::Text(columns[0].iter().map(|s| s.to_lowercase()).collect())
            }
            Kind::Length => {
                ColumnData::Int8(columns[0].iter().map(|s| s.len() as i64).collect())
            }
            Kind::Concat => {
                let rows = columns[0].len();
                let mut out = Vec::with_capacity(rows);
                for row in 0..rows {
                    let mut piece = String::new();
                    for column in &columns {
                        piece.push_str(&column[row]);
                    }
                    out.push(piece);
                }
                ColumnData::Text(out)
            }
        };
        Ok(Column::full(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(column: Column, name: &str) -> ColumnWithTypeAndName {
        ColumnWithTypeAndName::new(Some(column), DataType::Text, name)
    }

    #[test]
    fn upper_maps_rows() {
        let registry = FunctionRegistry::with_builtins();
        let args = vec![arg(Column::text(vec!["abc", "Def"]), "s")];
        let base = registry.get("upper").unwrap().build(&args).unwrap();
        let out = base
            .prepare(&args)
            .execute(&args, &DataType::Text, 2, false)
            .unwrap();
        assert_eq!(out.value_at(0).unwrap(), Value::Text("ABC".into()));
        assert_eq!(out.value_at(1).unwrap(), Value::Text("DEF".into()));
    }

    #[test]
    fn concat_is_n_ary() {
        let registry = FunctionRegistry::with_builtins();
        let args = vec![
            arg(Column::text(vec!["a", "b"]), "x"),
            arg(Column::text(vec!["1", "2"]), "y"),
            arg(Column::text(vec!["!", "?"]), "z"),
        ];
        let base = registry.get("concat").unwrap().build(&args).unwrap();
        let out = base
            .prepare(&args)
            .execute(&args, &DataType::Text, 2, false)
            .unwrap();
        assert_eq!(out.value_at(0).unwrap(), Value::Text("a1!".into()));
        assert_eq!(out.value_at(1).unwrap(), Value::Text("b2?".into()));
    }

    #[test]
    fn length_returns_int8() {
        let registry = FunctionRegistry::with_builtins();
        let args = vec![arg(Column::text(vec!["abc", ""]), "s")];
        let base = registry.get("length").unwrap().build(&args).unwrap();
        assert_eq!(base.result_type(), &DataType::Int8);
        let out = base
            .prepare(&args)
            .execute(&args, &DataType::Int8, 2, false)
            .unwrap();
        assert_eq!(out.value_at(0).unwrap(), Value::Int8(3));
        assert_eq!(out.value_at(1).unwrap(), Value::Int8(0));
    }

    #[test]
    fn upper_rejects_non_text() {
        let registry = FunctionRegistry::with_builtins();
        let args = vec![ColumnWithTypeAndName::new(
            Some(Column::int4(vec![1])),
            DataType::Int4,
            "n",
        )];
        assert!(registry.get("upper").unwrap().build(&args).is_err());
    }

    #[test]
    fn const_arguments_fold_to_const() {
        let registry = FunctionRegistry::with_builtins();
        let args = vec![arg(
            Column::constant(Value::Text("abc".into()), &DataType::Text, 1).unwrap(),
            "s",
        )];
        let base = registry.get("upper").unwrap().build(&args).unwrap();
        let out = base
            .prepare(&args)
            .execute(&args, &DataType::Text, 1, true)
            .unwrap();
        assert!(out.is_const());
        assert_eq!(out.const_value(), Some(Value::Text("ABC".into())));
    }
}
