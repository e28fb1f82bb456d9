//! # Arithmetic Functions
//!
//! Binary arithmetic (`plus`, `minus`, `multiply`) over same-typed numeric
//! columns and unary `negate`/`abs`. Integer arithmetic wraps on overflow.
//!
//! Overload resolution is strict: both arguments must have the same numeric
//! type; the result keeps that type.

use std::sync::Arc;

use eyre::ensure;

use crate::block::ColumnWithTypeAndName;
use crate::error::{ExprError, Result};
use crate::types::{Column, ColumnData, DataType, Value};

use super::{
    all_arguments_const, full_argument, FunctionBase, FunctionRegistry, FunctionResolver,
    PreparedFunction,
};

/// Registers the arithmetic builtins.
pub fn register(registry: &mut FunctionRegistry) {
    registry.register(Arc::new(BinaryArithmeticResolver { op: BinaryOp::Plus }));
    registry.register(Arc::new(BinaryArithmeticResolver { op: BinaryOp::Minus }));
    registry.register(Arc::new(BinaryArithmeticResolver {
        op: BinaryOp::Multiply,
    }));
    registry.register(Arc::new(UnaryArithmeticResolver { op: UnaryOp::Negate }));
    registry.register(Arc::new(UnaryArithmeticResolver { op: UnaryOp::Abs }));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Plus,
    Minus,
    Multiply,
}

impl BinaryOp {
    fn name(self) -> &'static str {
        match self {
            BinaryOp::Plus => "plus",
            BinaryOp::Minus => "minus",
            BinaryOp::Multiply => "multiply",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Negate,
    Abs,
}

impl UnaryOp {
    fn name(self) -> &'static str {
        match self {
            UnaryOp::Negate => "negate",
            UnaryOp::Abs => "abs",
        }
    }
}

macro_rules! binary_int_vec {
    ($x:expr, $y:expr, $op:expr) => {
        $x.iter()
            .zip($y.iter())
            .map(|(a, b)| match $op {
                BinaryOp::Plus => a.wrapping_add(*b),
                BinaryOp::Minus => a.wrapping_sub(*b),
                BinaryOp::Multiply => a.wrapping_mul(*b),
            })
            .collect()
    };
}

macro_rules! binary_float_vec {
    ($x:expr, $y:expr, $op:expr) => {
        $x.iter()
            .zip($y.iter())
            .map(|(a, b)| match $op {
                BinaryOp::Plus => a + b,
                BinaryOp::Minus => a - b,
                BinaryOp::Multiply => a * b,
            })
            .collect()
    };
}

macro_rules! binary_int_scalar {
    ($x:expr, $y:expr, $op:expr) => {
        match $op {
            BinaryOp::Plus => $x.wrapping_add($y),
            BinaryOp::Minus => $x.wrapping_sub($y),
            BinaryOp::Multiply => $x.wrapping_mul($y),
        }
    };
}

fn binary_scalar(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    Ok(match (a, b) {
        (Value::Int2(x), Value::Int2(y)) => Value::Int2(binary_int_scalar!(x, *y, op)),
        (Value::Int4(x), Value::Int4(y)) => Value::Int4(binary_int_scalar!(x, *y, op)),
        (Value::Int8(x), Value::Int8(y)) => Value::Int8(binary_int_scalar!(x, *y, op)),
        (Value::Float4(x), Value::Float4(y)) => Value::Float4(match op {
            BinaryOp::Plus => x + y,
            BinaryOp::Minus => x - y,
            BinaryOp::Multiply => x * y,
        }),
        (Value::Float8(x), Value::Float8(y)) => Value::Float8(match op {
            BinaryOp::Plus => x + y,
            BinaryOp::Minus => x - y,
            BinaryOp::Multiply => x * y,
        }),
        _ => {
            return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                "{} is not defined for {:?} and {:?}",
                op.name(),
                a,
                b
            ))))
        }
    })
}

#[derive(Debug)]
struct BinaryArithmeticResolver {
    op: BinaryOp,
}

impl FunctionResolver for BinaryArithmeticResolver {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn build(&self, args: &[ColumnWithTypeAndName]) -> Result<Arc<dyn FunctionBase>> {
        if args.len() != 2 {
            return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                "function {} expects 2 arguments, got {}",
                self.op.name(),
                args.len()
            ))));
        }
        let left = &args[0].data_type;
        let right = &args[1].data_type;
        if !left.is_numeric() || left != right {
            return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                "no overload of {} for argument types ({}, {})",
                self.op.name(),
                left.name(),
                right.name()
            ))));
        }
        Ok(Arc::new(BinaryArithmeticFunction {
            op: self.op,
            argument_types: vec![left.clone(), right.clone()],
            result_type: left.clone(),
        }))
    }
}

#[derive(Debug)]
struct BinaryArithmeticFunction {
    op: BinaryOp,
    argument_types: Vec<DataType>,
    result_type: DataType,
}

impl FunctionBase for BinaryArithmeticFunction {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn argument_types(&self) -> &[DataType] {
        &self.argument_types
    }

    fn result_type(&self) -> &DataType {
        &self.result_type
    }

    fn prepare(&self, _args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction> {
        Arc::new(PreparedBinaryArithmetic { op: self.op })
    }
}

struct PreparedBinaryArithmetic {
    op: BinaryOp,
}

impl PreparedFunction for PreparedBinaryArithmetic {
    fn execute(
        &self,
        args: &[ColumnWithTypeAndName],
        result_type: &DataType,
        num_rows: usize,
        _dry_run: bool,
    ) -> Result<Column> {
        if all_arguments_const(args) {
            let a = args[0].column.as_ref().unwrap().value_at(0)?;
            let b = args[1].column.as_ref().unwrap().value_at(0)?;
            return Column::constant(binary_scalar(self.op, &a, &b)?, result_type, num_rows);
        }

        let left = full_argument(&args[0])?;
        let right = full_argument(&args[1])?;
        ensure!(
            left.len() == right.len(),
            ExprError::LogicalError(format!(
                "argument length mismatch in {}: {} vs {}",
                self.op.name(),
                left.len(),
                right.len()
            ))
        );

        let data = match (left.data(), right.data()) {
            (ColumnData::Int2(x), ColumnData::Int2(y)) => {
                ColumnData::Int2(binary_int_vec!(x, y, self.op))
            }
            (ColumnData::Int4(x), ColumnData::Int4(y)) => {
                ColumnData::Int4(binary_int_vec!(x, y, self.op))
            }
            (ColumnData::Int8(x), ColumnData::Int8(y)) => {
                ColumnData::Int8(binary_int_vec!(x, y, self.op))
            }
            (ColumnData::Float4(x), ColumnData::Float4(y)) => {
                ColumnData::Float4(binary_float_vec!(x, y, self.op))
            }
            (ColumnData::Float8(x), ColumnData::Float8(y)) => {
                ColumnData::Float8(binary_float_vec!(x, y, self.op))
            }
            (x, y) => {
                return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                    "no overload of {} for argument types ({}, {})",
                    self.op.name(),
                    x.data_type().name(),
                    y.data_type().name()
                ))))
            }
        };
        Ok(Column::full(data))
    }
}

#[derive(Debug)]
struct UnaryArithmeticResolver {
    op: UnaryOp,
}

impl FunctionResolver for UnaryArithmeticResolver {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn build(&self, args: &[ColumnWithTypeAndName]) -> Result<Arc<dyn FunctionBase>> {
        if args.len() != 1 || !args[0].data_type.is_numeric() {
            return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                "function {} expects one numeric argument",
                self.op.name()
            ))));
        }
        Ok(Arc::new(UnaryArithmeticFunction {
            op: self.op,
            argument_types: vec![args[0].data_type.clone()],
            result_type: args[0].data_type.clone(),
        }))
    }
}

#[derive(Debug)]
struct UnaryArithmeticFunction {
    op: UnaryOp,
    argument_types: Vec<DataType>,
    result_type: DataType,
}

impl FunctionBase for UnaryArithmeticFunction {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn argument_types(&self) -> &[DataType] {
        &self.argument_types
    }

    fn result_type(&self) -> &DataType {
        &self.result_type
    }

    fn prepare(&self, _args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction> {
        Arc::new(PreparedUnaryArithmetic { op: self.op })
    }
}

struct PreparedUnaryArithmetic {
    op: UnaryOp,
}

macro_rules! unary_int_vec {
    ($x:expr, $op:expr) => {
        $x.iter()
            .map(|a| match $op {
                UnaryOp::Negate => a.wrapping_neg(),
                UnaryOp::Abs => a.wrapping_abs(),
            })
            .collect()
    };
}

fn unary_scalar(op: UnaryOp, a: &Value) -> Result<Value> {
    Ok(match a {
        Value::Int2(x) => Value::Int2(match op {
            UnaryOp::Negate => x.wrapping_neg(),
            UnaryOp::Abs => x.wrapping_abs(),
        }),
        Value::Int4(x) => Value::Int4(match op {
            UnaryOp::Negate => x.wrapping_neg(),
            UnaryOp::Abs => x.wrapping_abs(),
        }),
        Value::Int8(x) => Value::Int8(match op {
            UnaryOp::Negate => x.wrapping_neg(),
            UnaryOp::Abs => x.wrapping_abs(),
        }),
        Value::Float4(x) => Value::Float4(match op {
            UnaryOp::Negate => -x,
            UnaryOp::Abs => x.abs(),
        }),
        Value::Float8(x) => Value::Float8(match op {
            UnaryOp::Negate => -x,
            UnaryOp::Abs => x.abs(),
        }),
        _ => {
            return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                "{} is not defined for {:?}",
                op.name(),
                a
            ))))
        }
    })
}

impl PreparedFunction for PreparedUnaryArithmetic {
    fn execute(
        &self,
        args: &[ColumnWithTypeAndName],
        result_type: &DataType,
        num_rows: usize,
        _dry_run: bool,
    ) -> Result<Column> {
        if all_arguments_const(args) {
            let a = args[0].column.as_ref().unwrap().value_at(0)?;
            return Column::constant(unary_scalar(self.op, &a)?, result_type, num_rows);
        }

        let arg = full_argument(&args[0])?;
        let data = match arg.data() {
            ColumnData::Int2(x) => ColumnData::Int2(unary_int_vec!(x, self.op)),
            ColumnData::Int4(x) => ColumnData::Int4(unary_int_vec!(x, self.op)),
            ColumnData::Int8(x) => ColumnData::Int8(unary_int_vec!(x, self.op)),
            ColumnData::Float4(x) => ColumnData::Float4(
                x.iter()
                    .map(|a| match self.op {
                        UnaryOp::Negate => -a,
                        UnaryOp::Abs => a.abs(),
                    })
                    .collect(),
            ),
            ColumnData::Float8(x) => ColumnData::Float8(
                x.iter()
                    .map(|a| match self.op {
                        UnaryOp::Negate => -a,
                        UnaryOp::Abs => a.abs(),
                    })
                    .collect(),
            ),
            other => {
                return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                    "no overload of {} for argument type {}",
                    self.op.name(),
                    other.data_type().name()
                ))))
            }
        };
        Ok(Column::full(data))
    }
}
