//! # Scalar Values
//!
//! `Value` is the single-row representation used for constants, constant
//! folding results, and row extraction out of columns. Columns store typed
//! vectors; `Value` only appears at the boundaries (building constant
//! columns, set membership checks, padding).

use super::DataType;

/// A single scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Array(Vec<Value>),
}

impl Value {
    /// Returns the type of this value, when it can be determined.
    /// Empty arrays carry no element type and return `None`.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int2(_) => Some(DataType::Int2),
            Value::Int4(_) => Some(DataType::Int4),
            Value::Int8(_) => Some(DataType::Int8),
            Value::Float4(_) => Some(DataType::Float4),
            Value::Float8(_) => Some(DataType::Float8),
            Value::Text(_) => Some(DataType::Text),
            Value::Array(items) => items
                .first()
                .and_then(Value::data_type)
                .map(DataType::array),
        }
    }

    /// Returns the zero/empty value for a data type, used when a column is
    /// grown past its current length.
    pub fn default_for(data_type: &DataType) -> Option<Value> {
        match data_type {
            DataType::Bool => Some(Value::Bool(false)),
            DataType::Int2 => Some(Value::Int2(0)),
            DataType::Int4 => Some(Value::Int4(0)),
            DataType::Int8 => Some(Value::Int8(0)),
            DataType::Float4 => Some(Value::Float4(0.0)),
            DataType::Float8 => Some(Value::Float8(0.0)),
            DataType::Text => Some(Value::Text(String::new())),
            DataType::Array(_) => Some(Value::Array(Vec::new())),
            DataType::Set => None,
        }
    }
}
