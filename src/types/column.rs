//! # Immutable Columnar Arrays
//!
//! A [`Column`] is a reference-counted, immutable batch of values. It comes
//! in two shapes:
//!
//! - `Full`: a typed vector with one entry per row
//! - `Const`: a single value repeated logically across `len` rows
//!
//! Arrays are stored flattened: a cumulative offsets vector (one entry per
//! row) plus a nested values column. `offsets[i]` is the end of row `i` in
//! the flat values, so row `i` spans `offsets[i-1]..offsets[i]`. This is the
//! layout array join consumes: the flat values column becomes the unnested
//! output and the offsets drive replication of sibling columns.
//!
//! All mutating operations return new columns; shared buffers are never
//! written through.

use std::sync::Arc;

use crate::error::{ExprError, Result};

use super::{DataType, Value};

/// Cumulative row offsets for array columns and for `replicate`.
pub type Offsets = Vec<u64>;

/// Materialized set used as the right-hand side of `in`. The set may exist
/// before its contents are filled in (e.g. a subquery that has not run yet);
/// `created` distinguishes the two states.
#[derive(Debug, Clone, PartialEq)]
pub struct SetData {
    created: bool,
    elements: Vec<Value>,
}

impl SetData {
    /// Creates a filled set.
    pub fn created(elements: Vec<Value>) -> Self {
        Self {
            created: true,
            elements,
        }
    }

    /// Creates a declared-but-unfilled set.
    pub fn uncreated() -> Self {
        Self {
            created: false,
            elements: Vec::new(),
        }
    }

    /// Returns true once the set contents are available.
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Number of rows in the set.
    pub fn total_row_count(&self) -> usize {
        self.elements.len()
    }

    /// Membership test.
    pub fn contains(&self, value: &Value) -> bool {
        self.elements.contains(value)
    }
}

/// Typed backing storage for a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int2(Vec<i16>),
    Int4(Vec<i32>),
    Int8(Vec<i64>),
    Float4(Vec<f32>),
    Float8(Vec<f64>),
    Text(Vec<String>),
    Array {
        element: DataType,
        offsets: Offsets,
        values: Arc<ColumnData>,
    },
    Set(Arc<SetData>),
}

impl ColumnData {
    /// Creates empty storage for the given type.
    pub fn new_empty(data_type: &DataType) -> Self {
        match data_type {
            DataType::Bool => ColumnData::Bool(Vec::new()),
            DataType::Int2 => ColumnData::Int2(Vec::new()),
            DataType::Int4 => ColumnData::Int4(Vec::new()),
            DataType::Int8 => ColumnData::Int8(Vec::new()),
            DataType::Float4 => ColumnData::Float4(Vec::new()),
            DataType::Float8 => ColumnData::Float8(Vec::new()),
            DataType::Text => ColumnData::Text(Vec::new()),
            DataType::Array(elem) => ColumnData::Array {
                element: (**elem).clone(),
                offsets: Vec::new(),
                values: Arc::new(ColumnData::new_empty(elem)),
            },
            DataType::Set => ColumnData::Set(Arc::new(SetData::uncreated())),
        }
    }

    /// Builds single-row storage holding `value`.
    pub fn from_value(value: &Value, data_type: &DataType) -> Result<Self> {
        let mut data = ColumnData::new_empty(data_type);
        data.push_value(value)?;
        Ok(data)
    }

    /// Number of rows. Set storage always reports one row.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int2(v) => v.len(),
            ColumnData::Int4(v) => v.len(),
            ColumnData::Int8(v) => v.len(),
            ColumnData::Float4(v) => v.len(),
            ColumnData::Float8(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Array { offsets, .. } => offsets.len(),
            ColumnData::Set(_) => 1,
        }
    }

    /// Returns true when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The type this storage holds.
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::Int2(_) => DataType::Int2,
            ColumnData::Int4(_) => DataType::Int4,
            ColumnData::Int8(_) => DataType::Int8,
            ColumnData::Float4(_) => DataType::Float4,
            ColumnData::Float8(_) => DataType::Float8,
            ColumnData::Text(_) => DataType::Text,
            ColumnData::Array { element, .. } => DataType::array(element.clone()),
            ColumnData::Set(_) => DataType::Set,
        }
    }

    /// Extracts the value at `row`.
    pub fn value_at(&self, row: usize) -> Result<Value> {
        if row >= self.len() {
            return Err(ExprError::logical(format!(
                "row {} out of bounds for column of {} rows",
                row,
                self.len()
            )));
        }
        match self {
            ColumnData::Bool(v) => Ok(Value::Bool(v[row])),
            ColumnData::Int2(v) => Ok(Value::Int2(v[row])),
            ColumnData::Int4(v) => Ok(Value::Int4(v[row])),
            ColumnData::Int8(v) => Ok(Value::Int8(v[row])),
            ColumnData::Float4(v) => Ok(Value::Float4(v[row])),
            ColumnData::Float8(v) => Ok(Value::Float8(v[row])),
            ColumnData::Text(v) => Ok(Value::Text(v[row].clone())),
            ColumnData::Array {
                offsets, values, ..
            } => {
                let end = offsets[row] as usize;
                let start = if row == 0 {
                    0
                } else {
                    offsets[row - 1] as usize
                };
                let mut items = Vec::with_capacity(end - start);
                for i in start..end {
                    items.push(values.value_at(i)?);
                }
                Ok(Value::Array(items))
            }
            ColumnData::Set(_) => Err(ExprError::logical(
                "cannot extract a value out of a Set column",
            )),
        }
    }

    /// Appends a value. The value must match the storage type.
    pub fn push_value(&mut self, value: &Value) -> Result<()> {
        match (self, value) {
            (ColumnData::Bool(v), Value::Bool(x)) => v.push(*x),
            (ColumnData::Int2(v), Value::Int2(x)) => v.push(*x),
            (ColumnData::Int4(v), Value::Int4(x)) => v.push(*x),
            (ColumnData::Int8(v), Value::Int8(x)) => v.push(*x),
            (ColumnData::Float4(v), Value::Float4(x)) => v.push(*x),
            (ColumnData::Float8(v), Value::Float8(x)) => v.push(*x),
            (ColumnData::Text(v), Value::Text(x)) => v.push(x.clone()),
            (
                ColumnData::Array {
                    offsets, values, ..
                },
                Value::Array(items),
            ) => {
                let nested = Arc::make_mut(values);
                for item in items {
                    nested.push_value(item)?;
                }
                offsets.push(nested.len() as u64);
            }
            (data, value) => {
                return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                    "cannot append {:?} to a {} column",
                    value,
                    data.data_type().name()
                ))))
            }
        }
        Ok(())
    }

    fn default_value(&self) -> Result<Value> {
        Value::default_for(&self.data_type()).ok_or_else(|| {
            ExprError::logical(format!("no default value for {}", self.data_type().name()))
        })
    }

    /// Returns a copy with exactly `n` rows, truncating or padding with the
    /// type's default value. Set storage is returned unchanged.
    pub fn resized(&self, n: usize) -> Result<ColumnData> {
        if let ColumnData::Set(_) = self {
            return Ok(self.clone());
        }
        let mut out = ColumnData::new_empty(&self.data_type());
        let keep = n.min(self.len());
        for row in 0..keep {
            out.push_value(&self.value_at(row)?)?;
        }
        if n > keep {
            let pad = self.default_value()?;
            for _ in keep..n {
                out.push_value(&pad)?;
            }
        }
        Ok(out)
    }

    /// Expands rows according to a cumulative offsets vector: row `i` is
    /// repeated `offsets[i] - offsets[i-1]` times.
    pub fn replicated(&self, offsets: &[u64]) -> Result<ColumnData> {
        if offsets.len() != self.len() {
            return Err(ExprError::logical(format!(
                "replicate offsets have {} entries for a column of {} rows",
                offsets.len(),
                self.len()
            )));
        }
        let mut out = ColumnData::new_empty(&self.data_type());
        let mut prev = 0u64;
        for (row, &end) in offsets.iter().enumerate() {
            if end < prev {
                return Err(ExprError::logical("replicate offsets are not monotonic"));
            }
            let value = self.value_at(row)?;
            for _ in prev..end {
                out.push_value(&value)?;
            }
            prev = end;
        }
        Ok(out)
    }
}

/// An immutable column: either one entry per row, or one value repeated
/// logically across `len` rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Full(Arc<ColumnData>),
    Const { data: Arc<ColumnData>, len: usize },
}

impl Column {
    /// Wraps storage as a full column.
    pub fn full(data: ColumnData) -> Self {
        Column::Full(Arc::new(data))
    }

    /// Creates a constant column of `len` rows repeating `value`.
    pub fn constant(value: Value, data_type: &DataType, len: usize) -> Result<Self> {
        Ok(Column::Const {
            data: Arc::new(ColumnData::from_value(&value, data_type)?),
            len,
        })
    }

    /// Creates a constant column carrying a set.
    pub fn constant_set(set: Arc<SetData>, len: usize) -> Self {
        Column::Const {
            data: Arc::new(ColumnData::Set(set)),
            len,
        }
    }

    pub fn bools(values: Vec<bool>) -> Self {
        Column::full(ColumnData::Bool(values))
    }

    pub fn int2(values: Vec<i16>) -> Self {
        Column::full(ColumnData::Int2(values))
    }

    pub fn int4(values: Vec<i32>) -> Self {
        Column::full(ColumnData::Int4(values))
    }

    pub fn int8(values: Vec<i64>) -> Self {
        Column::full(ColumnData::Int8(values))
    }

    pub fn float8(values: Vec<f64>) -> Self {
        Column::full(ColumnData::Float8(values))
    }

    pub fn text<S: Into<String>>(values: Vec<S>) -> Self {
        Column::full(ColumnData::Text(values.into_iter().map(Into::into).collect()))
    }

    /// Builds an array column out of per-row element lists.
    pub fn array(element: DataType, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut data = ColumnData::new_empty(&DataType::array(element));
        for row in rows {
            data.push_value(&Value::Array(row))?;
        }
        Ok(Column::full(data))
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Column::Full(data) => data.len(),
            Column::Const { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for constant columns.
    pub fn is_const(&self) -> bool {
        matches!(self, Column::Const { .. })
    }

    /// The underlying storage; a single row for constant columns.
    pub fn data(&self) -> &ColumnData {
        match self {
            Column::Full(data) => data,
            Column::Const { data, .. } => data,
        }
    }

    /// The column's value type.
    pub fn data_type(&self) -> DataType {
        self.data().data_type()
    }

    /// Rendering of the column shape for dumps, e.g. `Const(Int4)`.
    pub fn kind_name(&self) -> String {
        match self {
            Column::Full(data) => data.data_type().name(),
            Column::Const { data, .. } => format!("Const({})", data.data_type().name()),
        }
    }

    /// Extracts the value at `row`.
    pub fn value_at(&self, row: usize) -> Result<Value> {
        match self {
            Column::Full(data) => data.value_at(row),
            Column::Const { data, len } => {
                if row >= *len {
                    return Err(ExprError::logical(format!(
                        "row {} out of bounds for constant column of {} rows",
                        row, len
                    )));
                }
                data.value_at(0)
            }
        }
    }

    /// The repeated value of a constant column, if this is one and the
    /// payload is value-representable.
    pub fn const_value(&self) -> Option<Value> {
        match self {
            Column::Const { data, .. } => data.value_at(0).ok(),
            Column::Full(_) => None,
        }
    }

    /// Returns the set payload, if this column carries one.
    pub fn as_set(&self) -> Option<&Arc<SetData>> {
        match self.data() {
            ColumnData::Set(set) => Some(set),
            _ => None,
        }
    }

    /// Array pieces of a full array column: offsets, flat values, element
    /// type. Constant columns must be materialized first.
    pub fn as_array(&self) -> Option<(&Offsets, &Arc<ColumnData>, &DataType)> {
        match self {
            Column::Full(data) => match &**data {
                ColumnData::Array {
                    element,
                    offsets,
                    values,
                } => Some((offsets, values, element)),
                _ => None,
            },
            Column::Const { .. } => None,
        }
    }

    /// Returns a copy with exactly `n` rows. Constant columns just change
    /// their logical length; full columns truncate or pad with defaults.
    pub fn clone_resized(&self, n: usize) -> Result<Column> {
        match self {
            Column::Const { data, .. } => Ok(Column::Const {
                data: data.clone(),
                len: n,
            }),
            Column::Full(data) => Ok(Column::full(data.resized(n)?)),
        }
    }

    /// Materializes a constant column into a full one; full columns are
    /// returned as-is.
    pub fn convert_to_full_column_if_const(&self) -> Result<Column> {
        match self {
            Column::Full(_) => Ok(self.clone()),
            Column::Const { data, len } => {
                let value = data.value_at(0)?;
                let mut out = ColumnData::new_empty(&data.data_type());
                for _ in 0..*len {
                    out.push_value(&value)?;
                }
                Ok(Column::full(out))
            }
        }
    }

    /// Per-row expansion according to a cumulative offsets vector. A
    /// constant column stays constant, only its logical length changes.
    pub fn replicate(&self, offsets: &[u64]) -> Result<Column> {
        if offsets.len() != self.len() {
            return Err(ExprError::logical(format!(
                "replicate offsets have {} entries for a column of {} rows",
                offsets.len(),
                self.len()
            )));
        }
        match self {
            Column::Const { data, .. } => Ok(Column::Const {
                data: data.clone(),
                len: offsets.last().copied().unwrap_or(0) as usize,
            }),
            Column::Full(data) => Ok(Column::full(data.replicated(offsets)?)),
        }
    }
}
