//! # Blocks of Columns
//!
//! A [`Block`] is an ordered list of named, typed columns sharing a common
//! row count. During planning the column payload may be absent
//! (schema-only); during execution every consumed column is present.
//!
//! Duplicate names are tolerated: lookup returns the first match, while
//! position-based operations address exact entries. The executor relies on
//! this when a required input is redefined by the output schema.

use crate::error::{ExprError, Result};
use crate::types::{Column, DataType};

/// A column paired with its type and logical name. The column itself may be
/// absent while only the schema is known.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnWithTypeAndName {
    pub column: Option<Column>,
    pub data_type: DataType,
    pub name: String,
}

impl ColumnWithTypeAndName {
    pub fn new(column: Option<Column>, data_type: DataType, name: impl Into<String>) -> Self {
        Self {
            column,
            data_type,
            name: name.into(),
        }
    }

    /// Schema-only entry.
    pub fn schema(data_type: DataType, name: impl Into<String>) -> Self {
        Self::new(None, data_type, name)
    }
}

/// A name/type pair, the schema-level view of a column.
#[derive(Debug, Clone, PartialEq)]
pub struct NameAndType {
    pub name: String,
    pub data_type: DataType,
}

impl NameAndType {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// An ordered batch of columns addressable by position and by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    columns: Vec<ColumnWithTypeAndName>,
}

impl Block {
    pub fn new(columns: Vec<ColumnWithTypeAndName>) -> Self {
        Self { columns }
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Row count: the length of the first present column. Blocks with only
    /// schema entries report zero rows.
    pub fn rows(&self) -> usize {
        self.columns
            .iter()
            .find_map(|cwt| cwt.column.as_ref().map(Column::len))
            .unwrap_or(0)
    }

    pub fn columns(&self) -> &[ColumnWithTypeAndName] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [ColumnWithTypeAndName] {
        &mut self.columns
    }

    pub fn has(&self, name: &str) -> bool {
        self.columns.iter().any(|cwt| cwt.name == name)
    }

    /// Position of the first column with this name.
    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|cwt| cwt.name == name)
    }

    pub fn by_position(&self, pos: usize) -> &ColumnWithTypeAndName {
        &self.columns[pos]
    }

    pub fn by_name(&self, name: &str) -> Option<&ColumnWithTypeAndName> {
        self.columns.iter().find(|cwt| cwt.name == name)
    }

    /// Moves the column payload out of the entry at `pos`, leaving the
    /// schema in place.
    pub fn take_column_at(&mut self, pos: usize) -> Result<Column> {
        let entry = &mut self.columns[pos];
        entry.column.take().ok_or_else(|| {
            ExprError::logical(format!("column '{}' has no data to take", entry.name))
        })
    }

    pub fn insert(&mut self, cwt: ColumnWithTypeAndName) {
        self.columns.push(cwt);
    }

    /// Replaces the first column with this name, or appends.
    pub fn insert_or_replace(&mut self, cwt: ColumnWithTypeAndName) {
        match self.position_by_name(&cwt.name) {
            Some(pos) => self.columns[pos] = cwt,
            None => self.columns.push(cwt),
        }
    }

    pub fn erase(&mut self, pos: usize) {
        self.columns.remove(pos);
    }

    pub fn clear(&mut self) {
        self.columns.clear();
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|cwt| cwt.name.clone()).collect()
    }

    pub fn names_and_types(&self) -> Vec<NameAndType> {
        self.columns
            .iter()
            .map(|cwt| NameAndType::new(cwt.name.clone(), cwt.data_type.clone()))
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnWithTypeAndName> {
        self.columns.iter()
    }
}
