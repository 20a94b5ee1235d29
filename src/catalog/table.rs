use std::collections::BTreeMap;

use crate::catalog::column::Column;
use crate::catalog::value::Value;
use crate::common::config::RowId;
use crate::common::errors::CatalogError;

/// A single table row. The id is assigned by the owning table and is stable
/// for the lifetime of the row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(id: RowId, values: Vec<Value>) -> Self {
        Self { id, values }
    }
}

/// An in-memory table: schema, rows keyed by row id, and the next-row-id
/// counter persisted alongside the data.
///
/// Rows live in a `BTreeMap` so iteration order is deterministic. Save and
/// WAL replay both depend on that: replaying the same log against two fresh
/// databases must produce byte-identical table files.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    rows: BTreeMap<RowId, Row>,
    primary_key: String,
    next_row_id: RowId,
}

impl Table {
    pub fn new(name: &str, columns: Vec<Column>, primary_key: &str) -> Self {
        Self {
            name: name.to_string(),
            columns,
            rows: BTreeMap::new(),
            primary_key: primary_key.to_string(),
            next_row_id: 1,
        }
    }

    /// Rebuilds a table from its persisted parts. Used by the load path.
    pub(crate) fn from_parts(
        name: String,
        columns: Vec<Column>,
        rows: BTreeMap<RowId, Row>,
        primary_key: String,
        next_row_id: RowId,
    ) -> Self {
        Self {
            name,
            columns,
            rows,
            primary_key,
            next_row_id,
        }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn get_primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn get_next_row_id(&self) -> RowId {
        self.next_row_id
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get_row(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    /// Inserts a new row, assigning the next row id.
    pub fn insert_row(&mut self, values: Vec<Value>) -> Result<RowId, CatalogError> {
        self.check_arity(&values)?;
        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, Row::new(id, values));
        Ok(id)
    }

    /// Applies a row that already carries its id (the WAL replay and load
    /// paths). The next-row-id counter is bumped past the applied id so later
    /// inserts never collide.
    pub fn apply_row(&mut self, row: Row) -> Result<(), CatalogError> {
        self.check_arity(&row.values)?;
        if row.id >= self.next_row_id {
            self.next_row_id = row.id + 1;
        }
        self.rows.insert(row.id, row);
        Ok(())
    }

    pub fn update_row(&mut self, id: RowId, values: Vec<Value>) -> Result<(), CatalogError> {
        self.check_arity(&values)?;
        match self.rows.get_mut(&id) {
            Some(row) => {
                row.values = values;
                Ok(())
            }
            None => Err(CatalogError::UnknownRow(id)),
        }
    }

    pub fn delete_row(&mut self, id: RowId) -> Result<(), CatalogError> {
        self.rows
            .remove(&id)
            .map(|_| ())
            .ok_or(CatalogError::UnknownRow(id))
    }

    fn check_arity(&self, values: &[Value]) -> Result<(), CatalogError> {
        if values.len() != self.columns.len() {
            return Err(CatalogError::ColumnCountMismatch {
                expected: self.columns.len(),
                got: values.len(),
            });
        }
        Ok(())
    }
}
