use std::collections::BTreeMap;

use crate::catalog::column::Column;
use crate::catalog::table::Table;
use crate::common::errors::CatalogError;

/// Referential action tags, fixed u32 values on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

impl FkAction {
    pub fn as_u32(self) -> u32 {
        match self {
            FkAction::NoAction => 0,
            FkAction::Restrict => 1,
            FkAction::Cascade => 2,
            FkAction::SetNull => 3,
        }
    }

    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(FkAction::NoAction),
            1 => Some(FkAction::Restrict),
            2 => Some(FkAction::Cascade),
            3 => Some(FkAction::SetNull),
            _ => None,
        }
    }
}

/// A foreign-key constraint record. Enforcement happens in the relational
/// layer; the storage core only persists and reloads the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

/// The database handle the persistence manager and WAL replay operate on.
///
/// Tables are keyed by name in a `BTreeMap` for deterministic save order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Database {
    tables: BTreeMap<String, Table>,
    foreign_keys: Vec<ForeignKey>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(
        &mut self,
        name: &str,
        columns: Vec<Column>,
        primary_key: &str,
    ) -> Result<(), CatalogError> {
        if self.tables.contains_key(name) {
            return Err(CatalogError::DuplicateTable(name.to_string()));
        }
        self.tables
            .insert(name.to_string(), Table::new(name, columns, primary_key));
        Ok(())
    }

    /// Installs an already-built table (load path). Replaces any existing
    /// table of the same name.
    pub(crate) fn install_table(&mut self, table: Table) {
        self.tables.insert(table.get_name().to_string(), table);
    }

    pub fn drop_table(&mut self, name: &str) -> Result<(), CatalogError> {
        self.tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CatalogError::UnknownTable(name.to_string()))
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn add_foreign_key(&mut self, fk: ForeignKey) {
        self.foreign_keys.push(fk);
    }

    pub fn get_foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub(crate) fn set_foreign_keys(&mut self, fks: Vec<ForeignKey>) {
        self.foreign_keys = fks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::value::DataType;

    #[test]
    fn test_create_and_drop_table() {
        let mut db = Database::new();
        db.create_table("t", vec![Column::new("id", DataType::Integer)], "id")
            .unwrap();
        assert!(db.get_table("t").is_some());
        assert_eq!(
            db.create_table("t", vec![], "id").unwrap_err(),
            CatalogError::DuplicateTable("t".to_string())
        );
        db.drop_table("t").unwrap();
        assert_eq!(
            db.drop_table("t").unwrap_err(),
            CatalogError::UnknownTable("t".to_string())
        );
    }

    #[test]
    fn test_foreign_keys_tracked() {
        let mut db = Database::new();
        db.add_foreign_key(ForeignKey {
            name: "fk_orders_user".to_string(),
            table: "orders".to_string(),
            column: "user_id".to_string(),
            ref_table: "users".to_string(),
            ref_column: "id".to_string(),
            on_delete: FkAction::Cascade,
            on_update: FkAction::NoAction,
        });
        assert_eq!(db.get_foreign_keys().len(), 1);
        assert_eq!(db.get_foreign_keys()[0].ref_table, "users");
    }

    #[test]
    fn test_fk_action_tags() {
        for action in [
            FkAction::NoAction,
            FkAction::Restrict,
            FkAction::Cascade,
            FkAction::SetNull,
        ] {
            assert_eq!(FkAction::from_u32(action.as_u32()), Some(action));
        }
        assert_eq!(FkAction::from_u32(9), None);
    }
}
