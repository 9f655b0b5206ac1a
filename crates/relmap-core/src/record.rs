//! Record trait and the dynamic record representation.
//!
//! Typed models implement [`Record`] (static table/key/reflection metadata
//! plus row conversion). Association machinery works on [`RecordData`], a
//! dynamic attribute map that tracks which columns were touched in memory.
//! The touched set is what the collection merge consults to decide which
//! attributes an in-memory copy "changed".

use std::collections::{BTreeSet, HashMap};

use crate::error::Result;
use crate::reflection::Reflection;
use crate::row::Row;
use crate::value::Value;

/// A struct mapped to a database table.
pub trait Record: Sized + Send + Sync {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// The concrete type name, stored by polymorphic discriminator columns.
    const TYPE_NAME: &'static str;

    /// The primary key column.
    const PRIMARY_KEY: &'static str = "id";

    /// Association metadata for this record type.
    const REFLECTIONS: &'static [Reflection] = &[];

    /// Column names, in declaration order.
    fn columns() -> &'static [&'static str];

    /// Convert this instance to (column, value) pairs.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct an instance from a database row.
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self>;

    /// The value of the primary key column.
    fn primary_key_value(&self) -> Value;

    /// Check if this is a new record (primary key not yet assigned).
    fn is_new(&self) -> bool {
        self.primary_key_value().is_null()
    }
}

/// A dynamically represented record: table, ordered attributes, and a
/// touched-column set.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordData {
    table: String,
    primary_key: String,
    /// Column order, stable across merges.
    columns: Vec<String>,
    values: HashMap<String, Value>,
    /// Columns assigned in memory since this data was loaded or created.
    touched: BTreeSet<String>,
    new_record: bool,
}

impl RecordData {
    /// Create an empty, new (unpersisted) record for a table.
    #[must_use]
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            columns: Vec::new(),
            values: HashMap::new(),
            touched: BTreeSet::new(),
            new_record: true,
        }
    }

    /// Capture a typed record. The touched set starts empty.
    #[must_use]
    pub fn from_record<T: Record>(record: &T) -> Self {
        let mut data = Self::new(T::TABLE_NAME, T::PRIMARY_KEY);
        data.new_record = record.is_new();
        for (column, value) in record.to_row() {
            data.columns.push(column.to_string());
            data.values.insert(column.to_string(), value);
        }
        data
    }

    /// Capture a fetched row as a persisted record.
    #[must_use]
    pub fn from_row(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        row: &Row,
    ) -> Self {
        let mut data = Self::new(table, primary_key);
        data.new_record = false;
        for (column, value) in row.iter() {
            data.columns.push(column.to_string());
            data.values.insert(column.to_string(), value.clone());
        }
        data
    }

    /// The table this record belongs to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The primary key column name.
    #[must_use]
    pub fn primary_key_column(&self) -> &str {
        &self.primary_key
    }

    /// Get an attribute value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Assign an attribute, marking the column touched.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        if !self.values.contains_key(&column) {
            self.columns.push(column.clone());
        }
        self.values.insert(column.clone(), value.into());
        self.touched.insert(column);
    }

    /// Assign the primary key without marking it touched (post-insert
    /// bookkeeping, not an in-memory edit).
    pub fn assign_key(&mut self, value: impl Into<Value>) {
        let column = self.primary_key.clone();
        if !self.values.contains_key(&column) {
            self.columns.push(column.clone());
        }
        self.values.insert(column, value.into());
        self.new_record = false;
    }

    /// The primary key value, if assigned and non-null.
    #[must_use]
    pub fn key(&self) -> Option<&Value> {
        self.values
            .get(&self.primary_key)
            .filter(|v| !v.is_null())
    }

    /// Is this record unpersisted?
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.new_record || self.key().is_none()
    }

    /// Was this column assigned in memory?
    #[must_use]
    pub fn touched(&self, column: &str) -> bool {
        self.touched.contains(column)
    }

    /// Columns assigned in memory, in sorted order.
    pub fn touched_columns(&self) -> impl Iterator<Item = &str> {
        self.touched.iter().map(String::as_str)
    }

    /// Forget in-memory edits (post-save bookkeeping).
    pub fn clear_touched(&mut self) {
        self.touched.clear();
    }

    /// Do two data values denote the same logical record (same table, same
    /// non-null key)?
    #[must_use]
    pub fn same_record(&self, other: &RecordData) -> bool {
        if self.table != other.table {
            return false;
        }
        match (self.key(), other.key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Fill every untouched attribute from a freshly fetched persisted
    /// copy, keeping in-memory edits. Adopts the persisted key when the
    /// in-memory copy has none.
    pub fn merge_persisted(&mut self, persisted: &RecordData) {
        for column in &persisted.columns {
            if self.touched(column) {
                continue;
            }
            if !self.values.contains_key(column) {
                self.columns.push(column.clone());
            }
            if let Some(value) = persisted.values.get(column) {
                self.values.insert(column.clone(), value.clone());
            }
        }
        self.new_record = false;
    }

    /// Render the attributes as a row, in column order.
    #[must_use]
    pub fn to_row(&self) -> Row {
        let names: Vec<String> = self.columns.clone();
        let values: Vec<Value> = self
            .columns
            .iter()
            .map(|c| self.values.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        Row::new(names, values)
    }

    /// Hydrate into a typed record.
    #[allow(clippy::result_large_err)]
    pub fn hydrate<T: Record>(&self) -> Result<T> {
        T::from_row(&self.to_row())
    }
}
