//! Declarative column/table specs — plain struct literals instead of a
//! fluent builder chain, so a schema reads as data rather than a sequence
//! of method calls.

use std::collections::BTreeMap;

use crate::value::CellValue;

/// The first-class column kinds a table can declare.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    Hex,
    Bytes,
    BigInt,
    Integer,
    Smallint,
    Int8,
    Boolean,
    Text,
    Varchar,
    Char,
    Numeric,
    Real,
    DoublePrecision,
    Json,
    Array(Box<ColumnKind>),
    Enum(Vec<String>),
    Point,
    Line,
    Timestamp,
}

/// A function hook evaluated by the store rather than supplied as a literal:
/// `$default(fn)` at insert time, `$onUpdateFn(fn)` at update time.
pub type ColumnFn = std::sync::Arc<dyn Fn() -> CellValue + Send + Sync>;

#[derive(Clone)]
pub struct ColumnSpec {
    pub kind: ColumnKind,
    pub not_null: bool,
    pub primary_key: bool,
    pub default: Option<CellValue>,
    pub on_insert_fn: Option<ColumnFn>,
    pub on_update_fn: Option<ColumnFn>,
}

impl std::fmt::Debug for ColumnSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnSpec")
            .field("kind", &self.kind)
            .field("not_null", &self.not_null)
            .field("primary_key", &self.primary_key)
            .field("default", &self.default)
            .field("on_insert_fn", &self.on_insert_fn.is_some())
            .field("on_update_fn", &self.on_update_fn.is_some())
            .finish()
    }
}

impl ColumnSpec {
    pub fn new(kind: ColumnKind) -> Self {
        Self { kind, not_null: false, primary_key: false, default: None, on_insert_fn: None, on_update_fn: None }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn default(mut self, value: CellValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn on_insert(mut self, f: ColumnFn) -> Self {
        self.on_insert_fn = Some(f);
        self
    }

    pub fn on_update(mut self, f: ColumnFn) -> Self {
        self.on_update_fn = Some(f);
        self
    }
}

/// `{name, columns, primaryKey}` — a single table's schema.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub columns: BTreeMap<String, ColumnSpec>,
    pub primary_key: String,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self { name: name.into(), columns: BTreeMap::new(), primary_key: primary_key.into() }
    }

    pub fn column(mut self, name: impl Into<String>, spec: ColumnSpec) -> Self {
        self.columns.insert(name.into(), spec);
        self
    }

    pub fn primary_key_spec(&self) -> Option<&ColumnSpec> {
        self.columns.get(&self.primary_key)
    }
}
