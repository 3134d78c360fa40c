//! `Row` — a thin wrapper around a record's column values that records
//! which columns were read or written, as a plain struct rather than a
//! reflective proxy object.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use crate::value::CellValue;

#[derive(Debug, Clone, Default)]
pub struct Row {
    values: BTreeMap<String, CellValue>,
    accessed: RefCell<HashSet<String>>,
}

impl Row {
    pub fn new(values: BTreeMap<String, CellValue>) -> Self {
        Self { values, accessed: RefCell::new(HashSet::new()) }
    }

    /// Read a column, recording the access.
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.accessed.borrow_mut().insert(column.to_string());
        self.values.get(column)
    }

    /// Write a column, recording the access.
    pub fn set(&mut self, column: impl Into<String>, value: CellValue) {
        let column = column.into();
        self.accessed.borrow_mut().insert(column.clone());
        self.values.insert(column, value);
    }

    /// Columns touched (read or written) since construction — fed to the
    /// runtime's include-set narrowing.
    pub fn accessed_columns(&self) -> HashSet<String> {
        self.accessed.borrow().clone()
    }

    pub fn raw_values(&self) -> &BTreeMap<String, CellValue> {
        &self.values
    }

    pub fn into_raw_values(self) -> BTreeMap<String, CellValue> {
        self.values
    }

    /// Serialize to the JSON document a backend stores a row as (e.g. the
    /// `postgres` backend's `data` column).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        let object = value.as_object().ok_or("row document must be a JSON object")?;
        let mut values = BTreeMap::new();
        for (k, v) in object {
            values.insert(k.clone(), CellValue::from_json(v)?);
        }
        Ok(Self::new(values))
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set_record_access() {
        let mut row = Row::new(BTreeMap::from([("balance".to_string(), CellValue::Int(10))]));
        let _ = row.get("balance");
        row.set("nonce", CellValue::Int(1));
        let accessed = row.accessed_columns();
        assert!(accessed.contains("balance"));
        assert!(accessed.contains("nonce"));
        assert!(!accessed.contains("address"));
    }

    #[test]
    fn json_roundtrip_preserves_values() {
        let row = Row::new(BTreeMap::from([
            ("address".to_string(), CellValue::Text("0xabc".to_string())),
            ("balance".to_string(), CellValue::BigInt("9999999999999999999".to_string())),
        ]));
        let restored = Row::from_json(&row.to_json()).unwrap();
        assert_eq!(restored, row);
    }
}
