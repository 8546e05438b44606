// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A row handed from an adapter to a handler.
///
/// Records have no fixed schema; each handler names the fields it needs and
/// validates them with the `require_*` accessors, which turn an absent field
/// into a per-item [`Error::MissingField`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from a JSON object. Anything else yields `None`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map.into_iter().collect())),
            _ => None,
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Field lookup, with `.` descending into nested objects (`repo.name`).
    pub fn get(&self, field: &str) -> Option<&Value> {
        let mut parts = field.split('.');
        let first = self.0.get(parts.next()?)?;
        parts
            .try_fold(first, |value, part| value.get(part))
            .filter(|value| !value.is_null())
    }

    pub fn str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Integer field; numeric strings are accepted since warehouse rows
    /// encode INT64 columns as strings.
    pub fn i64(&self, field: &str) -> Option<i64> {
        match self.get(field)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, field: &str) -> Option<bool> {
        match self.get(field)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn array(&self, field: &str) -> Option<&Vec<Value>> {
        self.get(field).and_then(Value::as_array)
    }

    pub fn require(&self, origin: &str, field: &str) -> Result<&Value> {
        self.get(field).ok_or_else(|| missing(origin, field))
    }

    pub fn require_str(&self, origin: &str, field: &str) -> Result<&str> {
        self.str(field).ok_or_else(|| missing(origin, field))
    }

    pub fn require_i64(&self, origin: &str, field: &str) -> Result<i64> {
        self.i64(field).ok_or_else(|| missing(origin, field))
    }

    /// Checks a handler's declared fields in one go.
    pub fn require_fields(&self, origin: &str, fields: &[&str]) -> Result<()> {
        match fields.iter().find(|field| self.get(field).is_none()) {
            Some(field) => Err(missing(origin, field)),
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0.into_iter().collect())
    }
}

fn missing(origin: &str, field: &str) -> Error {
    Error::MissingField {
        origin: origin.to_string(),
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_lookup_and_numeric_strings() {
        let record = Record::from_json(json!({
            "repo": {"name": "github.com/psf/requests", "commit": null},
            "downloads": "1200",
        }))
        .unwrap();

        assert_eq!(record.str("repo.name"), Some("github.com/psf/requests"));
        assert_eq!(record.get("repo.commit"), None);
        assert_eq!(record.i64("downloads"), Some(1200));
    }

    #[test]
    fn require_fields_names_the_first_missing_field() {
        let record = Record::new().with("name", "foo");
        let err = record
            .require_fields("pypi", &["name", "version", "size"])
            .unwrap_err();
        assert!(
            matches!(err, Error::MissingField { ref field, .. } if field == "version"),
            "got {err:?}"
        );
    }

    #[test]
    fn non_objects_are_not_records() {
        assert!(Record::from_json(json!([1, 2])).is_none());
    }
}
