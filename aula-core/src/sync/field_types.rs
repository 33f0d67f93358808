//! Destination types for source columns.
//!
//! Explicit per-table overrides come from a JSON document shaped like
//!
//! ```json
//! { "enrollments": { "enrolled_on": "date", "final_grade": "float" } }
//! ```
//!
//! Columns without an override fall back to name heuristics, see
//! [`FieldType::infer_from_name`].

use std::{collections::HashMap, fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    Error,
    validation::{validate_field_name, validate_table_name},
};

/// Environment variable naming the JSON file with field type overrides.
pub const FIELD_TYPES_ENV: &str = "AULA_FIELD_TYPES";

const FLOAT_FIELDS: &[&str] = &[
    "grade",
    "score",
    "average",
    "percentage",
    "price",
    "amount",
    "weight",
    "gpa",
    "attendance_rate",
    "dropout_probability",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Date,
    Datetime,
    Integer,
    Float,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
        }
    }

    /// Guess a destination type from a column name.
    ///
    /// ```
    /// use aula_core::sync::FieldType;
    ///
    /// assert_eq!(FieldType::infer_from_name("course_id"), Some(FieldType::Integer));
    /// assert_eq!(FieldType::infer_from_name("birth_date"), Some(FieldType::Date));
    /// assert_eq!(FieldType::infer_from_name("final_score"), Some(FieldType::Float));
    /// assert_eq!(FieldType::infer_from_name("title"), None);
    /// ```
    pub fn infer_from_name(field: &str) -> Option<FieldType> {
        let field = field.to_ascii_lowercase();

        if field == "id" || field.ends_with("_id") {
            return Some(FieldType::Integer);
        }
        if field == "date" || field.ends_with("_date") {
            return Some(FieldType::Date);
        }
        if field.ends_with("_time") || field.ends_with("_at") {
            return Some(FieldType::Datetime);
        }
        if FLOAT_FIELDS.contains(&field.as_str())
            || field.ends_with("_score")
            || field.ends_with("_grade")
        {
            return Some(FieldType::Float);
        }

        None
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table name to column name to [`FieldType`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTypeMap {
    tables: HashMap<String, HashMap<String, FieldType>>,
}

impl FieldTypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, table: &str, field: &str, field_type: FieldType) -> Self {
        self.insert(table, field, field_type);
        self
    }

    pub fn insert(&mut self, table: &str, field: &str, field_type: FieldType) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(field.to_string(), field_type);
    }

    /// The explicit override for a column, if one was configured.
    pub fn get(&self, table: &str, field: &str) -> Option<FieldType> {
        self.tables.get(table)?.get(field).copied()
    }

    /// The override for a column, falling back to name heuristics.
    pub fn resolve(&self, table: &str, field: &str) -> Option<FieldType> {
        self.get(table, field)
            .or_else(|| FieldType::infer_from_name(field))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let map: FieldTypeMap = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid field type map: {e}")))?;

        for (table, fields) in &map.tables {
            validate_table_name(table)?;
            for field in fields.keys() {
                validate_field_name(field)?;
            }
        }

        Ok(map)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read field type map {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Load the file named by `AULA_FIELD_TYPES`, or an empty map when unset.
    pub fn from_env() -> Result<Self, Error> {
        match std::env::var(FIELD_TYPES_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_heuristics() {
        assert_eq!(FieldType::infer_from_name("id"), Some(FieldType::Integer));
        assert_eq!(FieldType::infer_from_name("Student_ID"), Some(FieldType::Integer));
        assert_eq!(FieldType::infer_from_name("start_time"), Some(FieldType::Datetime));
        assert_eq!(FieldType::infer_from_name("updated_at"), Some(FieldType::Datetime));
        assert_eq!(FieldType::infer_from_name("due_date"), Some(FieldType::Date));
        assert_eq!(FieldType::infer_from_name("grade"), Some(FieldType::Float));
        assert_eq!(FieldType::infer_from_name("midterm_grade"), Some(FieldType::Float));
        assert_eq!(FieldType::infer_from_name("email"), None);
        // "paid" must not match the `_id` suffix
        assert_eq!(FieldType::infer_from_name("paid"), None);
    }

    #[test]
    fn test_override_wins_over_heuristic() {
        let map = FieldTypeMap::new().with("courses", "legacy_id", FieldType::Float);
        assert_eq!(map.resolve("courses", "legacy_id"), Some(FieldType::Float));
        assert_eq!(map.resolve("students", "legacy_id"), Some(FieldType::Integer));
        assert_eq!(map.get("students", "legacy_id"), None);
    }

    #[test]
    fn test_from_json() {
        let map = FieldTypeMap::from_json(
            r#"{ "enrollments": { "enrolled_on": "date", "credits": "integer" } }"#,
        )
        .unwrap();
        assert_eq!(map.get("enrollments", "enrolled_on"), Some(FieldType::Date));
        assert_eq!(map.get("enrollments", "credits"), Some(FieldType::Integer));
    }

    #[test]
    fn test_from_json_rejects_unknown_types_and_bad_names() {
        assert!(matches!(
            FieldTypeMap::from_json(r#"{ "courses": { "title": "text" } }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            FieldTypeMap::from_json(r#"{ "courses; drop": { "title": "date" } }"#),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let err = FieldTypeMap::from_file("/nonexistent/field-types.json").unwrap_err();
        assert!(err.to_string().contains("cannot read field type map"));
    }
}
