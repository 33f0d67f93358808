//! Conversion of source rows to warehouse values.
//!
//! Typed columns are coerced: integers and floats from numbers or numeric
//! strings, dates and datetimes from the timestamp formats SQL databases emit
//! or from unix seconds. Empty strings and zero dates become `null`. Untyped
//! columns keep booleans and numbers, and nested JSON is flattened to a string.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Number, Value};
use thiserror::Error;

use crate::{
    Error,
    sync::{ColumnType, FieldType, FieldTypeMap, Row, TableSchema},
    validation::validate_field_name,
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("column `{field}`: cannot convert {value} to {expected}")]
pub struct TransformError {
    pub field: String,
    pub expected: FieldType,
    pub value: String,
}

pub struct RowTransformer<'a> {
    table: &'a str,
    field_types: &'a FieldTypeMap,
}

impl<'a> RowTransformer<'a> {
    pub fn new(table: &'a str, field_types: &'a FieldTypeMap) -> Self {
        Self { table, field_types }
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.field_types.resolve(self.table, field)
    }

    /// Convert every column of a row. The first column that cannot be
    /// converted makes the whole row malformed.
    pub fn transform(&self, row: &Row) -> Result<Row, TransformError> {
        row.iter()
            .map(|(field, value)| {
                let converted = match self.field_type(field) {
                    Some(field_type) => convert(field, value, field_type)?,
                    None => pass_through(value),
                };
                Ok::<_, TransformError>((field.clone(), converted))
            })
            .collect()
    }

    /// Derive a table layout from transformed rows.
    ///
    /// Declared column types win. Other columns take the type of their values;
    /// integer and float mix to float, any other mix or an all-null column
    /// becomes a string.
    pub fn infer_schema(&self, rows: &[Row]) -> Result<TableSchema, Error> {
        let mut columns: Vec<(String, Option<ColumnType>)> = Vec::new();

        for row in rows {
            for (field, value) in row {
                let observed = match self.field_type(field) {
                    Some(field_type) => Some(ColumnType::from(field_type)),
                    None => value_type(value),
                };

                match columns.iter_mut().find(|(name, _)| name == field) {
                    Some((_, current)) => *current = merge(*current, observed),
                    None => {
                        validate_field_name(field)?;
                        columns.push((field.clone(), observed));
                    }
                }
            }
        }

        Ok(columns
            .into_iter()
            .fold(TableSchema::new(), |schema, (name, column_type)| {
                schema.column(&name, column_type.unwrap_or(ColumnType::String))
            }))
    }
}

fn convert(field: &str, value: &Value, field_type: FieldType) -> Result<Value, TransformError> {
    let invalid = || TransformError {
        field: field.to_string(),
        expected: field_type,
        value: value.to_string(),
    };

    if is_blank(value) {
        return Ok(Value::Null);
    }

    match field_type {
        FieldType::Integer => to_integer(value).map(Value::from).ok_or_else(invalid),
        FieldType::Float => to_float(value)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        FieldType::Date => to_datetime(value)
            .map(|dt| Value::String(dt.format(DATE_FORMAT).to_string()))
            .ok_or_else(invalid),
        FieldType::Datetime => to_datetime(value)
            .map(|dt| Value::String(dt.format(DATETIME_FORMAT).to_string()))
            .ok_or_else(invalid),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s.starts_with("0000-00-00")
        }
        _ => false,
    }
}

fn pass_through(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn to_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_datetime(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc()),
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn value_type(value: &Value) -> Option<ColumnType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(ColumnType::Boolean),
        Value::Number(n) if n.is_f64() => Some(ColumnType::Float),
        Value::Number(_) => Some(ColumnType::Integer),
        _ => Some(ColumnType::String),
    }
}

fn merge(current: Option<ColumnType>, observed: Option<ColumnType>) -> Option<ColumnType> {
    match (current, observed) {
        (None, other) | (other, None) => other,
        (Some(a), Some(b)) if a == b => Some(a),
        (Some(ColumnType::Integer), Some(ColumnType::Float))
        | (Some(ColumnType::Float), Some(ColumnType::Integer)) => Some(ColumnType::Float),
        _ => Some(ColumnType::String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_heuristic_columns_are_coerced() {
        let types = FieldTypeMap::new();
        let transformer = RowTransformer::new("enrollments", &types);

        let out = transformer
            .transform(&row(json!({
                "id": "42",
                "student_id": 7.0,
                "final_grade": "17.5",
                "start_date": "2024-03-01 08:30:00",
                "created_at": "2024-03-01T08:30:00Z",
                "active": true,
                "notes": "ok",
            })))
            .unwrap();

        assert_eq!(out["id"], json!(42));
        assert_eq!(out["student_id"], json!(7));
        assert_eq!(out["final_grade"], json!(17.5));
        assert_eq!(out["start_date"], json!("2024-03-01"));
        assert_eq!(out["created_at"], json!("2024-03-01 08:30:00"));
        assert_eq!(out["active"], json!(true));
        assert_eq!(out["notes"], json!("ok"));
    }

    #[test]
    fn test_overrides_apply() {
        let types = FieldTypeMap::new()
            .with("courses", "opened", FieldType::Date)
            .with("courses", "credits", FieldType::Integer);
        let transformer = RowTransformer::new("courses", &types);

        let out = transformer
            .transform(&row(json!({ "opened": 1_709_251_200, "credits": "4" })))
            .unwrap();
        assert_eq!(out["opened"], json!("2024-03-01"));
        assert_eq!(out["credits"], json!(4));
    }

    #[test]
    fn test_blank_and_zero_values_become_null() {
        let types = FieldTypeMap::new();
        let transformer = RowTransformer::new("courses", &types);

        let out = transformer
            .transform(&row(json!({
                "teacher_id": "",
                "end_date": "0000-00-00",
                "deleted_at": null,
            })))
            .unwrap();
        assert_eq!(out["teacher_id"], Value::Null);
        assert_eq!(out["end_date"], Value::Null);
        assert_eq!(out["deleted_at"], Value::Null);
    }

    #[test]
    fn test_uncoercible_value_is_an_error() {
        let types = FieldTypeMap::new();
        let transformer = RowTransformer::new("courses", &types);

        let err = transformer
            .transform(&row(json!({ "id": 1, "teacher_id": "abc" })))
            .unwrap_err();
        assert_eq!(err.field, "teacher_id");
        assert_eq!(err.expected, FieldType::Integer);
        assert_eq!(
            err.to_string(),
            "column `teacher_id`: cannot convert \"abc\" to integer"
        );

        assert!(
            transformer
                .transform(&row(json!({ "due_date": "next tuesday" })))
                .is_err()
        );
    }

    #[test]
    fn test_nested_json_is_flattened() {
        let types = FieldTypeMap::new();
        let transformer = RowTransformer::new("courses", &types);
        let out = transformer
            .transform(&row(json!({ "tags": ["a", "b"] })))
            .unwrap();
        assert_eq!(out["tags"], json!("[\"a\",\"b\"]"));
    }

    #[test]
    fn test_infer_schema_merges_rows() {
        let types = FieldTypeMap::new();
        let transformer = RowTransformer::new("courses", &types);

        let schema = transformer
            .infer_schema(&[
                row(json!({ "id": 1, "title": null, "rating": 4, "updated_at": "2024-03-01 00:00:00" })),
                row(json!({ "id": 2, "title": "Algebra", "rating": 4.5, "updated_at": null })),
            ])
            .unwrap();

        assert_eq!(schema.get("id"), Some(ColumnType::Integer));
        assert_eq!(schema.get("title"), Some(ColumnType::String));
        assert_eq!(schema.get("rating"), Some(ColumnType::Float));
        assert_eq!(schema.get("updated_at"), Some(ColumnType::Datetime));
    }

    #[test]
    fn test_infer_schema_rejects_unusable_column_names() {
        let types = FieldTypeMap::new();
        let transformer = RowTransformer::new("courses", &types);
        assert!(
            transformer
                .infer_schema(&[row(json!({ "bad column": 1 }))])
                .unwrap_err()
                .is_validation_error()
        );
    }
}
