//! Decoding of BigQuery's `f`/`v` row encoding.

use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{BigQueryError, ColumnInfo};

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TableSchema {
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

impl SchemaField {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    fn is_record(&self) -> bool {
        matches!(self.field_type.as_str(), "RECORD" | "STRUCT")
    }
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Columns with RECORD children flattened to `parent.child`.
    pub fn columns(&self) -> Vec<ColumnInfo> {
        let mut out = Vec::new();
        flatten(&self.fields, "", &mut out);
        out
    }
}

fn flatten(fields: &[SchemaField], prefix: &str, out: &mut Vec<ColumnInfo>) {
    for field in fields {
        let name = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", prefix, field.name)
        };
        out.push(ColumnInfo {
            name: name.clone(),
            data_type: field.field_type.clone(),
            mode: field.mode.clone().unwrap_or_else(|| "NULLABLE".to_string()),
            description: field.description.clone().filter(|d| !d.is_empty()),
        });
        if field.is_record() {
            flatten(&field.fields, &name, out);
        }
    }
}

/// Decode `rows` from a query response into named JSON objects.
pub(crate) fn decode_rows(
    schema: &TableSchema,
    rows: &[Value],
) -> Result<Vec<Map<String, Value>>, BigQueryError> {
    rows.iter()
        .map(|row| decode_record(&schema.fields, row))
        .collect()
}

fn decode_record(fields: &[SchemaField], row: &Value) -> Result<Map<String, Value>, BigQueryError> {
    let cells = row["f"]
        .as_array()
        .ok_or_else(|| BigQueryError::Decode("row is missing its 'f' cell list".to_string()))?;

    if cells.len() != fields.len() {
        return Err(BigQueryError::Decode(format!(
            "row has {} cells but schema has {} fields",
            cells.len(),
            fields.len()
        )));
    }

    let mut out = Map::new();
    for (field, cell) in fields.iter().zip(cells) {
        out.insert(field.name.clone(), decode_field(field, &cell["v"])?);
    }
    Ok(out)
}

fn decode_field(field: &SchemaField, value: &Value) -> Result<Value, BigQueryError> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    if field.is_repeated() {
        let items = value.as_array().ok_or_else(|| {
            BigQueryError::Decode(format!("repeated field '{}' is not an array", field.name))
        })?;
        return items
            .iter()
            .map(|item| decode_single(field, &item["v"]))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }

    decode_single(field, value)
}

fn decode_single(field: &SchemaField, value: &Value) -> Result<Value, BigQueryError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if field.is_record() {
        return decode_record(&field.fields, value).map(Value::Object);
    }

    let Some(text) = value.as_str() else {
        return Ok(value.clone());
    };

    let decoded = match field.field_type.as_str() {
        "INTEGER" | "INT64" => text.parse::<i64>().map(Value::from).ok(),
        "FLOAT" | "FLOAT64" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "BOOLEAN" | "BOOL" => match text {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        "TIMESTAMP" => timestamp_rfc3339(text).map(Value::String),
        _ => None,
    };

    Ok(decoded.unwrap_or_else(|| Value::String(text.to_string())))
}

/// TIMESTAMP cells arrive as epoch seconds in float notation.
fn timestamp_rfc3339(text: &str) -> Option<String> {
    let seconds = text.parse::<f64>().ok()?;
    let micros = (seconds * 1_000_000.0).round();
    if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
        return None;
    }
    let micros = micros as i64;
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(micros.div_euclid(1_000_000), nanos)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
