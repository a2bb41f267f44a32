//! Parses model output into records.

use super::record::{ExtractionRecord, FieldSet};
use crate::errors::ExtractionError;
use serde_json::{Map, Value};

/// Parses a model's reply into records restricted to `fields`.
///
/// Accepts a JSON array of objects, an object wrapping one such array, or a
/// single object, optionally inside a markdown code fence. Records whose
/// every field is null are dropped.
///
/// # Errors
///
/// Returns `MalformedResponse` if the reply is not JSON of one of those shapes.
pub fn parse_records(reply: &str, fields: &FieldSet) -> Result<Vec<ExtractionRecord>, ExtractionError> {
    let value = parse_json(reply)?;
    let objects = record_objects(&value, fields)?;

    Ok(objects
        .into_iter()
        .map(|object| ExtractionRecord::from_object(fields, object))
        .filter(|record| !record.is_all_null())
        .collect())
}

fn parse_json(reply: &str) -> Result<Value, ExtractionError> {
    let text = strip_code_fence(reply);
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    // Prose around the payload: take the outermost bracketed span.
    let start = text.find(['[', '{']);
    let end = text.rfind([']', '}']);
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                return Ok(value);
            }
        }
    }

    let preview: String = text.chars().take(80).collect();
    Err(ExtractionError::malformed(format!("reply is not JSON: {preview}")))
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn record_objects<'a>(
    value: &'a Value,
    fields: &FieldSet,
) -> Result<Vec<&'a Map<String, Value>>, ExtractionError> {
    match value {
        Value::Array(items) => objects_of(items),
        Value::Object(object) => {
            let holds_fields = object.keys().any(|k| fields.contains(k));
            let arrays: Vec<&Vec<Value>> = object.values().filter_map(Value::as_array).collect();
            if !holds_fields && arrays.len() == 1 {
                objects_of(arrays[0])
            } else if !holds_fields && object.is_empty() {
                Ok(Vec::new())
            } else if holds_fields {
                Ok(vec![object])
            } else {
                Err(ExtractionError::malformed(
                    "object holds none of the configured fields",
                ))
            }
        }
        _ => Err(ExtractionError::malformed("reply is neither an array nor an object")),
    }
}

fn objects_of(items: &[Value]) -> Result<Vec<&Map<String, Value>>, ExtractionError> {
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| ExtractionError::malformed("array element is not an object"))
        })
        .collect()
}
