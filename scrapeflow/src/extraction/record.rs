//! Field sets and extracted records.

use crate::errors::ConfigError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::str::FromStr;

/// Ordered, de-duplicated, non-empty list of field names to extract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FieldSet {
    names: Vec<String>,
}

impl FieldSet {
    /// Creates a field set. Names are trimmed; empty names and repeats are dropped.
    ///
    /// # Errors
    ///
    /// Returns `EmptyFieldList` if no names remain.
    pub fn new<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() && !unique.iter().any(|n| n == name) {
                unique.push(name.to_string());
            }
        }
        if unique.is_empty() {
            return Err(ConfigError::EmptyFieldList);
        }
        Ok(Self { names: unique })
    }

    /// Parses a comma-separated list such as `"title, price, city"`.
    ///
    /// # Errors
    ///
    /// Returns `EmptyFieldList` if the list has no names.
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        Self::new(list.split(','))
    }

    /// Field names in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false; a field set is never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether `name` is one of the fields.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Iterates over the field names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// JSON schema of one record: every field a nullable string.
    #[must_use]
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    json!({
                        "type": ["string", "null"],
                        "description": format!("Extracted {name}"),
                    }),
                )
            })
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.names,
            "additionalProperties": false,
        })
    }
}

impl FromStr for FieldSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<Vec<String>> for FieldSet {
    type Error = ConfigError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<FieldSet> for Vec<String> {
    fn from(fields: FieldSet) -> Self {
        fields.names
    }
}

/// One extracted record: a value (or explicit null) for every configured field.
///
/// Serializes as a JSON object whose keys follow the field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractionRecord {
    entries: Vec<(String, Option<String>)>,
}

impl ExtractionRecord {
    /// Builds a record from a model-produced JSON object.
    ///
    /// Keys outside the field set are dropped, missing keys become null and
    /// non-string scalars are kept as their JSON text.
    #[must_use]
    pub fn from_object(fields: &FieldSet, object: &Map<String, Value>) -> Self {
        let entries = fields
            .iter()
            .map(|name| (name.to_string(), object.get(name).and_then(render_value)))
            .collect();
        Self { entries }
    }

    /// Builds a record from name/value pairs.
    #[must_use]
    pub fn from_pairs<K, V>(fields: &FieldSet, pairs: impl IntoIterator<Item = (K, Option<V>)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut object = Map::new();
        for (key, value) in pairs {
            object.insert(
                key.as_ref().to_string(),
                value.map_or(Value::Null, |v| Value::String(v.into())),
            );
        }
        Self::from_object(fields, &object)
    }

    /// Value of a field; `None` for null or unknown fields.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Name/value pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every field is null.
    #[must_use]
    pub fn is_all_null(&self) -> bool {
        self.entries.iter().all(|(_, v)| v.is_none())
    }

    /// Whether every field has a value.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|(_, v)| v.is_some())
    }
}

impl Serialize for ExtractionRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Strings pass through; blank strings and JSON null become `None`.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fields() -> FieldSet {
        FieldSet::parse("title, price, city").unwrap()
    }

    #[test]
    fn test_parse_field_list() {
        let fields = FieldSet::parse(" title, price ,, title, city ,").unwrap();
        assert_eq!(fields.names(), &["title", "price", "city"]);
        assert_eq!(fields.len(), 3);
        assert!(fields.contains("price"));
    }

    #[test]
    fn test_empty_field_list_rejected() {
        assert_eq!(FieldSet::parse(" , ,").unwrap_err(), ConfigError::EmptyFieldList);
        assert_eq!(
            FieldSet::new(Vec::<String>::new()).unwrap_err(),
            ConfigError::EmptyFieldList
        );
    }

    #[test]
    fn test_field_set_deserializes_from_list() {
        let fields: FieldSet = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(fields.names(), &["a", "b"]);
        assert!(serde_json::from_str::<FieldSet>("[]").is_err());
    }

    #[test]
    fn test_json_schema_lists_all_fields() {
        let schema = fields().json_schema();
        assert_eq!(schema["required"], json!(["title", "price", "city"]));
        assert_eq!(schema["properties"]["price"]["type"], json!(["string", "null"]));
    }

    #[test]
    fn test_record_has_exactly_configured_fields() {
        let object = json!({"title": "Avanza", "error": false, "year": 2020})
            .as_object()
            .cloned()
            .unwrap();
        let record = ExtractionRecord::from_object(&fields(), &object);

        assert_eq!(record.field_names().collect::<Vec<_>>(), vec!["title", "price", "city"]);
        assert_eq!(record.get("title"), Some("Avanza"));
        assert_eq!(record.get("price"), None);
        assert_eq!(record.get("error"), None);
    }

    #[test]
    fn test_record_renders_scalars_as_text() {
        let object = json!({"title": "  Brio ", "price": 150000000, "city": ""})
            .as_object()
            .cloned()
            .unwrap();
        let record = ExtractionRecord::from_object(&fields(), &object);

        assert_eq!(record.get("title"), Some("Brio"));
        assert_eq!(record.get("price"), Some("150000000"));
        assert_eq!(record.get("city"), None);
        assert!(!record.is_complete());
        assert!(!record.is_all_null());
    }

    #[test]
    fn test_record_serializes_in_field_order_with_nulls() {
        let record = ExtractionRecord::from_pairs(
            &fields(),
            [("city", Some("Jakarta")), ("title", Some("Jazz"))],
        );

        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"title":"Jazz","price":null,"city":"Jakarta"}"#
        );
    }
}
