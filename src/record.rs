use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Metadata field naming the connector type that produced a record.
pub const CONNECTOR_FIELD: &str = "_grove_connector";
/// Metadata field naming the operation a record was collected for.
pub const OPERATION_FIELD: &str = "_grove_operation";

/// One vendor-native log record.
///
/// Records are kept as a JSON object; the only contract the core relies on
/// is that a field can be looked up by [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntry(Map<String, Value>);

impl LogEntry {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(Error::request(
                None,
                format!("expected a JSON object log record, got {}", type_name(&other)),
            )),
        }
    }

    /// Parses a JSON array body into records.
    pub fn parse_array(body: &[u8]) -> Result<Vec<Self>> {
        let values: Vec<Value> = serde_json::from_slice(body)?;
        values.into_iter().map(Self::from_value).collect()
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.lookup(&self.0)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub(crate) fn annotate(&mut self, connector: &str, operation: &str) {
        self.insert(CONNECTOR_FIELD, Value::String(connector.to_string()));
        self.insert(OPERATION_FIELD, Value::String(operation.to_string()));
    }
}

impl From<Map<String, Value>> for LogEntry {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A dotted path into a record, e.g. `actor.id`.
///
/// A literal key containing dots (`"event.time"`) wins over traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn lookup<'a>(&self, record: &'a Map<String, Value>) -> Option<&'a Value> {
        if let Some(value) = record.get(&self.0) {
            return Some(value);
        }

        let mut parts = self.0.split('.');
        let mut current = record.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Renders a scalar JSON value as the string form used for pointers.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Result of one page fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub entries: Vec<LogEntry>,
    /// Opaque pagination token; absent or empty means no more pages.
    pub cursor: Option<String>,
}

impl Page {
    pub fn new(entries: Vec<LogEntry>, cursor: Option<String>) -> Self {
        Self { entries, cursor }
    }

    pub fn last(entries: Vec<LogEntry>) -> Self {
        Self {
            entries,
            cursor: None,
        }
    }

    /// The cursor for the next fetch, if pagination should continue.
    pub fn next_cursor(&self) -> Option<&str> {
        self.cursor.as_deref().filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> LogEntry {
        LogEntry::from_value(value).unwrap()
    }

    #[test]
    fn test_nested_field_lookup() {
        let record = entry(json!({"actor": {"profile": {"email": "a@example.com"}}}));
        assert_eq!(
            record.get(&"actor.profile.email".into()),
            Some(&json!("a@example.com"))
        );
        assert_eq!(record.get(&"actor.missing".into()), None);
    }

    #[test]
    fn test_literal_dotted_key_wins() {
        let record = entry(json!({"event.time": 1, "event": {"time": 2}}));
        assert_eq!(record.get(&"event.time".into()), Some(&json!(1)));
    }

    #[test]
    fn test_non_object_record_rejected() {
        assert!(LogEntry::from_value(json!([1, 2])).is_err());
        assert!(LogEntry::parse_array(br#"[{"a":1}, 3]"#).is_err());
        assert_eq!(LogEntry::parse_array(br#"[{"a":1}]"#).unwrap().len(), 1);
    }

    #[test]
    fn test_annotate_adds_metadata() {
        let mut record = entry(json!({"id": 1}));
        record.annotate("okta", "default");
        assert_eq!(record.fields()[CONNECTOR_FIELD], json!("okta"));
        assert_eq!(record.fields()[OPERATION_FIELD], json!("default"));
    }

    #[test]
    fn test_empty_cursor_ends_pagination() {
        assert_eq!(Page::new(vec![], Some(String::new())).next_cursor(), None);
        assert_eq!(Page::new(vec![], None).next_cursor(), None);
        assert_eq!(Page::new(vec![], Some("0".into())).next_cursor(), Some("0"));
    }
}
