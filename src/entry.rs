use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One timestamped log record.
///
/// Entries are schema-free JSON objects. The only field the pipeline reads
/// is `ms`, the producer-assigned milliseconds since the Unix epoch; every
/// other field is passed through verbatim. On disk an entry is one JSON
/// document per line.
///
/// # Examples
///
/// ```
/// use logship::Entry;
/// use serde_json::json;
///
/// let entry = Entry::from_value(json!({"ms": 1500, "v": "a"})).unwrap();
/// assert_eq!(entry.ms(), Some(1500));
/// assert_eq!(entry.to_line().unwrap(), r#"{"ms":1500,"v":"a"}"#);
///
/// // Not an object
/// assert!(Entry::from_value(json!([1, 2])).is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entry(Map<String, Value>);

impl Entry {
    /// Wrap an already-built field map.
    pub fn new(fields: Map<String, Value>) -> Self {
        Entry(fields)
    }

    /// Accept `value` if it is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Entry(fields)),
            _ => None,
        }
    }

    /// Parse one line of JSON. Returns `None` for anything that is not a
    /// JSON object, including blank and truncated lines.
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str::<Value>(line)
            .ok()
            .and_then(Entry::from_value)
    }

    /// The `ms` field, if present and numeric.
    ///
    /// Fractional values are truncated toward zero.
    pub fn ms(&self) -> Option<i64> {
        let Value::Number(n) = self.0.get("ms")? else {
            return None;
        };
        n.as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Serialize as a single line, without the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }
}

impl From<Entry> for Value {
    fn from(entry: Entry) -> Self {
        entry.into_value()
    }
}
