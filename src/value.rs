//! Tagged value tree
//!
//! Every converted spreadsheet cell becomes a [`Cell`]: the converted [`Value`]
//! plus its provenance (raw text, location, resolved type). Processors build
//! [`Object`]s and [`Array`]s out of cells; the stringify engine walks the tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::schema::Location;

/// Default fixed precision for non-integral numbers
pub const DEFAULT_PRECISION: usize = 10;

// =============================================================================
// Tags
// =============================================================================

/// Metadata attached to cells, objects and arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags {
    /// Object is an enumeration with this name (member values are the enum values)
    pub enum_name: Option<String>,
    /// Human comment, emitted by formats that support comments
    pub comment: Option<String>,
    /// Member keys omitted from serialization
    pub ignore: BTreeSet<String>,
}

impl Tags {
    pub fn is_empty(&self) -> bool {
        self.enum_name.is_none() && self.comment.is_none() && self.ignore.is_empty()
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Self {
            enum_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn commented(comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..Default::default()
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A node of the value tree
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Cell(Box<Cell>),
    Object(Object),
    Array(Array),
}

impl Value {
    /// Strip any number of cell wrappers
    pub fn unwrapped(&self) -> &Value {
        match self {
            Value::Cell(cell) => cell.value.unwrapped(),
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.unwrapped(), Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.unwrapped() {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.unwrapped() {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unwrapped() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self.unwrapped() {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self.unwrapped() {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Strings and numbers are leaves for indexing purposes
    pub fn is_leaf(&self) -> bool {
        matches!(self.unwrapped(), Value::String(_) | Value::Number(_))
    }

    /// Canonical lookup key: numbers and numeric-looking strings share one form, so
    /// `"2"` and `2` produce the same key. Only strings and numbers have keys.
    pub fn index_key(&self) -> Option<String> {
        match self.unwrapped() {
            Value::Number(n) => Some(number_key(*n)),
            Value::String(s) => Some(canonical_key(s)),
            _ => None,
        }
    }

    /// Equality with string/number cross-coercion
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.index_key(), other.index_key()) {
            (Some(a), Some(b)) => a == b,
            _ => self.unwrapped() == other.unwrapped(),
        }
    }

    /// Short name of the runtime shape, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Cell(_) => "cell",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }

    /// Convert to plain JSON, dropping cell provenance and tags
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Cell(cell) => cell.value.to_json(),
            Value::Object(o) => serde_json::Value::Object(
                o.members
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Array(a) => serde_json::Value::Array(a.items.iter().map(Value::to_json).collect()),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(Array::new(items.iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => Value::Object(Object::from_members(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))),
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n, DEFAULT_PRECISION)),
            Value::String(s) => write!(f, "{}", s),
            Value::Cell(cell) => write!(f, "{}", cell.value),
            Value::Object(_) | Value::Array(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Cell> for Value {
    fn from(cell: Cell) -> Self {
        Value::Cell(Box::new(cell))
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

// =============================================================================
// Cell
// =============================================================================

/// A converted value with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Converted value (the raw string until body conversion runs)
    pub value: Value,
    /// Original text as read from the sheet
    pub raw: String,
    /// Where the cell came from
    pub location: Location,
    /// Declared type the value was converted to
    pub type_name: Option<String>,
    /// Serialization hook tag, looked up in the stringify hook table
    pub hook: Option<String>,
    pub tags: Tags,
}

impl Cell {
    /// An unconverted cell holding its raw text
    pub fn raw(raw: impl Into<String>, location: Location) -> Self {
        let raw = raw.into();
        Self {
            value: Value::String(raw.clone()),
            raw,
            location,
            type_name: None,
            hook: None,
            tags: Tags::default(),
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

// =============================================================================
// Object / Array
// =============================================================================

/// Key/value mapping; member order on output is decided by the stringify engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object {
    pub members: BTreeMap<String, Value>,
    pub tags: Tags,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members(members: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            members: members.into_iter().collect(),
            tags: Tags::default(),
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.members.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.members.get(key)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Ordered sequence of values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Array {
    pub items: Vec<Value>,
    pub tags: Tags,
}

impl Array {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            tags: Tags::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Numbers
// =============================================================================

/// Integral values without a decimal point; others at fixed precision with
/// trailing zeros trimmed.
pub fn format_number(n: f64, precision: usize) -> String {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return format!("{}", n as i64);
    }
    if n.fract() == 0.0 {
        return format!("{:.0}", n);
    }
    let mut text = format!("{:.*}", precision, n);
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

/// Exact key text of a number: the shortest form that parses back to the same
/// value, so `2.0` and `2` share a key but near-equal floats never do.
pub fn number_key(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    format!("{}", n)
}

/// Numeric-looking strings collapse to their number form
fn canonical_key(s: &str) -> String {
    match parse_number(s) {
        Some(n) => number_key(n),
        None => s.to_string(),
    }
}

/// Parse a finite number, rejecting things like `inf` and `NaN` that `f64`
/// accepts but a spreadsheet author never means as numbers.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() || !t.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+' || c == '.') {
        return None;
    }
    t.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0, 10), "3");
        assert_eq!(format_number(-12.0, 10), "-12");
        assert_eq!(format_number(0.1 + 0.2, 10), "0.3");
        assert_eq!(format_number(1.5, 10), "1.5");
        assert_eq!(format_number(2.126, 2), "2.13");
        assert_eq!(format_number(-0.00000000001, 10), "0");
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::from("2").loose_eq(&Value::from(2i64)));
        assert!(Value::from("2.0").loose_eq(&Value::from(2i64)));
        assert!(!Value::from("b").loose_eq(&Value::from("a")));
        assert!(Value::Null.loose_eq(&Value::Null));
    }

    #[test]
    fn test_index_keys_keep_full_precision() {
        assert_eq!(Value::from(2.0).index_key().as_deref(), Some("2"));
        assert_eq!(Value::from("2.0").index_key().as_deref(), Some("2"));
        assert_eq!(Value::from(-0.0).index_key().as_deref(), Some("0"));
        assert_eq!(Value::from(1.00000000001).index_key().as_deref(), Some("1.00000000001"));
        assert!(!Value::from(1.00000000001).loose_eq(&Value::from(1.00000000002)));
        assert!(Value::from("1.00000000001").loose_eq(&Value::from(1.00000000001)));
    }

    #[test]
    fn test_parse_number_rejects_words() {
        assert_eq!(parse_number("12"), Some(12.0));
        assert_eq!(parse_number(" -1.5 "), Some(-1.5));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": [1, 2.5, "x"], "b": null});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }
}
