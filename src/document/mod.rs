//! The document object model.
//!
//! A stored value is a tree of [`Bson`] nodes: scalars, arrays, and
//! insertion-ordered string-keyed [`Document`] maps. Any value carries a
//! total order (type rank first, natural order within a type, numbers
//! compared across Int64/Double) so that any value can serve as an index
//! key. At the collection boundary a document must carry a non-null `Id`
//! field; [`Entity`] is the document with that identity split out.

pub mod codec;

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// Name of the mandatory identity field on stored documents.
pub const ID_FIELD: &str = "Id";

/// A single value in the document model.
#[derive(Debug, Clone)]
pub enum Bson {
    /// Absent/nil value.
    Null,
    /// Boolean.
    Boolean(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// IEEE 754 double.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Raw byte payload.
    Binary(Vec<u8>),
    /// Instant as milliseconds since the Unix epoch.
    DateTime(i64),
    /// Ordered sequence of values.
    Array(Vec<Bson>),
    /// Nested document.
    Document(Document),
}

impl Bson {
    /// Human-readable name of this value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Bson::Null => "null",
            Bson::Boolean(_) => "boolean",
            Bson::Int64(_) => "int64",
            Bson::Double(_) => "double",
            Bson::String(_) => "string",
            Bson::Binary(_) => "binary",
            Bson::DateTime(_) => "datetime",
            Bson::Array(_) => "array",
            Bson::Document(_) => "document",
        }
    }

    /// True for [`Bson::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Bson::Null)
    }

    /// The boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer value, if this is an Int64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// The numeric value as a double, for Int64 and Double alike.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Int64(i) => Some(*i as f64),
            Bson::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// The string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    /// The raw bytes, if this is a binary value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Bson::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Milliseconds since the Unix epoch, if this is a datetime.
    pub fn as_datetime(&self) -> Option<i64> {
        match self {
            Bson::DateTime(ms) => Some(*ms),
            _ => None,
        }
    }

    /// The elements, if this is an array.
    pub fn as_array(&self) -> Option<&[Bson]> {
        match self {
            Bson::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The nested document, if this is a document.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Converts to a JSON value for diagnostics and interop.
    ///
    /// Binary renders as `{"$binary": "<hex>"}` and DateTime as
    /// `{"$date": <ms>}`; everything else maps to its JSON counterpart.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Bson::Null => Value::Null,
            Bson::Boolean(b) => Value::Bool(*b),
            Bson::Int64(i) => Value::Number((*i).into()),
            Bson::Double(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(d.to_string())),
            Bson::String(s) => Value::String(s.clone()),
            Bson::Binary(bytes) => {
                let mut map = serde_json::Map::new();
                map.insert("$binary".to_string(), Value::String(to_hex(bytes)));
                Value::Object(map)
            }
            Bson::DateTime(ms) => {
                let mut map = serde_json::Map::new();
                map.insert("$date".to_string(), Value::Number((*ms).into()));
                Value::Object(map)
            }
            Bson::Array(items) => Value::Array(items.iter().map(Bson::to_json).collect()),
            Bson::Document(doc) => doc.to_json(),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Bson::Null => 0,
            Bson::Boolean(_) => 1,
            Bson::Int64(_) | Bson::Double(_) => 2,
            Bson::String(_) => 3,
            Bson::Binary(_) => 4,
            Bson::DateTime(_) => 5,
            Bson::Array(_) => 6,
            Bson::Document(_) => 7,
        }
    }
}

impl Ord for Bson {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Bson::Null, Bson::Null) => Ordering::Equal,
            (Bson::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
            (Bson::Int64(a), Bson::Int64(b)) => a.cmp(b),
            (Bson::Double(a), Bson::Double(b)) => a.total_cmp(b),
            (Bson::Int64(a), Bson::Double(b)) => (*a as f64).total_cmp(b),
            (Bson::Double(a), Bson::Int64(b)) => a.total_cmp(&(*b as f64)),
            (Bson::String(a), Bson::String(b)) => a.cmp(b),
            (Bson::Binary(a), Bson::Binary(b)) => a.cmp(b),
            (Bson::DateTime(a), Bson::DateTime(b)) => a.cmp(b),
            (Bson::Array(a), Bson::Array(b)) => a.cmp(b),
            (Bson::Document(a), Bson::Document(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Bson {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Bson {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Bson {}

impl fmt::Display for Bson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Bson {
    fn from(value: bool) -> Self {
        Bson::Boolean(value)
    }
}

impl From<i32> for Bson {
    fn from(value: i32) -> Self {
        Bson::Int64(value as i64)
    }
}

impl From<i64> for Bson {
    fn from(value: i64) -> Self {
        Bson::Int64(value)
    }
}

impl From<f64> for Bson {
    fn from(value: f64) -> Self {
        Bson::Double(value)
    }
}

impl From<&str> for Bson {
    fn from(value: &str) -> Self {
        Bson::String(value.to_string())
    }
}

impl From<String> for Bson {
    fn from(value: String) -> Self {
        Bson::String(value)
    }
}

impl From<Vec<u8>> for Bson {
    fn from(value: Vec<u8>) -> Self {
        Bson::Binary(value)
    }
}

impl From<Vec<Bson>> for Bson {
    fn from(value: Vec<Bson>) -> Self {
        Bson::Array(value)
    }
}

impl From<Document> for Bson {
    fn from(value: Document) -> Self {
        Bson::Document(value)
    }
}

impl From<serde_json::Value> for Bson {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Bson::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    Bson::Double(f)
                } else {
                    Bson::Null
                }
            }
            Value::String(s) => Bson::String(s),
            Value::Array(items) => Bson::Array(items.into_iter().map(Bson::from).collect()),
            Value::Object(map) => {
                let mut doc = Document::new();
                for (k, v) in map {
                    doc.set(k, Bson::from(v));
                }
                Bson::Document(doc)
            }
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// An insertion-ordered string-key to [`Bson`] mapping.
///
/// Setting an existing key replaces its value in place; new keys append.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Document {
    fields: Vec<(String, Bson)>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The value under `key`, if present.
    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Resolves a dotted path (`"address.city"`) through nested documents.
    pub fn get_path(&self, path: &str) -> Option<&Bson> {
        let mut doc = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let value = doc.get(segment)?;
            if segments.peek().is_none() {
                return Some(value);
            }
            doc = value.as_document()?;
        }
        None
    }

    /// True when `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets `key` to `value`, replacing in place or appending.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        let index = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(index).1)
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Converts to a JSON object for diagnostics and interop.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
        )
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = std::vec::IntoIter<(String, Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl FromIterator<(String, Bson)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Bson)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.set(k, v);
        }
        doc
    }
}

/// A stored document with its identity split out of the field list.
///
/// Construction validates the `Id` field; serialization re-inserts it as
/// the first element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    id: Bson,
    body: Document,
}

impl Entity {
    /// Extracts the identity from a document.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the `Id` field is missing or Null.
    pub fn new(mut document: Document) -> Result<Self> {
        match document.remove(ID_FIELD) {
            None => Err(Error::invalid_argument("document has no Id field")),
            Some(Bson::Null) => Err(Error::invalid_argument("document Id must not be null")),
            Some(id) => Ok(Self { id, body: document }),
        }
    }

    /// The identity value.
    pub fn id(&self) -> &Bson {
        &self.id
    }

    /// The document body, identity excluded.
    pub fn body(&self) -> &Document {
        &self.body
    }

    /// Mutable access to the body.
    pub fn body_mut(&mut self) -> &mut Document {
        &mut self.body
    }

    /// Field lookup covering the identity and the body.
    pub fn get(&self, key: &str) -> Option<&Bson> {
        if key == ID_FIELD {
            Some(&self.id)
        } else {
            self.body.get(key)
        }
    }

    /// Dotted-path lookup covering the identity and the body.
    pub fn get_path(&self, path: &str) -> Option<&Bson> {
        if path == ID_FIELD {
            Some(&self.id)
        } else {
            self.body.get_path(path)
        }
    }

    /// Rebuilds the full document, `Id` first.
    pub fn into_document(self) -> Document {
        let mut doc = Document::new();
        doc.set(ID_FIELD, self.id);
        for (key, value) in self.body {
            doc.set(key, value);
        }
        doc
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.id, self.body)
    }
}
