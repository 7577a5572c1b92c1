use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::RecordId;

/// Kind of a declared field.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Int,
    /// Reference to another record.
    Id,
}

impl ValueKind {
    /// Stable one-byte tag used on disk.
    pub const fn tag(self) -> u8 {
        match self {
            ValueKind::String => 1,
            ValueKind::Int => 2,
            ValueKind::Id => 3,
        }
    }

    /// Inverse of [`ValueKind::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ValueKind::String),
            2 => Some(ValueKind::Int),
            3 => Some(ValueKind::Id),
            _ => None,
        }
    }

    /// Lower-case name used in configuration and reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Int => "int",
            ValueKind::Id => "id",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed field value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// Owned string.
    Str(String),
    /// 64-bit signed integer.
    Int(i64),
    /// Record identifier.
    Id(RecordId),
}

impl Value {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::String,
            Value::Int(_) => ValueKind::Int,
            Value::Id(_) => ValueKind::Id,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Parses `text` as a value of `kind`; used by the CLI.
    pub fn parse(kind: ValueKind, text: &str) -> Option<Value> {
        match kind {
            ValueKind::String => Some(Value::Str(text.to_owned())),
            ValueKind::Int => text.parse().ok().map(Value::Int),
            ValueKind::Id => text.parse().ok().map(|id| Value::Id(RecordId(id))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Id(v) => write!(f, "#{v}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<RecordId> for Value {
    fn from(value: RecordId) -> Self {
        Value::Id(value)
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Str(v) => serializer.serialize_str(v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Id(v) => serializer.serialize_u64(v.0),
        }
    }
}

/// Field map of a record, ordered by field name.
pub type Fields = BTreeMap<String, Value>;

/// Immutable snapshot of a stored record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Primary identifier.
    #[serde(serialize_with = "serialize_record_id")]
    pub id: RecordId,
    /// Record type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Field values present on the record.
    pub fields: Fields,
}

impl Record {
    /// Returns the value of `field`, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

fn serialize_record_id<S: serde::Serializer>(id: &RecordId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(id.0)
}

/// Builds a field map from `(name, value)` pairs.
pub fn fields<I, K, V>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
