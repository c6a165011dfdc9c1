//! Values - Tagged scalar values stored in item fields
//!
//! Every plain field of a model has a `FieldKind`. Values assigned to an
//! item are coerced to that kind up front, so a typo like `"1O"` for an
//! integer field fails at assignment instead of inside the adapter.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Storage kind of a plain model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    Text,
    Binary,
    Date,
    Time,
    DateTime,
}

impl FieldKind {
    /// Get the string representation of the field kind
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Text => "text",
            FieldKind::Binary => "binary",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::DateTime => "datetime",
        }
    }

    /// Get all field kinds
    pub fn all() -> &'static [FieldKind] {
        &[
            FieldKind::Boolean,
            FieldKind::Integer,
            FieldKind::Float,
            FieldKind::Text,
            FieldKind::Binary,
            FieldKind::Date,
            FieldKind::Time,
            FieldKind::DateTime,
        ]
    }
}

impl FromStr for FieldKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boolean" | "bool" => Ok(FieldKind::Boolean),
            "integer" | "int" => Ok(FieldKind::Integer),
            "float" | "double" => Ok(FieldKind::Float),
            "text" | "string" | "str" => Ok(FieldKind::Text),
            "binary" | "bytes" => Ok(FieldKind::Binary),
            "date" => Ok(FieldKind::Date),
            "time" => Ok(FieldKind::Time),
            "datetime" | "timestamp" => Ok(FieldKind::DateTime),
            _ => Err(crate::Error::InvalidSchema(format!("Unknown field kind: {}", s))),
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scalar value held by an item field or a stored row.
///
/// Floats compare and hash by bit pattern so values can key merge groups
/// and deleter selectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
        }
    }

    /// Convert the value to the representation required by `kind`.
    ///
    /// `field` only feeds the error message.
    pub fn coerce(self, kind: FieldKind, field: &str) -> crate::Result<Value> {
        let invalid = |value: &Value| crate::Error::InvalidValue {
            field: field.to_string(),
            reason: format!("cannot convert {} {:?} to {}", value.type_name(), value, kind),
        };

        let coerced = match (kind, self) {
            (_, Value::Null) => Value::Null,
            (FieldKind::Boolean, Value::Bool(b)) => Value::Bool(b),
            (FieldKind::Boolean, Value::Int(i)) if i == 0 || i == 1 => Value::Bool(i == 1),
            (FieldKind::Boolean, Value::Text(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "t" => Value::Bool(true),
                "false" | "0" | "no" | "n" | "f" => Value::Bool(false),
                _ => return Err(invalid(&Value::Text(s))),
            },
            (FieldKind::Integer, Value::Int(i)) => Value::Int(i),
            (FieldKind::Integer, Value::Bool(b)) => Value::Int(i64::from(b)),
            (FieldKind::Integer, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => return Err(invalid(&Value::Text(s))),
            },
            (FieldKind::Float, Value::Float(x)) => Value::Float(x),
            (FieldKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (FieldKind::Float, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(x) => Value::Float(x),
                Err(_) => return Err(invalid(&Value::Text(s))),
            },
            (FieldKind::Text, Value::Text(s)) => Value::Text(s),
            (FieldKind::Text, Value::Int(i)) => Value::Text(i.to_string()),
            (FieldKind::Text, Value::Float(x)) => Value::Text(x.to_string()),
            (FieldKind::Text, Value::Bool(b)) => Value::Text(b.to_string()),
            (FieldKind::Binary, Value::Bytes(b)) => Value::Bytes(b),
            (FieldKind::Binary, Value::Text(s)) => Value::Bytes(s.into_bytes()),
            (FieldKind::Date, Value::Date(d)) => Value::Date(d),
            (FieldKind::Date, Value::DateTime(dt)) => Value::Date(dt.date()),
            (FieldKind::Date, Value::Text(s)) => match parse_date(&s) {
                Some(d) => Value::Date(d),
                None => return Err(invalid(&Value::Text(s))),
            },
            (FieldKind::Time, Value::Time(t)) => Value::Time(t),
            (FieldKind::Time, Value::Text(s)) => match parse_time(&s) {
                Some(t) => Value::Time(t),
                None => return Err(invalid(&Value::Text(s))),
            },
            (FieldKind::DateTime, Value::DateTime(dt)) => Value::DateTime(dt),
            (FieldKind::DateTime, Value::Date(d)) => Value::DateTime(d.and_time(NaiveTime::MIN)),
            (FieldKind::DateTime, Value::Text(s)) => match parse_datetime(&s) {
                Some(dt) => Value::DateTime(dt),
                None => return Err(invalid(&Value::Text(s))),
            },
            (_, other) => return Err(invalid(&other)),
        };
        Ok(coerced)
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(x) => x.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Time(t) => t.hash(state),
            Value::DateTime(dt) => dt.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::DateTime(dt) => write!(f, "{}", dt),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Time(t)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}
