// Copyright 2023 FedSQL Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::ser::{Serialize, Serializer};

use crate::data_type::ConcreteDataType;

/// A single cell of a row. `Null` is first-class and typeless.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Integer(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Binary(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The concrete type of this value; `None` for null.
    pub fn data_type(&self) -> Option<ConcreteDataType> {
        match self {
            Value::Null => None,
            Value::String(_) => Some(ConcreteDataType::String),
            Value::Integer(_) => Some(ConcreteDataType::Integer),
            Value::Long(_) => Some(ConcreteDataType::Long),
            Value::Double(_) => Some(ConcreteDataType::Double),
            Value::Boolean(_) => Some(ConcreteDataType::Boolean),
            Value::Date(_) => Some(ConcreteDataType::Date),
            Value::Timestamp(_) => Some(ConcreteDataType::Timestamp),
            Value::Binary(_) => Some(ConcreteDataType::Binary),
            Value::Json(_) => Some(ConcreteDataType::Json),
            Value::Array(_) => Some(ConcreteDataType::Array),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Total ordering used by ORDER BY and MIN/MAX. Null sorts first; values
    /// of incomparable types fall back to the ordering of their type names
    /// so the ordering stays total.
    pub fn compare(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Date(a), Timestamp(b)) => a.and_hms_opt(0, 0, 0).unwrap().cmp(b),
            (Timestamp(a), Date(b)) => a.cmp(&b.and_hms_opt(0, 0, 0).unwrap()),
            (Binary(a), Binary(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => {
                    let an = a.data_type().map(|t| t.name()).unwrap_or("");
                    let bn = b.data_type().map(|t| t.name()).unwrap_or("");
                    an.cmp(bn).then_with(|| format!("{a}").cmp(&format!("{b}")))
                }
            },
        }
    }

    /// Normalized hashable key for joins and grouping. `None` for null, so
    /// null keys never match anything, including other nulls.
    pub fn as_key(&self) -> Option<KeyValue> {
        match self {
            Value::Null => None,
            Value::Boolean(v) => Some(KeyValue::Boolean(*v)),
            Value::Integer(v) => Some(KeyValue::Long(*v as i64)),
            Value::Long(v) => Some(KeyValue::Long(*v)),
            Value::Double(v) => {
                // An integral double keys equal to the same integer so that
                // cross-source numeric keys join.
                if v.fract() == 0.0 && v.is_finite() && *v >= i64::MIN as f64 && *v <= i64::MAX as f64
                {
                    Some(KeyValue::Long(*v as i64))
                } else {
                    let bits = if *v == 0.0 { 0 } else { v.to_bits() };
                    Some(KeyValue::DoubleBits(bits))
                }
            }
            Value::String(v) => Some(KeyValue::String(v.clone())),
            Value::Date(v) => Some(KeyValue::Date(v.num_days_from_ce())),
            Value::Timestamp(v) => Some(KeyValue::Timestamp(v.and_utc().timestamp_micros())),
            Value::Binary(v) => Some(KeyValue::Binary(v.clone())),
            Value::Json(v) => Some(KeyValue::String(v.to_string())),
            Value::Array(v) => {
                let mut keys = Vec::with_capacity(v.len());
                for item in v {
                    keys.push(item.as_key()?);
                }
                Some(KeyValue::Array(keys))
            }
        }
    }
}

/// Hashable normalization of a [`Value`]. Integers and integral doubles
/// collapse onto the same key so equality matches the universal type
/// system, not the wire type a source happened to return.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Boolean(bool),
    Long(i64),
    DoubleBits(u64),
    String(String),
    Date(i32),
    Timestamp(i64),
    Binary(Vec<u8>),
    Array(Vec<KeyValue>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Binary(v) => write!(f, "0x{}", hex::encode(v)),
            Value::Json(v) => write!(f, "{v}"),
            Value::Array(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// Wire representation: dates/timestamps as strings, binary as hex.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::String(v) => serializer.serialize_str(v),
            Value::Integer(v) => serializer.serialize_i32(*v),
            Value::Long(v) => serializer.serialize_i64(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::Boolean(v) => serializer.serialize_bool(*v),
            Value::Date(v) => serializer.serialize_str(&v.to_string()),
            Value::Timestamp(v) => {
                serializer.serialize_str(&v.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            Value::Binary(v) => serializer.serialize_str(&hex::encode(v)),
            Value::Json(v) => v.serialize(serializer),
            Value::Array(v) => v.serialize(serializer),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(Ordering::Less, Value::Null.compare(&Value::Integer(i32::MIN)));
        assert_eq!(Ordering::Equal, Value::Null.compare(&Value::Null));
    }

    #[test]
    fn test_cross_numeric_compare() {
        assert_eq!(
            Ordering::Equal,
            Value::Integer(3).compare(&Value::Double(3.0))
        );
        assert_eq!(Ordering::Less, Value::Long(2).compare(&Value::Double(2.5)));
    }

    #[test]
    fn test_join_keys_normalize_numerics() {
        assert_eq!(Value::Integer(7).as_key(), Value::Long(7).as_key());
        assert_eq!(Value::Double(7.0).as_key(), Value::Long(7).as_key());
        assert_ne!(Value::Double(7.5).as_key(), Value::Long(7).as_key());
    }

    #[test]
    fn test_null_never_keys() {
        assert_eq!(None, Value::Null.as_key());
        assert_eq!(
            None,
            Value::Array(vec![Value::Integer(1), Value::Null]).as_key()
        );
    }

    #[test]
    fn test_wire_serialization() {
        let json = serde_json::to_string(&Value::Binary(vec![0xde, 0xad])).unwrap();
        assert_eq!("\"dead\"", json);
        let json = serde_json::to_string(&Value::Null).unwrap();
        assert_eq!("null", json);
    }
}
