//! Dynamic SQL values.
//!
//! `Value` is the unit of data exchanged with the store and held in
//! [`Row`](crate::row::Row)s and record attribute maps. It implements `Eq`
//! and `Hash` (doubles hash by bit pattern) because preload grouping and
//! row reconstruction key hash maps by primary-key and foreign-key values.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A dynamically typed SQL value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit signed integer
    BigInt(i64),
    /// 64-bit floating point
    Double(f64),
    /// Text string
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
}

impl Value {
    /// Human-readable name of the contained type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Check if the value is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as a bool, if the value is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as an i64, widening from narrower integers.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as an f64, converting from integers.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as a string slice, if the value is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Convert from a JSON value, mapping numbers to the narrowest SQL type.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::BigInt(i)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            // Integer widths compare by numeric value so a key read back as
            // BigInt still matches the Int it was written as.
            (Value::Int(a), Value::BigInt(b)) | (Value::BigInt(b), Value::Int(a)) => {
                i64::from(*a) == *b
            }
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            // Int hashes through i64 to stay consistent with PartialEq.
            Value::Int(v) => {
                2u8.hash(state);
                i64::from(*v).hash(state);
            }
            Value::BigInt(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Value::Double(v) => {
                3u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Text(v) => {
                4u8.hash(state);
                v.hash(state);
            }
            Value::Bytes(v) => {
                5u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn int_and_bigint_compare_and_hash_alike() {
        assert_eq!(Value::Int(7), Value::BigInt(7));

        let mut map: HashMap<Value, &str> = HashMap::new();
        map.insert(Value::Int(7), "seven");
        assert_eq!(map.get(&Value::BigInt(7)), Some(&"seven"));
    }

    #[test]
    fn option_conversion_maps_none_to_null() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(3_i64)), Value::BigInt(3));
    }

    #[test]
    fn json_round_trip_for_common_shapes() {
        assert_eq!(Value::from_json(&serde_json::json!(null)), Value::Null);
        assert_eq!(Value::from_json(&serde_json::json!(true)), Value::Bool(true));
        assert_eq!(Value::from_json(&serde_json::json!(42)), Value::BigInt(42));
        assert_eq!(
            Value::from_json(&serde_json::json!("hi")),
            Value::Text("hi".to_string())
        );
    }

    #[test]
    fn accessors_reject_wrong_types() {
        assert_eq!(Value::Text("x".to_string()).as_i64(), None);
        assert_eq!(Value::Int(1).as_str(), None);
        assert_eq!(Value::BigInt(5).as_i64(), Some(5));
    }
}
