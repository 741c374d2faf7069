//! Property slot values.

use crate::entity::EntityId;
use crate::schema::TypeCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The content of one property slot.
///
/// In an unwired [`EntityValue`](crate::EntityValue) a `Reference` holds the
/// raw id of its target; once wired it is guaranteed to name an entity that
/// was present in the store when the slot was written. The target's type is
/// given by the property, so only the id is carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    Null,
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit float.
    Float32(f32),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    String(String),
    /// Byte sequence.
    Bytes(Vec<u8>),
    /// Id of a referenced entity.
    Reference(EntityId),
}

impl Value {
    /// Returns the matching type code, or `None` for `Null`.
    pub fn type_code(&self) -> Option<TypeCode> {
        match self {
            Value::Null => None,
            Value::Int32(_) => Some(TypeCode::Int32),
            Value::Int64(_) => Some(TypeCode::Int64),
            Value::Float32(_) => Some(TypeCode::Float32),
            Value::Float64(_) => Some(TypeCode::Float64),
            Value::String(_) => Some(TypeCode::String),
            Value::Bytes(_) => Some(TypeCode::Bytes),
            Value::Reference(_) => Some(TypeCode::Reference),
        }
    }

    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the referenced id, if this is a reference.
    pub fn as_reference(&self) -> Option<EntityId> {
        match self {
            Value::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(n) => Some(i64::from(*n)),
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Value equivalence used for diffing: `Null` equals `Null`, bytes compare
    /// by content, floats by bit pattern (so a `NaN` slot is unchanged), and
    /// everything else by value equality.
    pub fn equivalent(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int32(n) => write!(f, "{n}"),
            Value::Int64(n) => write!(f, "{n}"),
            Value::Float32(n) => write!(f, "{n}"),
            Value::Float64(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Reference(id) => write!(f, "->{id}"),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int32(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int64(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Float32(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float64(n)
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

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Reference(id)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalence() {
        assert!(Value::Null.equivalent(&Value::Null));
        assert!(Value::Bytes(vec![1, 2]).equivalent(&Value::Bytes(vec![1, 2])));
        assert!(!Value::Bytes(vec![1, 2]).equivalent(&Value::Bytes(vec![2, 1])));
        assert!(!Value::Int32(1).equivalent(&Value::Int64(1)));
        assert!(!Value::Null.equivalent(&Value::String(String::new())));
        assert!(Value::Float64(f64::NAN).equivalent(&Value::Float64(f64::NAN)));
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from("x"), Value::String("x".into()));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(3i64)).as_i64(), Some(3));
        let id = EntityId::new(4).unwrap();
        assert_eq!(Value::from(id).as_reference(), Some(id));
        assert_eq!(Value::Float64(1.5).type_code(), Some(TypeCode::Float64));
        assert_eq!(Value::Null.type_code(), None);
    }
}
