//! Column types and runtime values.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Declared type of a column.
///
/// Serialized as the SQL-ish spelling (`"varchar(20)"`, `"serial"`), which is
/// what scripts and inspection output use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    BigInt,
    /// 64-bit integer fed by a per-column sequence.
    Serial,
    /// Double precision float.
    Float,
    /// Boolean.
    Boolean,
    /// Unbounded text.
    Text,
    /// Text with a maximum length in characters.
    Varchar(u32),
    /// Text blank-padded to an exact length in characters.
    Char(u32),
}

impl DataType {
    /// Length bound in characters, if the type carries one.
    pub fn length_bound(&self) -> Option<u32> {
        match self {
            DataType::Varchar(n) | DataType::Char(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether stored values of `self` and `other` compare equal exactly when
    /// they denote the same key, so one can reference the other.
    ///
    /// `char(n)` values are blank-padded, so they only match the same width.
    pub fn key_comparable(&self, other: &DataType) -> bool {
        use DataType::*;
        match (self, other) {
            (Integer | BigInt | Serial, Integer | BigInt | Serial) => true,
            (Text | Varchar(_), Text | Varchar(_)) => true,
            (Char(a), Char(b)) => a == b,
            (Float, Float) | (Boolean, Boolean) => true,
            _ => false,
        }
    }

    /// Whether this type is fed by a sequence when no value is supplied.
    pub fn is_serial(&self) -> bool {
        matches!(self, DataType::Serial)
    }

    /// Check `value` against this type and convert it to the stored form.
    ///
    /// NULL passes through untouched; nullability is the constraint engine's
    /// business, not the type's.
    pub fn coerce(&self, column: &str, value: Value) -> Result<Value> {
        let mismatch = |value: &Value| Error::TypeMismatch {
            column: column.to_string(),
            expected: *self,
            found: value.type_name().to_string(),
        };

        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::Integer, Value::Int(i)) => {
                if i32::try_from(i).is_ok() {
                    Ok(Value::Int(i))
                } else {
                    Err(Error::TypeMismatch {
                        column: column.to_string(),
                        expected: *self,
                        found: "integer out of range".to_string(),
                    })
                }
            }
            (DataType::BigInt | DataType::Serial, Value::Int(i)) => Ok(Value::Int(i)),
            (DataType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (DataType::Float, Value::Float(f)) => Ok(Value::Float(f)),
            (DataType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (DataType::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (DataType::Varchar(max), Value::Text(s)) => {
                if s.chars().count() > *max as usize {
                    return Err(Error::ValueTooLong {
                        column: column.to_string(),
                        max: *max,
                    });
                }
                Ok(Value::Text(s))
            }
            (DataType::Char(len), Value::Text(s)) => {
                let count = s.chars().count();
                if count > *len as usize {
                    return Err(Error::ValueTooLong {
                        column: column.to_string(),
                        max: *len,
                    });
                }
                let mut padded = s;
                padded.extend(std::iter::repeat(' ').take(*len as usize - count));
                Ok(Value::Text(padded))
            }
            (_, other) => Err(mismatch(&other)),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "integer"),
            DataType::BigInt => write!(f, "bigint"),
            DataType::Serial => write!(f, "serial"),
            DataType::Float => write!(f, "float"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Text => write!(f, "text"),
            DataType::Varchar(n) => write!(f, "varchar({})", n),
            DataType::Char(n) => write!(f, "char({})", n),
        }
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        let (base, length) = match lowered.split_once('(') {
            Some((base, rest)) => {
                let digits = rest.strip_suffix(')').ok_or_else(|| {
                    Error::InvalidDefinition(format!("malformed type: {}", s))
                })?;
                let length: u32 = digits.trim().parse().map_err(|_| {
                    Error::InvalidDefinition(format!("invalid length in type: {}", s))
                })?;
                if length == 0 {
                    return Err(Error::InvalidDefinition(format!(
                        "length for type {} must be at least 1",
                        base.trim()
                    )));
                }
                (base.trim().to_string(), Some(length))
            }
            None => (lowered, None),
        };

        match (base.as_str(), length) {
            ("integer" | "int" | "int4", None) => Ok(DataType::Integer),
            ("bigint" | "int8", None) => Ok(DataType::BigInt),
            ("serial" | "bigserial", None) => Ok(DataType::Serial),
            ("float" | "double" | "real" | "float8", None) => Ok(DataType::Float),
            ("boolean" | "bool", None) => Ok(DataType::Boolean),
            ("text", None) => Ok(DataType::Text),
            ("varchar" | "character varying", Some(n)) => Ok(DataType::Varchar(n)),
            ("char" | "character", Some(n)) => Ok(DataType::Char(n)),
            ("char" | "character", None) => Ok(DataType::Char(1)),
            _ => Err(Error::InvalidDefinition(format!("unknown type: {}", s))),
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

/// A single stored or supplied value.
///
/// Equality and hashing are total (floats compare by canonical bit pattern)
/// so values can key the uniqueness indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
}

impl Value {
    /// Convenience constructor for text values.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Whether this is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's runtime type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    /// SQL comparison: `None` when either side is NULL or the kinds are not
    /// comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn float_bits(f: f64) -> u64 {
        // -0.0 and 0.0 are the same key.
        if f == 0.0 {
            0
        } else {
            f.to_bits()
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => Self::float_bits(*a) == Self::float_bits(*b),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => Self::float_bits(*f).hash(state),
            Value::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Render a composite key as `(a, b)` or a bare value for single columns.
pub(crate) fn format_key(values: &[Value]) -> String {
    if values.len() == 1 {
        values[0].to_string()
    } else {
        let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        format!("({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_types() {
        assert_eq!("varchar(20)".parse::<DataType>().unwrap(), DataType::Varchar(20));
        assert_eq!("CHAR(3)".parse::<DataType>().unwrap(), DataType::Char(3));
        assert_eq!("int".parse::<DataType>().unwrap(), DataType::Integer);
        assert_eq!("serial".parse::<DataType>().unwrap(), DataType::Serial);
        assert!("varchar(0)".parse::<DataType>().is_err());
        assert!("blob".parse::<DataType>().is_err());
        assert!("varchar(x)".parse::<DataType>().is_err());
    }

    #[test]
    fn test_varchar_length_bound() {
        let ty = DataType::Varchar(5);
        assert_eq!(ty.coerce("name", Value::text("abcde")).unwrap(), Value::text("abcde"));
        assert!(matches!(
            ty.coerce("name", Value::text("abcdef")),
            Err(Error::ValueTooLong { max: 5, .. })
        ));
    }

    #[test]
    fn test_char_pads() {
        let ty = DataType::Char(4);
        assert_eq!(ty.coerce("code", Value::text("ab")).unwrap(), Value::text("ab  "));
    }

    #[test]
    fn test_integer_range_and_widening() {
        assert!(DataType::Integer.coerce("n", Value::Int(i64::MAX)).is_err());
        assert_eq!(
            DataType::Float.coerce("n", Value::Int(3)).unwrap(),
            Value::Float(3.0)
        );
        assert!(matches!(
            DataType::Integer.coerce("n", Value::text("3")),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_null_passes_any_type() {
        assert_eq!(DataType::Boolean.coerce("b", Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_value_compare_sql_semantics() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::text("a").compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_value_json_shape() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(3),
                Value::Float(2.5),
                Value::text("x")
            ]
        );
    }

    #[test]
    fn test_key_comparable() {
        assert!(DataType::Integer.key_comparable(&DataType::Serial));
        assert!(DataType::Varchar(3).key_comparable(&DataType::Text));
        assert!(DataType::Char(3).key_comparable(&DataType::Char(3)));
        assert!(!DataType::Char(3).key_comparable(&DataType::Varchar(3)));
        assert!(!DataType::Char(3).key_comparable(&DataType::Char(4)));
        assert!(!DataType::Float.key_comparable(&DataType::Integer));
        assert!(!DataType::Text.key_comparable(&DataType::Integer));
    }
}
