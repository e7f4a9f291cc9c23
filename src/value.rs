//! Runtime values produced and consumed by the embedded language

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A runtime template value. This is very similar to a JSON value, except
/// numbers are split into integers and floats rather than one unified numeric
/// type.
#[derive(Clone, Debug, derive_more::From, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    #[from(skip)] // Generic impl below covers this
    Array(Vec<Self>),
    Object(IndexMap<String, Self>),
}

impl Value {
    /// Convert this value to a boolean according to its truthiness.
    /// Truthiness is defined for each type as:
    /// - `null` - `false`
    /// - `bool` - own value
    /// - `integer`/`float` - `false` if zero
    /// - `string` - `false` if empty
    /// - `array`/`object` - `false` if empty
    ///
    /// These rules mirror the embedded language's source (Python truthiness).
    pub fn to_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Array(array) => !array.is_empty(),
            Self::Object(object) => !object.is_empty(),
        }
    }

    /// Name of this value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Convert this value to a JSON number if it is numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Length of this value, for the `len()` builtin. Returns `None` for
    /// scalar types that have no natural length; not a container API, so
    /// there's no matching `is_empty`.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(s) => Some(s.chars().count()),
            Self::Array(array) => Some(array.len()),
            Self::Object(object) => Some(object.len()),
            Self::Null | Self::Boolean(_) | Self::Integer(_) | Self::Float(_) => {
                None
            }
        }
    }
}

/// Stringify a value the way the embedded language would when concatenating
/// it into yielded output (`str()` semantics, not `repr()`)
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "None"),
            Self::Boolean(true) => write!(f, "True"),
            Self::Boolean(false) => write!(f, "False"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Array(array) => {
                write!(f, "[")?;
                for (i, value) in array.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ReprValue(value))?;
                }
                write!(f, "]")
            }
            Self::Object(object) => {
                write!(f, "{{")?;
                for (i, (key, value)) in object.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key:?}: {}", ReprValue(value))?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Wrapper that stringifies a [Value] using Python-`repr`-like quoting for
/// strings, used when nesting values inside a displayed array/object
struct ReprValue<'a>(&'a Value);

impl Display for ReprValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::String(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Integer(value as i64)
    }
}

impl<T> From<Vec<T>> for Value
where
    Value: From<T>,
{
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Self::from).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(array) => {
                Self::Array(array.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(object) => Self::Object(
                object.into_iter().map(|(k, v)| (k, Self::from(v))).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::null(Value::Null, false)]
    #[case::bool_true(Value::Boolean(true), true)]
    #[case::bool_false(Value::Boolean(false), false)]
    #[case::int_zero(Value::Integer(0), false)]
    #[case::int_nonzero(Value::Integer(-1), true)]
    #[case::float_zero(Value::Float(0.0), false)]
    #[case::string_empty(Value::String(String::new()), false)]
    #[case::string_nonempty("a".into(), true)]
    #[case::array_empty(Value::Array(vec![]), false)]
    #[case::array_nonempty(vec![1].into(), true)]
    fn test_to_bool(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(value.to_bool(), expected);
    }

    #[rstest]
    #[case::null(Value::Null, "None")]
    #[case::bool_true(Value::Boolean(true), "True")]
    #[case::int(Value::Integer(3), "3")]
    #[case::string("hi".into(), "hi")]
    #[case::array(vec![1, 2].into(), "[1, 2]")]
    fn test_display(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(value.to_string(), expected);
    }
}
