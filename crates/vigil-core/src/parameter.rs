//! Named, typed parameters exposed for remote inspection and editing.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Type hint attached to a parameter on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// Byte array, carried as base64 text.
    ByteArray,
    /// A floating point number.
    Float64,
    /// An array of floating point numbers.
    Float64Array,
}

/// A parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
    /// A number.
    Number(f64),
    /// A boolean.
    Bool(bool),
    /// Text.
    String(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// An ordered list of values.
    Array(Vec<ParameterValue>),
    /// A nested mapping.
    Dict(BTreeMap<String, ParameterValue>),
}

/// A parameter. A missing value means "unset"; sending one in `set` deletes it.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    /// Unique key.
    pub name: String,
    /// Optional type hint.
    pub r#type: Option<ParameterType>,
    /// Current value, if any.
    pub value: Option<ParameterValue>,
}

impl Parameter {
    /// A parameter with no value.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            r#type: None,
            value: None,
        }
    }

    /// A `float64` parameter.
    pub fn float64(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            r#type: Some(ParameterType::Float64),
            value: Some(ParameterValue::Number(value)),
        }
    }

    /// A `float64_array` parameter.
    pub fn float64_array(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            name: name.into(),
            r#type: Some(ParameterType::Float64Array),
            value: Some(ParameterValue::Array(
                values.into_iter().map(ParameterValue::Number).collect(),
            )),
        }
    }

    /// A `byte_array` parameter.
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            r#type: Some(ParameterType::ByteArray),
            value: Some(ParameterValue::Bytes(data.into())),
        }
    }

    /// An untyped parameter holding `value`.
    pub fn with_value(name: impl Into<String>, value: ParameterValue) -> Self {
        Self {
            name: name.into(),
            r#type: None,
            value: Some(value),
        }
    }

    /// A boolean parameter.
    pub fn bool(name: impl Into<String>, value: bool) -> Self {
        Self::with_value(name, ParameterValue::Bool(value))
    }

    /// A string parameter.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_value(name, ParameterValue::String(value.into()))
    }

    /// Whether this entry carries no value (a deletion when sent in `set`).
    pub fn is_unset(&self) -> bool {
        self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_unset() {
        assert!(Parameter::empty("x").is_unset());
        assert!(!Parameter::float64("x", 1.0).is_unset());
    }

    #[test]
    fn float64_array_wraps_numbers() {
        let p = Parameter::float64_array("v", [1.0, 2.5]);
        assert_eq!(p.r#type, Some(ParameterType::Float64Array));
        assert_eq!(
            p.value,
            Some(ParameterValue::Array(vec![
                ParameterValue::Number(1.0),
                ParameterValue::Number(2.5)
            ]))
        );
    }

    #[test]
    fn type_hint_wire_names() {
        let json = serde_json::to_value(ParameterType::ByteArray).unwrap();
        assert_eq!(json, "byte_array");
        let back: ParameterType = serde_json::from_str("\"float64_array\"").unwrap();
        assert_eq!(back, ParameterType::Float64Array);
    }
}
