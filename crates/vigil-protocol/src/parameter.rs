//! JSON form of parameters.
//!
//! Values map onto JSON directly except byte arrays, which travel as base64
//! strings tagged with `"type": "byte_array"`. Nested byte arrays are sent as
//! base64 too but come back as plain strings, since only the top-level type
//! hint is carried.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use vigil_core::{Parameter, ParameterType, ParameterValue};

use crate::error::ProtocolError;

/// A parameter as it appears inside `getParameters`/`setParameters`/`parameterValues`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireParameter {
    /// Parameter name.
    pub name: String,
    /// JSON value. Absent or `null` means unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Optional type hint.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub r#type: Option<ParameterType>,
}

impl WireParameter {
    /// Decode into the domain type.
    pub fn into_parameter(self) -> Result<Parameter, ProtocolError> {
        let value = match self.value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if self.r#type == Some(ParameterType::ByteArray) => {
                let data = STANDARD
                    .decode(s.as_bytes())
                    .map_err(|_| ProtocolError::InvalidBase64(self.name.clone()))?;
                Some(ParameterValue::Bytes(Bytes::from(data)))
            }
            Some(v) => Some(from_json(&self.name, v)?),
        };
        Ok(Parameter {
            name: self.name,
            r#type: self.r#type,
            value,
        })
    }
}

impl From<&Parameter> for WireParameter {
    fn from(param: &Parameter) -> Self {
        let r#type = match (&param.r#type, &param.value) {
            (Some(t), _) => Some(*t),
            (None, Some(ParameterValue::Bytes(_))) => Some(ParameterType::ByteArray),
            (None, _) => None,
        };
        Self {
            name: param.name.clone(),
            value: param.value.as_ref().map(to_json),
            r#type,
        }
    }
}

fn to_json(value: &ParameterValue) -> Value {
    match value {
        ParameterValue::Number(n) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
        ParameterValue::Bool(b) => Value::Bool(*b),
        ParameterValue::String(s) => Value::String(s.clone()),
        ParameterValue::Bytes(b) => Value::String(STANDARD.encode(b)),
        ParameterValue::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        ParameterValue::Dict(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}

fn from_json(name: &str, value: Value) -> Result<ParameterValue, ProtocolError> {
    let invalid = |reason| ProtocolError::InvalidParameter {
        name: name.to_string(),
        reason,
    };
    Ok(match value {
        Value::Null => return Err(invalid("null is only allowed at the top level")),
        Value::Bool(b) => ParameterValue::Bool(b),
        Value::Number(n) => ParameterValue::Number(n.as_f64().ok_or_else(|| invalid("number out of range"))?),
        Value::String(s) => ParameterValue::String(s),
        Value::Array(items) => ParameterValue::Array(
            items
                .into_iter()
                .map(|v| from_json(name, v))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => ParameterValue::Dict(
            map.into_iter()
                .map(|(k, v)| Ok((k, from_json(name, v)?)))
                .collect::<Result<BTreeMap<_, _>, ProtocolError>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(v: Value) -> Result<Parameter, ProtocolError> {
        serde_json::from_value::<WireParameter>(v).unwrap().into_parameter()
    }

    #[test]
    fn null_value_is_unset() {
        let p = decode(json!({"name": "x", "value": null})).unwrap();
        assert!(p.is_unset());
        let p = decode(json!({"name": "x"})).unwrap();
        assert!(p.is_unset());
    }

    #[test]
    fn byte_array_is_base64() {
        let p = Parameter::bytes("blob", vec![1u8, 2, 3]);
        let wire = WireParameter::from(&p);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json, json!({"name": "blob", "value": "AQID", "type": "byte_array"}));
        assert_eq!(decode(json).unwrap(), p);
    }

    #[test]
    fn invalid_base64_rejected() {
        let err = decode(json!({"name": "b", "value": "!!!", "type": "byte_array"})).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidBase64(name) if name == "b"));
    }

    #[test]
    fn nested_dict_decodes() {
        let p = decode(json!({"name": "cfg", "value": {"gain": 2, "on": true, "tags": ["a"]}})).unwrap();
        let Some(ParameterValue::Dict(map)) = p.value else {
            panic!("expected dict");
        };
        assert_eq!(map["gain"], ParameterValue::Number(2.0));
        assert_eq!(map["on"], ParameterValue::Bool(true));
        assert_eq!(
            map["tags"],
            ParameterValue::Array(vec![ParameterValue::String("a".into())])
        );
    }

    #[test]
    fn nested_null_rejected() {
        let err = decode(json!({"name": "arr", "value": [1, null]})).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParameter { .. }));
    }

    #[test]
    fn float64_keeps_type_hint() {
        let wire = WireParameter::from(&Parameter::float64("p3", 0.5));
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json, json!({"name": "p3", "value": 0.5, "type": "float64"}));
    }

    #[test]
    fn unset_parameter_omits_value() {
        let json = serde_json::to_value(WireParameter::from(&Parameter::empty("gone"))).unwrap();
        assert_eq!(json, json!({"name": "gone"}));
    }
}
