//! Conversions between HTTP JSON bodies and msgpack argument values.
//!
//! Request arguments arrive as JSON, travel to workers as msgpack, and
//! results make the reverse trip. Binary msgpack data becomes a JSON
//! array of byte values; msgpack extension types are not supported.

use rmpv::Value;

use crate::error::ProtoError;

/// Convert a JSON value into its msgpack equivalent.
pub fn json_to_msgpack(json: &serde_json::Value) -> Result<Value, ProtoError> {
    match json {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::Integer(u.into()))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::F64(f))
            } else {
                Err(ProtoError::Value("unrepresentable number".to_string()))
            }
        }
        serde_json::Value::String(s) => Ok(Value::from(s.as_str())),
        serde_json::Value::Array(items) => {
            let values: Result<Vec<_>, _> = items.iter().map(json_to_msgpack).collect();
            Ok(Value::Array(values?))
        }
        serde_json::Value::Object(fields) => {
            let pairs: Result<Vec<(Value, Value)>, ProtoError> = fields
                .iter()
                .map(|(k, v)| Ok((Value::from(k.as_str()), json_to_msgpack(v)?)))
                .collect();
            Ok(Value::Map(pairs?))
        }
    }
}

/// Convert a msgpack value into JSON.
pub fn msgpack_to_json(value: &Value) -> Result<serde_json::Value, ProtoError> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Integer(i) => {
            if let Some(v) = i.as_i64() {
                Ok(serde_json::json!(v))
            } else if let Some(v) = i.as_u64() {
                Ok(serde_json::json!(v))
            } else {
                Err(ProtoError::Value("integer out of range".to_string()))
            }
        }
        Value::F32(f) => Ok(serde_json::json!(*f)),
        Value::F64(f) => Ok(serde_json::json!(*f)),
        Value::String(s) => {
            let s = s
                .as_str()
                .ok_or_else(|| ProtoError::Value("invalid utf-8 string".to_string()))?;
            Ok(serde_json::Value::String(s.to_string()))
        }
        Value::Binary(bytes) => Ok(serde_json::Value::Array(
            bytes.iter().map(|&b| serde_json::json!(b)).collect(),
        )),
        Value::Array(items) => {
            let values: Result<Vec<_>, _> = items.iter().map(msgpack_to_json).collect();
            Ok(serde_json::Value::Array(values?))
        }
        Value::Map(pairs) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in pairs {
                let key = k
                    .as_str()
                    .ok_or_else(|| ProtoError::Value("map keys must be strings".to_string()))?;
                obj.insert(key.to_string(), msgpack_to_json(v)?);
            }
            Ok(serde_json::Value::Object(obj))
        }
        Value::Ext(..) => Err(ProtoError::Value(
            "extension types not supported".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(json: serde_json::Value) {
        let packed = json_to_msgpack(&json).unwrap();
        assert_eq!(msgpack_to_json(&packed).unwrap(), json);
    }

    #[test]
    fn scalars_roundtrip() {
        roundtrip(serde_json::json!(null));
        roundtrip(serde_json::json!(true));
        roundtrip(serde_json::json!(42));
        roundtrip(serde_json::json!(-7));
        roundtrip(serde_json::json!("hello 世界"));
    }

    #[test]
    fn floats_roundtrip() {
        let json = serde_json::json!({"pi": 3.14159, "small": 1e-308});
        let packed = json_to_msgpack(&json).unwrap();
        let back = msgpack_to_json(&packed).unwrap();
        assert!((back["pi"].as_f64().unwrap() - 3.14159).abs() < 1e-9);
        assert_eq!(back["small"].as_f64().unwrap(), 1e-308);
    }

    #[test]
    fn nested_structures_roundtrip() {
        roundtrip(serde_json::json!({
            "user": {"id": 1, "tags": ["a", "b"]},
            "items": [1, "two", 3.5, null, {"deep": [[]]}],
            "empty_obj": {},
            "empty_arr": [],
        }));
    }

    #[test]
    fn binary_becomes_byte_array() {
        let packed = Value::Binary(vec![0x00, 0x01, 0xff]);
        assert_eq!(
            msgpack_to_json(&packed).unwrap(),
            serde_json::json!([0, 1, 255])
        );
    }

    #[test]
    fn non_string_map_key_rejected() {
        let packed = Value::Map(vec![(Value::from(1u32), Value::from("x"))]);
        assert!(matches!(
            msgpack_to_json(&packed),
            Err(ProtoError::Value(_))
        ));
    }

    #[test]
    fn ext_rejected() {
        let packed = Value::Ext(1, vec![0x01]);
        assert!(matches!(
            msgpack_to_json(&packed),
            Err(ProtoError::Value(_))
        ));
    }

    #[test]
    fn large_u64_roundtrip() {
        roundtrip(serde_json::json!(u64::MAX));
    }
}
