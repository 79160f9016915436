//! JSON ⇄ Firestore typed-value codec.
//!
//! The Firestore REST API wraps every field in a single-key object naming its type
//! (`{"stringValue": "x"}`, `{"mapValue": {"fields": {...}}}`, ...). Integers travel
//! as decimal strings. Values with no JSON counterpart decode to the closest JSON
//! shape: timestamps, references and bytes become strings, geo points become
//! `{"latitude", "longitude"}` objects.

use crate::agentstore::document_store::Document;
use crate::agentstore::error::StoreError;
use serde_json::{json, Map, Value};

/// Encode a JSON value as a Firestore `Value`.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else if let Some(u) = n.as_u64() {
                // Beyond i64 range: Firestore integers are signed 64-bit.
                json!({ "doubleValue": u as f64 })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or(0.0) })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            if values.is_empty() {
                json!({ "arrayValue": {} })
            } else {
                json!({ "arrayValue": { "values": values } })
            }
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Encode every entry of a JSON object as a Firestore `fields` map.
pub fn encode_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

/// Decode a Firestore `Value` back to JSON.
pub fn decode_value(value: &Value) -> Result<Value, StoreError> {
    let typed = value
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| StoreError::Serialization(format!("not a Firestore value: {}", value)))?;
    let (kind, inner) = typed
        .iter()
        .next()
        .ok_or_else(|| StoreError::Serialization("empty Firestore value".to_string()))?;

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" => inner
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| malformed(kind, inner)),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            parsed.map(Value::from).ok_or_else(|| malformed(kind, inner))
        }
        "doubleValue" => match inner {
            Value::Number(_) => Ok(inner.clone()),
            // NaN / Infinity arrive as strings and have no JSON form.
            Value::String(_) => Ok(Value::Null),
            _ => Err(malformed(kind, inner)),
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| malformed(kind, inner)),
        "geoPointValue" => Ok(json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(Value::Null),
            "longitude": inner.get("longitude").cloned().unwrap_or(Value::Null),
        })),
        "arrayValue" => {
            let values = match inner.get("values") {
                Some(Value::Array(values)) => values,
                None => return Ok(Value::Array(Vec::new())),
                Some(_) => return Err(malformed(kind, inner)),
            };
            values
                .iter()
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        "mapValue" => match inner.get("fields") {
            Some(Value::Object(fields)) => decode_fields(fields).map(Value::Object),
            None => Ok(Value::Object(Map::new())),
            Some(_) => Err(malformed(kind, inner)),
        },
        other => Err(StoreError::Serialization(format!(
            "unsupported Firestore value type '{}'",
            other
        ))),
    }
}

/// Decode a Firestore `fields` map into a JSON document.
pub fn decode_fields(fields: &Map<String, Value>) -> Result<Document, StoreError> {
    fields
        .iter()
        .map(|(k, v)| decode_value(v).map(|decoded| (k.clone(), decoded)))
        .collect()
}

fn malformed(kind: &str, inner: &Value) -> StoreError {
    StoreError::Serialization(format!("malformed Firestore {}: {}", kind, inner))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode_value(&json!(null)), json!({"nullValue": null}));
        assert_eq!(encode_value(&json!(true)), json!({"booleanValue": true}));
        assert_eq!(encode_value(&json!(42)), json!({"integerValue": "42"}));
        assert_eq!(encode_value(&json!(1.5)), json!({"doubleValue": 1.5}));
        assert_eq!(encode_value(&json!("hi")), json!({"stringValue": "hi"}));
    }

    #[test]
    fn test_encode_nested_record_value() {
        let encoded = encode_value(&json!({"files": ["a.py"], "meta": {}}));
        assert_eq!(
            encoded,
            json!({"mapValue": {"fields": {
                "files": {"arrayValue": {"values": [{"stringValue": "a.py"}]}},
                "meta": {"mapValue": {"fields": {}}}
            }}})
        );
    }

    #[test]
    fn test_decode_server_shapes() {
        // The server spells null as "NULL_VALUE" and may omit empty containers.
        let fields = json!({
            "userId": {"stringValue": "u1"},
            "accessCount": {"integerValue": "7"},
            "lastAccessedAt": {"nullValue": "NULL_VALUE"},
            "metadata": {"mapValue": {}},
            "tags": {"arrayValue": {}},
            "createdAt": {"timestampValue": "2025-01-01T00:00:00Z"}
        });
        let doc = decode_fields(fields.as_object().unwrap()).unwrap();
        assert_eq!(doc["userId"], "u1");
        assert_eq!(doc["accessCount"], 7);
        assert_eq!(doc["lastAccessedAt"], Value::Null);
        assert_eq!(doc["metadata"], json!({}));
        assert_eq!(doc["tags"], json!([]));
        assert_eq!(doc["createdAt"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn test_decode_inverts_encode() {
        let original = json!({"a": [1, "two", {"three": 3.5}], "b": null, "c": false});
        let decoded = decode_value(&encode_value(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = decode_value(&json!({"vectorValue": {}})).unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION");
    }
}
