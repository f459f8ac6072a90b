//! Inbound device frame parsing.
//!
//! Devices send UTF-8 text frames: usually a JSON telemetry object, but the
//! transport tolerates arbitrary text. Non-JSON text is wrapped as a raw
//! telemetry payload so the rest of the pipeline only ever sees tagged JSON
//! objects.

use serde_json::{Map, Value};

/// Tag key every parsed frame carries.
pub const TYPE_KEY: &str = "type";

/// Default tag for frames without an explicit `type` field.
pub const TELEMETRY_TYPE: &str = "telemetry";

/// Key under which non-JSON frame text is preserved.
pub const RAW_KEY: &str = "raw";

/// Parse one inbound device frame.
///
/// Returns the telemetry object to cache and relay, or `None` when the frame
/// is valid JSON but not an object (treated as a payload-less keep-alive).
///
/// - JSON object: `type` is defaulted to `"telemetry"` when absent.
/// - Non-JSON text: wrapped as `{"type":"telemetry","raw":<text>}`.
pub fn parse_device_frame(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut map)) => {
            let _ = map
                .entry(TYPE_KEY)
                .or_insert_with(|| Value::String(TELEMETRY_TYPE.to_string()));
            Some(map)
        }
        Ok(_) => None,
        Err(_) => {
            let mut map = Map::new();
            let _ = map.insert(
                TYPE_KEY.to_string(),
                Value::String(TELEMETRY_TYPE.to_string()),
            );
            let _ = map.insert(RAW_KEY.to_string(), Value::String(text.to_string()));
            Some(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_without_type_is_tagged_telemetry() {
        let frame = parse_device_frame(r#"{"speed":3}"#).unwrap();
        assert_eq!(frame.get("type"), Some(&json!("telemetry")));
        assert_eq!(frame.get("speed"), Some(&json!(3)));
    }

    #[test]
    fn explicit_type_is_preserved() {
        let frame = parse_device_frame(r#"{"type":"pong","seq":7}"#).unwrap();
        assert_eq!(frame.get("type"), Some(&json!("pong")));
    }

    #[test]
    fn non_json_text_is_wrapped_as_raw() {
        let frame = parse_device_frame("BATT 87%").unwrap();
        assert_eq!(frame.get("type"), Some(&json!("telemetry")));
        assert_eq!(frame.get("raw"), Some(&json!("BATT 87%")));
    }

    #[test]
    fn json_scalar_is_a_keepalive() {
        assert!(parse_device_frame("42").is_none());
        assert!(parse_device_frame("\"hello\"").is_none());
    }

    #[test]
    fn json_array_is_a_keepalive() {
        assert!(parse_device_frame("[1,2,3]").is_none());
    }

    #[test]
    fn empty_object_still_gets_a_type() {
        let frame = parse_device_frame("{}").unwrap();
        assert_eq!(frame.get("type"), Some(&json!("telemetry")));
        assert_eq!(frame.len(), 1);
    }
}
