use serde_json::{Map, Value};

pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Top-level keys whose values never reach the audit trail.
pub const SENSITIVE_FIELDS: [&str; 6] = [
    "password",
    "password_hash",
    "token",
    "secret",
    "api_key",
    "credit_card",
];

/// Copy of `data` with every sensitive top-level field replaced by the marker.
/// Nested objects are left untouched.
pub fn redact(data: &Map<String, Value>) -> Map<String, Value> {
    let mut sanitized = data.clone();
    for field in SENSITIVE_FIELDS {
        if let Some(value) = sanitized.get_mut(field) {
            *value = Value::String(REDACTION_MARKER.to_string());
        }
    }
    sanitized
}

/// Redact an arbitrary payload for storage: objects are redacted, `null` becomes
/// `None`, anything else is stored as-is.
pub fn redact_value(data: &Value) -> Option<Value> {
    match data {
        Value::Null => None,
        Value::Object(map) => Some(Value::Object(redact(map))),
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_sensitive_top_level_fields() {
        let input = json!({
            "email": "a@club.test",
            "password": "hunter22",
            "api_key": "k",
            "profile": { "password": "nested" }
        });
        let redacted = redact_value(&input).unwrap();

        assert_eq!(redacted["email"], "a@club.test");
        assert_eq!(redacted["password"], REDACTION_MARKER);
        assert_eq!(redacted["api_key"], REDACTION_MARKER);
        assert_eq!(redacted["profile"]["password"], "nested");
        // Source is not modified.
        assert_eq!(input["password"], "hunter22");
    }

    #[test]
    fn does_not_add_missing_fields() {
        let redacted = redact_value(&json!({ "name": "Yoga" })).unwrap();
        assert!(redacted.get("token").is_none());
    }

    #[test]
    fn null_and_scalars() {
        assert_eq!(redact_value(&Value::Null), None);
        assert_eq!(redact_value(&json!([1, 2])), Some(json!([1, 2])));
    }
}
