//! Request body validation against the API's JSON schema.

use axum::body::Bytes;
use axum::http::StatusCode;
use jsonschema::Validator;
use serde_json::Value;

use crate::http::response::ApiError;

/// Compile `schema`, reporting why it is unusable.
pub fn compile_schema(schema: &Value) -> Result<Validator, String> {
    jsonschema::validator_for(schema).map_err(|e| e.to_string())
}

/// Check a drained body against `validator`.
///
/// Bodies that were not drained cannot be checked and are let through.
pub fn validate_json(validator: &Validator, body: Option<&Bytes>) -> Result<(), ApiError> {
    let Some(body) = body else {
        tracing::info!("Body not drained, skipping schema validation");
        return Ok(());
    };

    let value: Value = serde_json::from_slice(body).map_err(|_| {
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "request body is not json")
    })?;

    let message = validator
        .iter_errors(&value)
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    if message.is_empty() {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> Validator {
        compile_schema(&json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_body_passes() {
        let body = Bytes::from_static(br#"{"name":"kcgi"}"#);
        assert!(validate_json(&validator(), Some(&body)).is_ok());
    }

    #[test]
    fn test_not_json_rejected() {
        let body = Bytes::from_static(b"name=kcgi");
        let err = validate_json(&validator(), Some(&body)).unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.message, "request body is not json");
    }

    #[test]
    fn test_schema_violation_carries_message() {
        let body = Bytes::from_static(br#"{"name":3}"#);
        let err = validate_json(&validator(), Some(&body)).unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.message.contains("string"), "{}", err.message);
    }

    #[test]
    fn test_undrained_body_skipped() {
        assert!(validate_json(&validator(), None).is_ok());
    }

    #[test]
    fn test_invalid_schema_reported() {
        assert!(compile_schema(&json!({ "type": 12 })).is_err());
    }
}
