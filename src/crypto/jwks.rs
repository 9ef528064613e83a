//! `/.well-known/jwks.json` structural validation (§4.1, §6).

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("CLOUD_JWKS_JSON is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("CLOUD_JWKS_JSON must be an object with a 'keys' array")]
    MissingKeysArray,
}

/// Parse and structurally validate `{"keys": [...]}`. Returns the parsed
/// value unchanged (it is republished verbatim) once validated.
pub fn validate_jwks(raw: &str) -> Result<Value, JwksError> {
    let value: Value = serde_json::from_str(raw)?;
    match value.get("keys") {
        Some(Value::Array(_)) => Ok(value),
        _ => Err(JwksError::MissingKeysArray),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_jwks() {
        let raw = json!({"keys": [{"kty": "OKP", "crv": "Ed25519"}]}).to_string();
        let value = validate_jwks(&raw).unwrap();
        assert!(value.get("keys").is_some());
    }

    #[test]
    fn rejects_missing_keys_array() {
        let raw = json!({"notkeys": []}).to_string();
        assert!(matches!(
            validate_jwks(&raw),
            Err(JwksError::MissingKeysArray)
        ));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            validate_jwks("not json"),
            Err(JwksError::InvalidJson(_))
        ));
    }

    #[test]
    fn rejects_keys_not_array() {
        let raw = json!({"keys": "oops"}).to_string();
        assert!(matches!(
            validate_jwks(&raw),
            Err(JwksError::MissingKeysArray)
        ));
    }
}
