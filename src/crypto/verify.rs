//! Detached-signature verification of instance → cloud requests.
//!
//! Generalizes the teacher's `verify_sig` (sign-everything-but-the-signature
//! field, over a fixed protobuf struct) to an arbitrary canonicalized JSON
//! payload, matching the message format spec.md §4.1 defines.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::canonical::{canonical_hash, without_signature_field};
use super::keymaterial::parse_verifying_key;

const SIGNING_PROTOCOL_TAG: &str = "NP-CLOUD-SIGN-V1";
const MIN_NONCE_LEN: usize = 8;
const MIN_SIG_LEN: usize = 16;

#[derive(Debug, Deserialize)]
pub struct SignatureEnvelope {
    pub alg: String,
    pub ts: i64,
    pub nonce: String,
    pub sig: String,
    #[serde(default)]
    pub kid: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("missing or malformed signature envelope")]
    MalformedEnvelope,
    #[error("unsupported signature algorithm")]
    UnsupportedAlg,
    #[error("nonce too short")]
    NonceTooShort,
    #[error("signature too short")]
    SignatureTooShort,
    #[error("signature timestamp outside freshness window")]
    Stale,
    #[error("signature does not verify")]
    BadSignature,
    #[error("malformed key material")]
    BadKeyMaterial,
}

/// Extract and structurally validate the `signature` field of a request body.
pub fn parse_signature_envelope(body: &Value) -> Result<SignatureEnvelope, VerifyError> {
    let raw = body
        .get("signature")
        .cloned()
        .ok_or(VerifyError::MalformedEnvelope)?;
    let env: SignatureEnvelope =
        serde_json::from_value(raw).map_err(|_| VerifyError::MalformedEnvelope)?;
    if env.alg != "EdDSA" {
        return Err(VerifyError::UnsupportedAlg);
    }
    if env.nonce.len() < MIN_NONCE_LEN {
        return Err(VerifyError::NonceTooShort);
    }
    if env.sig.len() < MIN_SIG_LEN {
        return Err(VerifyError::SignatureTooShort);
    }
    Ok(env)
}

/// `|now - ts| <= window`, inclusive at the boundary.
pub fn is_fresh(ts_millis: i64, now: DateTime<Utc>, window: Duration) -> bool {
    let delta = (now.timestamp_millis() - ts_millis).unsigned_abs();
    delta <= window.as_millis() as u64
}

/// Build the newline-joined message that gets signed/verified.
pub fn signing_message(method: &str, path: &str, body_hash: &str, ts: i64, nonce: &str) -> String {
    [
        SIGNING_PROTOCOL_TAG,
        &method.to_uppercase(),
        path,
        body_hash,
        &ts.to_string(),
        nonce,
    ]
    .join("\n")
}

fn decode_signature_bytes(sig: &str) -> Result<[u8; 64], VerifyError> {
    let raw = STANDARD
        .decode(sig)
        .or_else(|_| URL_SAFE_NO_PAD.decode(sig))
        .map_err(|_| VerifyError::BadSignature)?;
    raw.try_into().map_err(|_| VerifyError::BadSignature)
}

/// Verify a detached-signature request body against `verifying_key_material`.
///
/// `body` is the full JSON request body, signature field included. Returns
/// `Ok(())` only if freshness and the Ed25519 signature both hold.
pub fn verify_signed_request(
    method: &str,
    path: &str,
    body: &Value,
    verifying_key_material: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<(), VerifyError> {
    let envelope = parse_signature_envelope(body)?;
    if !is_fresh(envelope.ts, now, window) {
        return Err(VerifyError::Stale);
    }

    let unsigned = without_signature_field(body);
    let body_hash = canonical_hash(&unsigned);
    let message = signing_message(method, path, &body_hash, envelope.ts, &envelope.nonce);

    let verifying_key: VerifyingKey =
        parse_verifying_key(verifying_key_material).map_err(|_| VerifyError::BadKeyMaterial)?;
    let sig_bytes = decode_signature_bytes(&envelope.sig)?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(message.as_bytes(), &signature)
        .map_err(|_| VerifyError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use serde_json::json;

    fn sign_request(
        sk: &SigningKey,
        method: &str,
        path: &str,
        mut payload: Value,
        ts: i64,
        nonce: &str,
    ) -> Value {
        let body_hash = canonical_hash(&payload);
        let message = signing_message(method, path, &body_hash, ts, nonce);
        let sig = sk.sign(message.as_bytes());
        payload["signature"] = json!({
            "alg": "EdDSA",
            "ts": ts,
            "nonce": nonce,
            "sig": STANDARD.encode(sig.to_bytes()),
        });
        payload
    }

    #[test]
    fn valid_signature_verifies() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk_material = STANDARD.encode(sk.verifying_key().to_bytes());
        let now = Utc::now();
        let body = sign_request(
            &sk,
            "post",
            "/v1/instances/sync",
            json!({"siteId": "abc"}),
            now.timestamp_millis(),
            "noncenonce",
        );
        let result = verify_signed_request(
            "POST",
            "/v1/instances/sync",
            &body,
            &vk_material,
            now,
            Duration::from_secs(300),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn tampered_payload_fails() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk_material = STANDARD.encode(sk.verifying_key().to_bytes());
        let now = Utc::now();
        let mut body = sign_request(
            &sk,
            "post",
            "/v1/instances/sync",
            json!({"siteId": "abc"}),
            now.timestamp_millis(),
            "noncenonce",
        );
        body["siteId"] = json!("tampered");
        let result = verify_signed_request(
            "POST",
            "/v1/instances/sync",
            &body,
            &vk_material,
            now,
            Duration::from_secs(300),
        );
        assert_eq!(result, Err(VerifyError::BadSignature));
    }

    #[test]
    fn stale_timestamp_rejected_one_ms_beyond_window() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk_material = STANDARD.encode(sk.verifying_key().to_bytes());
        let now = Utc::now();
        let window = Duration::from_secs(300);
        let ts = now.timestamp_millis() - window.as_millis() as i64 - 1;
        let body = sign_request(
            &sk,
            "post",
            "/v1/instances/sync",
            json!({"siteId": "abc"}),
            ts,
            "noncenonce",
        );
        let result =
            verify_signed_request("POST", "/v1/instances/sync", &body, &vk_material, now, window);
        assert_eq!(result, Err(VerifyError::Stale));
    }

    #[test]
    fn fresh_at_exact_boundary_accepts() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk_material = STANDARD.encode(sk.verifying_key().to_bytes());
        let now = Utc::now();
        let window = Duration::from_secs(300);
        let ts = now.timestamp_millis() - window.as_millis() as i64;
        let body = sign_request(
            &sk,
            "post",
            "/v1/instances/sync",
            json!({"siteId": "abc"}),
            ts,
            "noncenonce",
        );
        let result =
            verify_signed_request("POST", "/v1/instances/sync", &body, &vk_material, now, window);
        assert!(result.is_ok());
    }

    #[test]
    fn short_nonce_rejected() {
        let body = json!({"signature": {"alg": "EdDSA", "ts": 1, "nonce": "short", "sig": "0123456789abcdef"}});
        assert_eq!(
            parse_signature_envelope(&body),
            Err(VerifyError::NonceTooShort)
        );
    }

    #[test]
    fn short_signature_rejected() {
        let body =
            json!({"signature": {"alg": "EdDSA", "ts": 1, "nonce": "noncenonce", "sig": "short"}});
        assert_eq!(
            parse_signature_envelope(&body),
            Err(VerifyError::SignatureTooShort)
        );
    }

    #[test]
    fn missing_signature_field_rejected() {
        let body = json!({"siteId": "abc"});
        assert_eq!(
            parse_signature_envelope(&body),
            Err(VerifyError::MalformedEnvelope)
        );
    }
}
