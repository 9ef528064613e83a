//! Shared `parse → freshness → verify` gate used by every signed endpoint
//! (§4.3, §5).

use chrono::Utc;
use serde_json::Value;

use crate::config::Config;
use crate::crypto::verify::{verify_signed_request, VerifyError};
use crate::error::AppError;

/// `BAD_REQUEST` for structurally malformed envelopes, `SIGNATURE_TIMESTAMP_EXPIRED`
/// for staleness, `INVALID_SIGNATURE` for everything else (bad key material,
/// bad algorithm, bad signature).
pub fn guard_signed_request(
    config: &Config,
    method: &str,
    path: &str,
    body: &Value,
    verifying_key_material: &str,
) -> Result<(), AppError> {
    verify_signed_request(
        method,
        path,
        body,
        verifying_key_material,
        Utc::now(),
        config.signature_window,
    )
    .map_err(|err| match err {
        VerifyError::MalformedEnvelope
        | VerifyError::UnsupportedAlg
        | VerifyError::NonceTooShort
        | VerifyError::SignatureTooShort => AppError::BadRequest(err.to_string()),
        VerifyError::Stale => AppError::SignatureTimestampExpired,
        VerifyError::BadSignature | VerifyError::BadKeyMaterial => AppError::InvalidSignature,
    })
}
