//! Parsing of the three accepted Ed25519 public-key material shapes.
//!
//! Verification fails closed on any parse error, per spec: a malformed key
//! never falls back to "treat as valid".

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::VerifyingKey;

/// A PKCS#8/SPKI-wrapped Ed25519 public key is always 44 bytes of DER: a
/// fixed 12-byte AlgorithmIdentifier prefix (OID 1.3.101.112) followed by
/// the raw 32-byte key. No general ASN.1 parser is needed for this one
/// well-known fixed shape.
const SPKI_ED25519_LEN: usize = 44;

#[derive(Debug, thiserror::Error)]
pub enum KeyMaterialError {
    #[error("empty key material")]
    Empty,
    #[error("malformed PEM")]
    MalformedPem,
    #[error("unsupported PEM label: {0}")]
    UnsupportedPemLabel(String),
    #[error("malformed base64")]
    MalformedBase64,
    #[error("malformed DNS-TXT record")]
    MalformedDnsTxt,
    #[error("key material is not 32 raw bytes or {SPKI_ED25519_LEN}-byte SPKI DER")]
    WrongLength,
    #[error("invalid Ed25519 public key bytes")]
    InvalidKeyBytes,
}

fn spki_der_to_verifying_key(der: &[u8]) -> Result<VerifyingKey, KeyMaterialError> {
    if der.len() != SPKI_ED25519_LEN {
        return Err(KeyMaterialError::WrongLength);
    }
    let raw: [u8; 32] = der[SPKI_ED25519_LEN - 32..]
        .try_into()
        .map_err(|_| KeyMaterialError::WrongLength)?;
    VerifyingKey::from_bytes(&raw).map_err(|_| KeyMaterialError::InvalidKeyBytes)
}

fn raw_bytes_to_verifying_key(raw: &[u8]) -> Result<VerifyingKey, KeyMaterialError> {
    match raw.len() {
        32 => {
            let bytes: [u8; 32] = raw.try_into().expect("length checked above");
            VerifyingKey::from_bytes(&bytes).map_err(|_| KeyMaterialError::InvalidKeyBytes)
        }
        SPKI_ED25519_LEN => spki_der_to_verifying_key(raw),
        _ => Err(KeyMaterialError::WrongLength),
    }
}

fn decode_flexible_base64(s: &str) -> Result<Vec<u8>, KeyMaterialError> {
    let trimmed = s.trim();
    STANDARD
        .decode(trimmed)
        .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
        .map_err(|_| KeyMaterialError::MalformedBase64)
}

/// Parse a `v=...; k=ed25519; p=<base64>` DNS-TXT style record, as used by
/// mail/DKIM-adjacent key-distribution conventions. Only the `p` value is
/// meaningful here.
fn parse_dns_txt(record: &str) -> Result<Vec<u8>, KeyMaterialError> {
    let mut p_value: Option<&str> = None;
    for field in record.split(';') {
        let field = field.trim();
        if let Some(rest) = field.strip_prefix("p=") {
            p_value = Some(rest.trim());
        }
    }
    let p = p_value.ok_or(KeyMaterialError::MalformedDnsTxt)?;
    decode_flexible_base64(p)
}

/// Accepts PEM (`-----BEGIN PUBLIC KEY-----`), bare base64/base64url, or a
/// DNS-TXT style `v=...; k=ed25519; p=<base64>` record and returns the
/// parsed Ed25519 verifying key. Fails closed on any malformed input.
pub fn parse_verifying_key(material: &str) -> Result<VerifyingKey, KeyMaterialError> {
    let trimmed = material.trim();
    if trimmed.is_empty() {
        return Err(KeyMaterialError::Empty);
    }

    if trimmed.contains("BEGIN") {
        let parsed = pem::parse(trimmed).map_err(|_| KeyMaterialError::MalformedPem)?;
        if parsed.tag() != "PUBLIC KEY" {
            return Err(KeyMaterialError::UnsupportedPemLabel(
                parsed.tag().to_string(),
            ));
        }
        return spki_der_to_verifying_key(parsed.contents());
    }

    if trimmed.contains("k=ed25519") || (trimmed.contains("v=") && trimmed.contains("p=")) {
        let raw = parse_dns_txt(trimmed)?;
        return raw_bytes_to_verifying_key(&raw);
    }

    let raw = decode_flexible_base64(trimmed)?;
    raw_bytes_to_verifying_key(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn sample_key() -> (SigningKey, VerifyingKey) {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();
        (sk, vk)
    }

    #[test]
    fn parses_bare_base64_standard() {
        let (_, vk) = sample_key();
        let encoded = STANDARD.encode(vk.to_bytes());
        let parsed = parse_verifying_key(&encoded).unwrap();
        assert_eq!(parsed, vk);
    }

    #[test]
    fn parses_bare_base64url() {
        let (_, vk) = sample_key();
        let encoded = URL_SAFE_NO_PAD.encode(vk.to_bytes());
        let parsed = parse_verifying_key(&encoded).unwrap();
        assert_eq!(parsed, vk);
    }

    #[test]
    fn parses_dns_txt_style_record() {
        let (_, vk) = sample_key();
        let record = format!(
            "v=DKIM1; k=ed25519; p={}",
            STANDARD.encode(vk.to_bytes())
        );
        let parsed = parse_verifying_key(&record).unwrap();
        assert_eq!(parsed, vk);
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            parse_verifying_key(""),
            Err(KeyMaterialError::Empty)
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_verifying_key("not base64 at all!!").is_err());
    }

    #[test]
    fn rejects_wrong_length_raw_bytes() {
        let encoded = STANDARD.encode([0u8; 16]);
        assert!(matches!(
            parse_verifying_key(&encoded),
            Err(KeyMaterialError::WrongLength)
        ));
    }
}
