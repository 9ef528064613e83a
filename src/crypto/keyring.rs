//! The cloud's private signing-key ring, parsed once from
//! `CLOUD_PRIVATE_KEYS_JSON` at startup.
//!
//! Accepts either `{"<kid>": <JWK>, ...}` or `{"keys": [<JWK>, ...]}`, where
//! each JWK is an OKP/Ed25519 private key (`{"kty":"OKP","crv":"Ed25519",
//! "d":"<base64url seed>","kid":"..."}`).

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::EncodingKey;
use serde::Deserialize;

/// Fixed 16-byte PKCS#8 DER prefix for an Ed25519 private key with no public
/// key attribute (RFC 8410): version + AlgorithmIdentifier(OID 1.3.101.112) +
/// an OCTET STRING wrapper around the 32-byte seed, which itself is wrapped
/// in an inner OCTET STRING per the CurvePrivateKey ASN.1 type. Same
/// fixed-length-DER trick used for the SPKI public-key side in
/// `crypto::keymaterial`.
const PKCS8_ED25519_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    crv: Option<String>,
    d: Option<String>,
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PrivateKeysDoc {
    Keyed(HashMap<String, Jwk>),
    List { keys: Vec<Jwk> },
}

#[derive(Clone)]
struct SigningEntry {
    encoding_key: std::sync::Arc<EncodingKey>,
}

#[derive(Clone)]
pub struct KeyRing {
    entries: HashMap<String, SigningEntry>,
    order: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyRingError {
    #[error("invalid CLOUD_PRIVATE_KEYS_JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("key '{0}' is missing a kid")]
    MissingKid(String),
    #[error("key '{0}' has unsupported kty/crv (only OKP/Ed25519 is supported)")]
    UnsupportedKeyType(String),
    #[error("key '{0}' has a malformed 'd' value")]
    MalformedSeed(String),
}

impl KeyRing {
    pub fn parse(json: &str) -> Result<Self, KeyRingError> {
        let doc: PrivateKeysDoc = serde_json::from_str(json)?;
        let jwks: Vec<(Option<String>, Jwk)> = match doc {
            PrivateKeysDoc::Keyed(map) => {
                map.into_iter().map(|(kid, jwk)| (Some(kid), jwk)).collect()
            }
            PrivateKeysDoc::List { keys } => keys.into_iter().map(|jwk| (None, jwk)).collect(),
        };

        let mut entries = HashMap::new();
        let mut order = Vec::new();
        for (map_kid, jwk) in jwks {
            let kid = map_kid
                .or_else(|| jwk.kid.clone())
                .ok_or_else(|| KeyRingError::MissingKid("<unnamed>".to_string()))?;

            if jwk.kty != "OKP" || jwk.crv.as_deref() != Some("Ed25519") {
                return Err(KeyRingError::UnsupportedKeyType(kid));
            }
            let d = jwk
                .d
                .as_deref()
                .ok_or_else(|| KeyRingError::MalformedSeed(kid.clone()))?;
            let seed = URL_SAFE_NO_PAD
                .decode(d)
                .map_err(|_| KeyRingError::MalformedSeed(kid.clone()))?;
            if seed.len() != 32 {
                return Err(KeyRingError::MalformedSeed(kid));
            }

            let mut der = Vec::with_capacity(48);
            der.extend_from_slice(&PKCS8_ED25519_PREFIX);
            der.extend_from_slice(&seed);
            let encoding_key = EncodingKey::from_ed_der(&der);

            order.push(kid.clone());
            entries.insert(
                kid,
                SigningEntry {
                    encoding_key: std::sync::Arc::new(encoding_key),
                },
            );
        }

        Ok(Self { entries, order })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_kid(&self) -> Option<String> {
        self.order.first().cloned()
    }

    pub fn encoding_key(&self, kid: &str) -> Option<std::sync::Arc<EncodingKey>> {
        self.entries.get(kid).map(|e| e.encoding_key.clone())
    }
}
