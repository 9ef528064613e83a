//! Cloud → instance trigger token minting (§4.1).

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::keyring::KeyRing;

#[derive(Serialize)]
struct TriggerClaims {
    iss: String,
    aud: String,
    sub: String,
    jti: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    #[serde(rename = "deliveryId")]
    delivery_id: String,
    #[serde(rename = "siteId")]
    site_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("unknown signing key id: {0}")]
    UnknownKid(String),
    #[error("jwt encode failed: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

/// Mints trigger tokens and memoizes the `EncodingKey` per `kid` for the
/// lifetime of this worker — the key material itself is a pure function of
/// the immutable keyring, so the cache never needs eviction.
#[derive(Clone)]
pub struct TokenIssuer {
    keyring: Arc<KeyRing>,
    issuer: String,
    audience: String,
    cache: Arc<DashMap<String, Arc<EncodingKey>>>,
}

impl TokenIssuer {
    pub fn new(keyring: KeyRing, issuer: String, audience: String) -> Self {
        Self {
            keyring: Arc::new(keyring),
            issuer,
            audience,
            cache: Arc::new(DashMap::new()),
        }
    }

    fn encoding_key(&self, kid: &str) -> Result<Arc<EncodingKey>, TokenError> {
        if let Some(key) = self.cache.get(kid) {
            return Ok(key.clone());
        }
        let key = self
            .keyring
            .encoding_key(kid)
            .ok_or_else(|| TokenError::UnknownKid(kid.to_string()))?;
        self.cache.insert(kid.to_string(), key.clone());
        Ok(key)
    }

    /// Mint a fresh trigger token for `site_id`/`delivery_id`, signed by `kid`.
    pub fn mint(&self, kid: &str, site_id: &str, delivery_id: &str) -> Result<String, TokenError> {
        let encoding_key = self.encoding_key(kid)?;
        let now = Utc::now();

        let claims = TriggerClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: site_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            nbf: (now - ChronoDuration::seconds(5)).timestamp(),
            exp: (now + ChronoDuration::seconds(60)).timestamp(),
            delivery_id: delivery_id.to_string(),
            site_id: site_id.to_string(),
        };

        let mut header = Header::new(jsonwebtoken::Algorithm::EdDSA);
        header.kid = Some(kid.to_string());
        header.typ = Some("JWT".to_string());

        let token = encode(&header, &claims, &encoding_key)?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keyring::KeyRing;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn ring_with_one_key(kid: &str) -> KeyRing {
        let sk = SigningKey::generate(&mut OsRng);
        let d = URL_SAFE_NO_PAD.encode(sk.to_bytes());
        let json = format!(r#"{{"keys": [{{"kty":"OKP","crv":"Ed25519","d":"{d}","kid":"{kid}"}}]}}"#);
        KeyRing::parse(&json).unwrap()
    }

    #[test]
    fn mints_a_parseable_token() {
        let ring = ring_with_one_key("k1");
        let issuer = TokenIssuer::new(ring, "np-cloud".into(), "np-instance".into());
        let token = issuer.mint("k1", "site-123", "delivery-abc").unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn unknown_kid_errors() {
        let ring = ring_with_one_key("k1");
        let issuer = TokenIssuer::new(ring, "np-cloud".into(), "np-instance".into());
        let result = issuer.mint("missing", "site-123", "delivery-abc");
        assert!(matches!(result, Err(TokenError::UnknownKid(_))));
    }

    #[test]
    fn cache_reuses_the_same_encoding_key_arc() {
        let ring = ring_with_one_key("k1");
        let issuer = TokenIssuer::new(ring, "np-cloud".into(), "np-instance".into());
        let first = issuer.encoding_key("k1").unwrap();
        let second = issuer.encoding_key("k1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
