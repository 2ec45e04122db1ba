use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::KidId;

/// Session token payload: the authenticated parent plus the currently
/// selected kid, if any. The selected kid is request-scoped context taken
/// from these verified claims; handlers never consult ambient state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Parent email.
    pub sub: String,
    pub parent_id: i32,
    pub parent_name: String,
    pub kid_id: Option<KidId>,
    pub kid_name: Option<String>,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<SessionClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<SessionClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(claims: &SessionClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: i64) -> SessionClaims {
        SessionClaims {
            sub: "pat@example.com".into(),
            parent_id: 7,
            parent_name: "Pat".into(),
            kid_id: Some(KidId(3)),
            kid_name: Some("Sam".into()),
            exp,
        }
    }

    fn far_future() -> i64 {
        // Well past any test run; jsonwebtoken validates exp by default.
        4_102_444_800 // 2100-01-01
    }

    #[test]
    fn roundtrip() {
        let token = encode(&claims(far_future()), b"secret").unwrap();
        let decoded = decode_and_verify(&token, b"secret").unwrap();
        assert_eq!(decoded.parent_id, 7);
        assert_eq!(decoded.kid_id, Some(KidId(3)));
        assert_eq!(decoded.kid_name.as_deref(), Some("Sam"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = encode(&claims(far_future()), b"secret").unwrap();
        assert!(decode_and_verify(&token, b"other").is_err());
    }

    #[test]
    fn rejects_expired() {
        let token = encode(&claims(1), b"secret").unwrap();
        assert!(decode_and_verify(&token, b"secret").is_err());
    }
}
