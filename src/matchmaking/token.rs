//! Match tokens: short-lived RS256 JWTs a client presents to a game server
//! to prove it came through matchmaking for a specific land instance,
//! rather than connecting cold.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOKEN_TTL_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchTokenClaims {
    pub sub: u64,
    pub land_type: String,
    pub instance_id: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Encode,
    Invalid,
    Expired,
}

pub struct TokenIssuer {
    encoding_key: EncodingKey,
    ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(rsa_private_pem: &[u8]) -> Result<Self, TokenError> {
        let encoding_key = EncodingKey::from_rsa_pem(rsa_private_pem).map_err(|_| TokenError::Encode)?;
        Ok(Self {
            encoding_key,
            ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        })
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn issue(&self, player_id: u64, land_type: &str, instance_id: &str, now_unix: u64) -> Result<String, TokenError> {
        let claims = MatchTokenClaims {
            sub: player_id,
            land_type: land_type.to_string(),
            instance_id: instance_id.to_string(),
            iat: now_unix as usize,
            exp: (now_unix + self.ttl_secs) as usize,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key).map_err(|_| TokenError::Encode)
    }
}

pub struct TokenVerifier {
    decoding_key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(rsa_public_pem: &[u8]) -> Result<Self, TokenError> {
        let decoding_key = DecodingKey::from_rsa_pem(rsa_public_pem).map_err(|_| TokenError::Invalid)?;
        Ok(Self { decoding_key })
    }

    pub fn verify(&self, token: &str) -> Result<MatchTokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        decode::<MatchTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test-only key pair, never used outside these tests.
    const TEST_PRIVATE_KEY: &str = include_str!("../../testdata/matchmaking_test_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../../testdata/matchmaking_test_key.pub.pem");

    #[test]
    fn a_freshly_issued_token_verifies() {
        let issuer = TokenIssuer::new(TEST_PRIVATE_KEY.as_bytes()).unwrap();
        let verifier = TokenVerifier::new(TEST_PUBLIC_KEY.as_bytes()).unwrap();

        let token = issuer.issue(42, "arena", "abc", 1_000).unwrap();
        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.instance_id, "abc");
    }

    #[test]
    fn an_expired_token_is_rejected() {
        let issuer = TokenIssuer::new(TEST_PRIVATE_KEY.as_bytes()).unwrap().with_ttl(1);
        let verifier = TokenVerifier::new(TEST_PUBLIC_KEY.as_bytes()).unwrap();

        let token = issuer.issue(42, "arena", "abc", 1_000).unwrap();
        assert_eq!(verifier.verify(&token).unwrap_err(), TokenError::Expired);
    }
}
