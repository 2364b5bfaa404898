use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use uuid::Uuid;

use murmur_types::api::Claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Key material and lifetimes, fixed at startup.
#[derive(Clone)]
pub struct TokenConfig {
    pub access_secret: Vec<u8>,
    pub refresh_secret: Vec<u8>,
    pub access_validity: Duration,
    pub refresh_validity: Duration,
}

struct KindKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validity: Duration,
}

impl KindKeys {
    fn new(secret: &[u8], validity: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validity,
        }
    }
}

/// HS256 signer and verifier for access and refresh tokens. Each kind has
/// its own key, so a token of one kind never verifies as the other.
pub struct TokenCodec {
    access: KindKeys,
    refresh: KindKeys,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(config: &TokenConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            access: KindKeys::new(&config.access_secret, config.access_validity),
            refresh: KindKeys::new(&config.refresh_secret, config.refresh_validity),
            validation,
        }
    }

    fn keys(&self, kind: TokenKind) -> &KindKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub fn issue(
        &self,
        kind: TokenKind,
        subject: &str,
        roles: Option<Vec<String>>,
    ) -> Result<String, TokenError> {
        self.issue_at(kind, subject, roles, Utc::now())
    }

    /// Issue a token as if the current time were `now`.
    pub(crate) fn issue_at(
        &self,
        kind: TokenKind,
        subject: &str,
        roles: Option<Vec<String>>,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let keys = self.keys(kind);
        let claims = Claims {
            sub: subject.to_string(),
            roles,
            iat: now.timestamp(),
            exp: (now + keys.validity).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn verify(&self, kind: TokenKind, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.keys(kind).decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed(e.to_string()),
            })
    }

    pub fn is_valid(&self, kind: TokenKind, token: &str) -> bool {
        self.verify(kind, token).is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_codec() -> TokenCodec {
        TokenCodec::new(&TokenConfig {
            access_secret: b"access-secret-for-tests-only-0123456789".to_vec(),
            refresh_secret: b"refresh-secret-for-tests-only-987654321".to_vec(),
            access_validity: Duration::minutes(15),
            refresh_validity: Duration::days(30),
        })
    }

    #[test]
    fn issued_claims_verify() {
        let codec = test_codec();
        let roles = Some(vec!["ADMIN".to_string()]);
        let token = codec.issue(TokenKind::Access, "alice", roles.clone()).unwrap();

        let claims = codec.verify(TokenKind::Access, &token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.roles, roles);
        assert_eq!(claims.exp - claims.iat, 15 * 60);

        let refresh = codec.issue(TokenKind::Refresh, "alice", None).unwrap();
        let claims = codec.verify(TokenKind::Refresh, &refresh).unwrap();
        assert_eq!(claims.roles, None);
        assert_eq!(claims.exp - claims.iat, 30 * 24 * 60 * 60);
    }

    #[test]
    fn tokens_are_unique() {
        let codec = test_codec();
        let a = codec.issue(TokenKind::Access, "alice", None).unwrap();
        let b = codec.issue(TokenKind::Access, "alice", None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = test_codec();
        let issued = Utc::now() - Duration::hours(1);
        let token = codec.issue_at(TokenKind::Access, "alice", None, issued).unwrap();

        assert!(matches!(codec.verify(TokenKind::Access, &token), Err(TokenError::Expired)));
        assert!(!codec.is_valid(TokenKind::Access, &token));
    }

    #[test]
    fn kinds_do_not_cross_verify() {
        let codec = test_codec();
        let access = codec.issue(TokenKind::Access, "alice", None).unwrap();
        let refresh = codec.issue(TokenKind::Refresh, "alice", None).unwrap();

        assert!(matches!(
            codec.verify(TokenKind::Refresh, &access),
            Err(TokenError::InvalidSignature)
        ));
        assert!(matches!(
            codec.verify(TokenKind::Access, &refresh),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = test_codec();
        assert!(matches!(
            codec.verify(TokenKind::Access, "not-a-token"),
            Err(TokenError::Malformed(_))
        ));
        assert!(!codec.is_valid(TokenKind::Access, ""));
    }
}
