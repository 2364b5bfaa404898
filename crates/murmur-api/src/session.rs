use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_cache::{KvError, TokenStore};
use murmur_types::api::TokenResponse;
use murmur_types::models::{Principal, Role, TokenPair};
use murmur_types::store::{IdentityStore, PasswordHasher};

use crate::tokens::{TokenCodec, TokenError, TokenKind};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Username is already taken")]
    DuplicateUsername,

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Invalid username or password")]
    InvalidCredential,

    #[error("Token is invalid or expired")]
    InvalidToken,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] KvError),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

/// Run a blocking identity-store or hashing call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Store(anyhow::anyhow!("Blocking task failed: {}", e)))?
}

/// Signup, login, refresh and logout.
///
/// A username moves between three states: anonymous (no session), signed in
/// (session slot holds its latest pair) and revoked (its latest logged-out
/// access token sits in the revocation slot). Logging in again from the
/// revoked state simply signs the user back in.
#[derive(Clone)]
pub struct SessionManager {
    identities: Arc<dyn IdentityStore>,
    hasher: Arc<dyn PasswordHasher>,
    codec: Arc<TokenCodec>,
    tokens: TokenStore,
}

impl SessionManager {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        hasher: Arc<dyn PasswordHasher>,
        codec: Arc<TokenCodec>,
        tokens: TokenStore,
    ) -> Self {
        Self {
            identities,
            hasher,
            codec,
            tokens,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Create a principal with role USER.
    pub async fn register(
        &self,
        username: String,
        password: String,
        email: String,
    ) -> Result<Principal, AuthError> {
        let identities = self.identities.clone();
        let hasher = self.hasher.clone();

        let principal = blocking(move || {
            if identities.exists_by_username(&username)? {
                return Err(AuthError::DuplicateUsername);
            }

            let password_hash = hasher
                .hash(&password)
                .map_err(|e| AuthError::Hashing(e.to_string()))?;
            let now = Utc::now();
            let principal = Principal {
                id: Uuid::new_v4(),
                username,
                email,
                password_hash,
                role: Role::User,
                created_at: now,
                updated_at: now,
            };

            // Another signup may have taken the name since the check above.
            if let Err(e) = identities.save_user(&principal) {
                if identities.exists_by_username(&principal.username)? {
                    return Err(AuthError::DuplicateUsername);
                }
                return Err(e.into());
            }
            Ok(principal)
        })
        .await?;

        info!(user_id = %principal.id, "User {} registered", principal.username);
        Ok(principal)
    }

    /// Check credentials, issue a fresh pair and make it the user's session.
    /// Earlier access tokens stay valid until they expire or are logged out.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        let identities = self.identities.clone();
        let hasher = self.hasher.clone();
        let name = username.to_string();
        let password = password.to_string();

        let principal = blocking(move || {
            let principal = identities
                .find_by_username(&name)?
                .ok_or(AuthError::NotFound(name))?;

            let matches = hasher
                .verify(&password, &principal.password_hash)
                .map_err(|e| AuthError::Hashing(e.to_string()))?;
            if !matches {
                return Err(AuthError::InvalidCredential);
            }
            Ok(principal)
        })
        .await
        .inspect_err(|e| {
            if matches!(e, AuthError::InvalidCredential) {
                warn!("Failed login attempt for {}", username);
            }
        })?;

        let pair = TokenPair {
            access_token: self.issue_access(&principal)?,
            refresh_token: self.codec.issue(TokenKind::Refresh, &principal.username, None)?,
        };
        self.tokens.put_session(&principal.username, &pair).await?;

        info!(user_id = %principal.id, "User {} logged in", principal.username);
        Ok(pair)
    }

    /// Mint a new access token from the refresh token of the user's current
    /// session. The refresh token itself is not rotated.
    ///
    /// A refresh token that verifies but is not the one in the session slot
    /// (no session, or superseded by a later login) yields an empty response
    /// rather than an error.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let claims = self
            .codec
            .verify(TokenKind::Refresh, refresh_token)
            .map_err(|e| {
                debug!("Refresh token rejected: {}", e);
                AuthError::InvalidToken
            })?;
        let username = claims.sub;

        let current = self.tokens.get_session(&username).await?;
        if current.is_none_or(|pair| pair.refresh_token != refresh_token) {
            warn!("Refresh token for {} does not match the current session", username);
            return Ok(TokenResponse::default());
        }

        let identities = self.identities.clone();
        let name = username.clone();
        let principal = blocking(move || {
            identities
                .find_by_username(&name)?
                .ok_or(AuthError::NotFound(name))
        })
        .await?;

        debug!("Access token refreshed for {}", username);
        Ok(TokenResponse {
            access_token: Some(self.issue_access(&principal)?),
            refresh_token: None,
        })
    }

    /// Revoke the presented access token. Accepts a raw token or a full
    /// `Bearer <token>` header value. The token must still verify.
    pub async fn logout(&self, authorization: &str) -> Result<(), AuthError> {
        let token = strip_bearer(authorization);
        let claims = self
            .codec
            .verify(TokenKind::Access, token)
            .map_err(|_| AuthError::InvalidToken)?;

        self.tokens.put_revocation(&claims.sub, token).await?;

        info!("User {} logged out", claims.sub);
        Ok(())
    }

    fn issue_access(&self, principal: &Principal) -> Result<String, TokenError> {
        self.codec.issue(
            TokenKind::Access,
            &principal.username,
            Some(vec![principal.role.as_str().to_string()]),
        )
    }
}

pub(crate) fn strip_bearer(value: &str) -> &str {
    let value = value.trim();
    value.strip_prefix("Bearer ").unwrap_or(value).trim()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use murmur_cache::MemoryKv;

    use crate::tokens::tests::test_codec;

    /// Stores "plain:<password>" so tests stay fast.
    pub(crate) struct PlainHasher;

    impl PasswordHasher for PlainHasher {
        fn hash(&self, password: &str) -> anyhow::Result<String> {
            Ok(format!("plain:{}", password))
        }

        fn verify(&self, password: &str, hash: &str) -> anyhow::Result<bool> {
            Ok(hash == format!("plain:{}", password))
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeIdentities {
        users: Mutex<HashMap<String, Principal>>,
    }

    impl IdentityStore for FakeIdentities {
        fn find_by_username(&self, username: &str) -> anyhow::Result<Option<Principal>> {
            Ok(self.users.lock().unwrap().get(username).cloned())
        }

        fn exists_by_username(&self, username: &str) -> anyhow::Result<bool> {
            Ok(self.users.lock().unwrap().contains_key(username))
        }

        fn find_user(&self, id: Uuid) -> anyhow::Result<Option<Principal>> {
            Ok(self.users.lock().unwrap().values().find(|p| p.id == id).cloned())
        }

        fn save_user(&self, principal: &Principal) -> anyhow::Result<()> {
            let mut users = self.users.lock().unwrap();
            if users.contains_key(&principal.username) {
                anyhow::bail!("username taken");
            }
            users.insert(principal.username.clone(), principal.clone());
            Ok(())
        }
    }

    pub(crate) fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(FakeIdentities::default()),
            Arc::new(PlainHasher),
            Arc::new(test_codec()),
            TokenStore::new(Arc::new(MemoryKv::new())),
        )
    }

    async fn signed_up(name: &str, password: &str) -> SessionManager {
        let sessions = manager();
        sessions
            .register(name.into(), password.into(), format!("{}@example.com", name))
            .await
            .unwrap();
        sessions
    }

    #[tokio::test]
    async fn register_creates_user_role() {
        let sessions = manager();
        let principal = sessions
            .register("alice".into(), "secret".into(), "alice@example.com".into())
            .await
            .unwrap();

        assert_eq!(principal.role, Role::User);
        assert_eq!(principal.password_hash, "plain:secret");

        let err = sessions
            .register("alice".into(), "other".into(), "a2@example.com".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateUsername));
    }

    #[tokio::test]
    async fn login_stores_the_issued_pair() {
        let sessions = signed_up("alice", "secret").await;

        let pair = sessions.login("alice", "secret").await.unwrap();
        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());
        assert_eq!(sessions.tokens().get_session("alice").await.unwrap(), Some(pair.clone()));

        let claims = sessions.codec().verify(TokenKind::Access, &pair.access_token).unwrap();
        assert_eq!(claims.roles, Some(vec!["USER".to_string()]));

        let err = sessions.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential));
        assert_eq!(sessions.tokens().get_session("alice").await.unwrap(), Some(pair));
    }

    #[tokio::test]
    async fn login_unknown_user_is_not_found() {
        let sessions = manager();
        let err = sessions.login("nobody", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(name) if name == "nobody"));
    }

    #[tokio::test]
    async fn refresh_does_not_rotate() {
        let sessions = signed_up("alice", "secret").await;
        let pair = sessions.login("alice", "secret").await.unwrap();

        let response = sessions.refresh(&pair.refresh_token).await.unwrap();
        let access = response.access_token.unwrap();
        assert_ne!(access, pair.access_token);
        assert!(response.refresh_token.is_none());
        assert!(sessions.codec().is_valid(TokenKind::Access, &access));

        let stored = sessions.tokens().get_session("alice").await.unwrap().unwrap();
        assert_eq!(stored.refresh_token, pair.refresh_token);
    }

    #[tokio::test]
    async fn superseded_refresh_token_yields_empty_pair() {
        let sessions = signed_up("alice", "secret").await;
        let first = sessions.login("alice", "secret").await.unwrap();
        let _second = sessions.login("alice", "secret").await.unwrap();

        let response = sessions.refresh(&first.refresh_token).await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn refresh_without_session_yields_empty_pair() {
        let sessions = signed_up("alice", "secret").await;
        let orphan = sessions.codec().issue(TokenKind::Refresh, "alice", None).unwrap();
        assert!(sessions.refresh(&orphan).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_rejects_invalid_tokens() {
        let sessions = signed_up("alice", "secret").await;
        let pair = sessions.login("alice", "secret").await.unwrap();

        assert!(matches!(sessions.refresh("garbage").await, Err(AuthError::InvalidToken)));
        // An access token is signed with the other key.
        assert!(matches!(
            sessions.refresh(&pair.access_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn logout_revokes_presented_token() {
        let sessions = signed_up("alice", "secret").await;
        let pair = sessions.login("alice", "secret").await.unwrap();

        sessions
            .logout(&format!("Bearer {}", pair.access_token))
            .await
            .unwrap();
        assert_eq!(
            sessions.tokens().get_revocation("alice").await.unwrap(),
            Some(pair.access_token.clone())
        );
        // Still cryptographically valid; only policy rejects it.
        assert!(sessions.codec().is_valid(TokenKind::Access, &pair.access_token));
    }

    #[tokio::test]
    async fn logout_accepts_bare_token_and_rejects_garbage() {
        let sessions = signed_up("alice", "secret").await;
        let pair = sessions.login("alice", "secret").await.unwrap();

        sessions.logout(&pair.access_token).await.unwrap();
        assert!(matches!(
            sessions.logout("Bearer nonsense").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn expired_tokens_are_invalid() {
        let sessions = signed_up("alice", "secret").await;
        let long_ago = Utc::now() - chrono::Duration::days(31);
        let codec = sessions.codec();

        let access = codec.issue_at(TokenKind::Access, "alice", None, long_ago).unwrap();
        assert!(matches!(
            sessions.logout(&format!("Bearer {}", access)).await,
            Err(AuthError::InvalidToken)
        ));
        assert_eq!(sessions.tokens().get_revocation("alice").await.unwrap(), None);

        // Stored as the current session, so only expiry can reject it.
        let refresh = codec.issue_at(TokenKind::Refresh, "alice", None, long_ago).unwrap();
        let pair = TokenPair {
            access_token: access,
            refresh_token: refresh.clone(),
        };
        sessions.tokens().put_session("alice", &pair).await.unwrap();
        assert!(matches!(sessions.refresh(&refresh).await, Err(AuthError::InvalidToken)));
    }

    #[test]
    fn strips_bearer_prefix() {
        assert_eq!(strip_bearer("Bearer abc"), "abc");
        assert_eq!(strip_bearer("abc"), "abc");
        assert_eq!(strip_bearer("  Bearer  abc "), "abc");
    }
}
