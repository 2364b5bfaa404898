use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use murmur_cache::TokenStore;
use murmur_types::models::Role;

use crate::error::ApiError;
use crate::state::AppState;
use crate::tokens::{TokenCodec, TokenKind};

/// Who is making the request, as established from a valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|r| r == role.as_str())
    }
}

/// Request-scoped authentication result. Every request carries one; it is
/// anonymous unless the gate bound an identity.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    identity: Option<Identity>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn require(&self) -> Result<&Identity, ApiError> {
        self.identity.as_ref().ok_or(ApiError::Unauthorized)
    }

    pub fn require_role(&self, role: Role) -> Result<&Identity, ApiError> {
        let identity = self.require()?;
        if !identity.has_role(role) {
            return Err(ApiError::Forbidden(format!("{} role required", role)));
        }
        Ok(identity)
    }
}

/// Turns an `Authorization` header into an [`AuthContext`].
///
/// Never fails: a missing, malformed, expired or revoked token just leaves
/// the request anonymous, and handlers decide whether that is acceptable.
#[derive(Clone)]
pub struct AuthGate {
    codec: Arc<TokenCodec>,
    tokens: TokenStore,
}

impl AuthGate {
    pub fn new(codec: Arc<TokenCodec>, tokens: TokenStore) -> Self {
        Self { codec, tokens }
    }

    pub async fn authenticate(&self, authorization: Option<&str>) -> AuthContext {
        let Some(token) = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
        else {
            return AuthContext::anonymous();
        };

        let claims = match self.codec.verify(TokenKind::Access, token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("Ignoring unusable access token: {}", e);
                return AuthContext::anonymous();
            }
        };

        match self.tokens.get_revocation(&claims.sub).await {
            Ok(Some(revoked)) if revoked == token => {
                debug!("Access token for {} has been revoked", claims.sub);
                return AuthContext::anonymous();
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Revocation check failed for {}: {}", claims.sub, e);
                return AuthContext::anonymous();
            }
        }

        AuthContext::authenticated(Identity {
            username: claims.sub,
            roles: claims.roles.unwrap_or_default(),
        })
    }
}

/// Attach an [`AuthContext`] to every request, then continue regardless of
/// the outcome.
pub async fn auth_gate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let ctx = state.gate.authenticate(authorization.as_deref()).await;
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, Utc};
    use murmur_cache::MemoryKv;

    use crate::session::tests::manager;

    fn gate_for(sessions: &crate::session::SessionManager) -> AuthGate {
        AuthGate::new(Arc::new(crate::tokens::tests::test_codec()), sessions.tokens().clone())
    }

    async fn logged_in() -> (crate::session::SessionManager, String) {
        let sessions = manager();
        sessions
            .register("alice".into(), "secret".into(), "alice@example.com".into())
            .await
            .unwrap();
        let pair = sessions.login("alice", "secret").await.unwrap();
        (sessions, pair.access_token)
    }

    #[tokio::test]
    async fn binds_identity_for_valid_token() {
        let (sessions, access) = logged_in().await;
        let gate = gate_for(&sessions);

        let ctx = gate.authenticate(Some(&format!("Bearer {}", access))).await;
        let identity = ctx.require().unwrap();
        assert_eq!(identity.username, "alice");
        assert!(identity.has_role(Role::User));
        assert!(ctx.require_role(Role::Admin).is_err());
    }

    #[tokio::test]
    async fn anonymous_without_usable_token() {
        let gate = AuthGate::new(
            Arc::new(crate::tokens::tests::test_codec()),
            TokenStore::new(Arc::new(MemoryKv::new())),
        );

        assert!(gate.authenticate(None).await.identity().is_none());
        assert!(gate.authenticate(Some("Bearer ")).await.identity().is_none());
        assert!(gate.authenticate(Some("Bearer junk")).await.identity().is_none());
        assert!(gate.authenticate(Some("Basic abc")).await.identity().is_none());
    }

    #[tokio::test]
    async fn expired_token_is_anonymous() {
        let (sessions, _) = logged_in().await;
        let gate = gate_for(&sessions);
        let roles = Some(vec![Role::User.as_str().to_string()]);
        let stale = sessions
            .codec()
            .issue_at(TokenKind::Access, "alice", roles, Utc::now() - Duration::days(31))
            .unwrap();

        let ctx = gate.authenticate(Some(&format!("Bearer {}", stale))).await;
        assert!(ctx.identity().is_none());
        assert!(ctx.require().is_err());
    }

    #[tokio::test]
    async fn revoked_token_is_not_bound() {
        let (sessions, access) = logged_in().await;
        let gate = gate_for(&sessions);
        let header = format!("Bearer {}", access);

        sessions.logout(&header).await.unwrap();

        assert!(sessions.codec().is_valid(TokenKind::Access, &access));
        assert!(gate.authenticate(Some(&header)).await.identity().is_none());
    }

    #[tokio::test]
    async fn only_the_latest_logout_is_enforced() {
        let (sessions, first) = logged_in().await;
        let second = sessions.login("alice", "secret").await.unwrap().access_token;
        let gate = gate_for(&sessions);

        sessions.logout(&first).await.unwrap();
        sessions.logout(&second).await.unwrap();

        // The revocation slot now holds `second`; `first` is accepted again.
        let first_ctx = gate.authenticate(Some(&format!("Bearer {}", first))).await;
        assert!(first_ctx.identity().is_some());
        let second_ctx = gate.authenticate(Some(&format!("Bearer {}", second))).await;
        assert!(second_ctx.identity().is_none());
    }
}
