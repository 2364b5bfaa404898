//! Auth core (token codec, session manager, per-request auth gate) and the
//! HTTP handlers that sit on top of it.

pub mod auth;
pub mod chats;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod password;
pub mod session;
pub mod state;
pub mod tokens;
pub mod users;

use axum::{
    Router,
    routing::{delete, get, post},
};

pub use error::{ApiError, ApiResult};
pub use middleware::{AuthContext, AuthGate, Identity};
pub use session::{AuthError, SessionManager};
pub use state::{AppState, AppStateInner};
pub use tokens::{TokenCodec, TokenConfig, TokenError, TokenKind};

/// Every route, behind the auth gate. The gate never rejects; handlers that
/// need a caller check their [`AuthContext`].
pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/token/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout));

    let api_routes = Router::new()
        .route("/api/users", get(users::list_users))
        .route("/api/users/{id}", get(users::get_user).delete(users::delete_user))
        .route("/api/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/api/chats/{chat_id}", delete(chats::delete_chat))
        .route("/api/chats/{chat_id}/users/{user_id}", post(chats::add_member))
        .route("/api/messages", get(messages::history).post(messages::send_message))
        .route("/api/messages/recent", get(messages::recent))
        .route("/api/messages/search", get(messages::search))
        .route("/api/messages/stats", get(messages::stats));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(auth_routes)
        .merge(api_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_gate,
        ))
        .with_state(state)
}
