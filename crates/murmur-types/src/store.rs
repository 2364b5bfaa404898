//! Collaborator contracts consumed by the auth and ingestion cores.
//!
//! Lookups return `Ok(None)` for a missing row; `Err` is reserved for the
//! backend itself failing.

use anyhow::Result;
use uuid::Uuid;

use crate::models::{Chat, ChatMessage, Principal};

pub trait IdentityStore: Send + Sync {
    fn find_by_username(&self, username: &str) -> Result<Option<Principal>>;

    fn exists_by_username(&self, username: &str) -> Result<bool>;

    fn find_user(&self, id: Uuid) -> Result<Option<Principal>>;

    /// Insert a new principal. Fails if the username is taken.
    fn save_user(&self, principal: &Principal) -> Result<()>;
}

pub trait ChatStore: Send + Sync {
    fn find_chat(&self, id: Uuid) -> Result<Option<Chat>>;
}

pub trait MessageStore: Send + Sync {
    fn save_message(&self, message: &ChatMessage) -> Result<()>;
}

/// Everything the ingestion pipeline reads and writes.
pub trait Store: IdentityStore + ChatStore + MessageStore {}

impl<T: IdentityStore + ChatStore + MessageStore> Store for T {}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String>;

    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}
