use std::sync::Arc;

use murmur_types::models::TokenPair;

use crate::kv::{KvError, KvStore};

fn session_key(username: &str) -> String {
    format!("session:{}", username)
}

fn blacklist_key(username: &str) -> String {
    format!("blacklist:{}", username)
}

/// Per-user session and revocation slots.
///
/// Both slots hold exactly one value per username and every write is an
/// unconditional overwrite: the newest login replaces the stored pair, the
/// newest logout replaces the revoked token. Neither slot expires.
#[derive(Clone)]
pub struct TokenStore {
    kv: Arc<dyn KvStore>,
}

impl TokenStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn put_session(&self, username: &str, pair: &TokenPair) -> Result<(), KvError> {
        let json = serde_json::to_string(pair)?;
        self.kv.set(&session_key(username), &json).await
    }

    pub async fn get_session(&self, username: &str) -> Result<Option<TokenPair>, KvError> {
        match self.kv.get(&session_key(username)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn put_revocation(&self, username: &str, access_token: &str) -> Result<(), KvError> {
        self.kv.set(&blacklist_key(username), access_token).await
    }

    pub async fn get_revocation(&self, username: &str) -> Result<Option<String>, KvError> {
        self.kv.get(&blacklist_key(username)).await
    }
}
