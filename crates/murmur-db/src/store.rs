use anyhow::Result;
use uuid::Uuid;

use murmur_types::models::{Chat, ChatMessage, Principal};
use murmur_types::store::{ChatStore, IdentityStore, MessageStore};

use crate::Database;

impl IdentityStore for Database {
    fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        self.get_user_by_username(username)
    }

    fn exists_by_username(&self, username: &str) -> Result<bool> {
        self.username_exists(username)
    }

    fn find_user(&self, id: Uuid) -> Result<Option<Principal>> {
        self.get_user_by_id(id)
    }

    fn save_user(&self, principal: &Principal) -> Result<()> {
        self.create_user(principal)
    }
}

impl ChatStore for Database {
    fn find_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        self.get_chat(id)
    }
}

impl MessageStore for Database {
    fn save_message(&self, message: &ChatMessage) -> Result<()> {
        self.insert_message(message)
    }
}
