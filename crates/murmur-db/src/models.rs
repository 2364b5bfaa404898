//! Raw SQLite rows. Ids and timestamps stay as text until converted.
//! Distinct from murmur-types models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ChatRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub sent_at: String,
}
