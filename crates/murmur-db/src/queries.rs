use crate::models::{ChatRow, MessageRow, UserRow};
use crate::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use murmur_types::models::{Chat, ChatMessage, Principal, Role};
use rusqlite::Connection;
use uuid::Uuid;

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &Principal) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.id.to_string(),
                    user.username,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    format_ts(user.created_at),
                    format_ts(user.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<Principal>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))?
            .map(Principal::try_from)
            .transpose()
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", &id.to_string()))?
            .map(Principal::try_from)
            .transpose()
    }

    pub fn username_exists(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
                [username],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    pub fn list_users(&self) -> Result<Vec<Principal>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, email, password_hash, role, created_at, updated_at
                 FROM users ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(Principal::try_from).collect()
    }

    /// Returns false if no user has that name.
    pub fn set_user_role(&self, username: &str, role: Role) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET role = ?1, updated_at = ?2 WHERE username = ?3",
                rusqlite::params![role.as_str(), format_ts(Utc::now()), username],
            )?;
            Ok(n > 0)
        })
    }

    /// Returns false if no such user existed.
    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }

    // -- Chats --

    /// Insert a chat and its initial members. Member ids that do not name an
    /// existing user are skipped; the returned chat lists the members that
    /// were actually added.
    pub fn create_chat(&self, chat: &Chat) -> Result<Chat> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chats (id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![chat.id.to_string(), chat.name, format_ts(chat.created_at)],
            )?;
            for user_id in &chat.member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO chat_members (chat_id, user_id)
                     SELECT ?1, id FROM users WHERE id = ?2",
                    [chat.id.to_string(), user_id.to_string()],
                )?;
            }
            let member_ids = query_member_ids(&tx, &chat.id.to_string())?;
            tx.commit()?;

            Ok(Chat {
                member_ids,
                ..chat.clone()
            })
        })
    }

    pub fn get_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, created_at FROM chats WHERE id = ?1",
                    [id.to_string()],
                    map_chat_row,
                )
                .optional()?;

            row.map(|row| {
                let member_ids = query_member_ids(conn, &row.id)?;
                chat_from_row(row, member_ids)
            })
            .transpose()
        })
    }

    pub fn list_chats_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.created_at
                 FROM chats c
                 JOIN chat_members cm ON cm.chat_id = c.id
                 WHERE cm.user_id = ?1
                 ORDER BY c.created_at",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], map_chat_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| {
                    let member_ids = query_member_ids(conn, &row.id)?;
                    chat_from_row(row, member_ids)
                })
                .collect()
        })
    }

    /// Adding an existing member is a no-op.
    pub fn add_chat_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                [chat_id.to_string(), user_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Deletes the chat together with its members and messages.
    pub fn delete_chat(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM chats WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, text, sent_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.id.to_string(),
                    message.chat_id.to_string(),
                    message.sender_id.to_string(),
                    message.text,
                    format_ts(message.sent_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Latest messages of a chat, most recent first.
    pub fn get_messages(&self, chat_id: Uuid, limit: u32) -> Result<Vec<ChatMessage>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, sender_id, text, sent_at
                 FROM messages
                 WHERE chat_id = ?1
                 ORDER BY sent_at DESC, rowid DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![chat_id.to_string(), limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    /// Case-insensitive substring search. Returns one page of matches plus
    /// the total number of matches in the chat.
    pub fn search_messages(
        &self,
        chat_id: Uuid,
        keyword: &str,
        limit: u32,
    ) -> Result<(Vec<ChatMessage>, u64)> {
        let (rows, total) = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, sender_id, text, sent_at
                 FROM messages
                 WHERE chat_id = ?1 AND instr(unicode_lower(text), unicode_lower(?2)) > 0
                 ORDER BY sent_at DESC, rowid DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![chat_id.to_string(), keyword, limit],
                    map_message_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1 AND instr(unicode_lower(text), unicode_lower(?2)) > 0",
                rusqlite::params![chat_id.to_string(), keyword],
                |row| row.get(0),
            )?;
            Ok((rows, total as u64))
        })?;

        let messages = rows
            .into_iter()
            .map(ChatMessage::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((messages, total))
    }

    /// Total message count for a chat and the count per sender.
    pub fn message_stats(&self, chat_id: Uuid) -> Result<(u64, Vec<(Uuid, u64)>)> {
        let (total, per_sender) = self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
                [chat_id.to_string()],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages WHERE chat_id = ?1 GROUP BY sender_id",
            )?;
            let per_sender = stmt
                .query_map([chat_id.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((total, per_sender))
        })?;

        let per_sender = per_sender
            .into_iter()
            .map(|(id, count)| Ok((parse_uuid(&id)?, count as u64)))
            .collect::<Result<Vec<_>>>()?;
        Ok((total as u64, per_sender))
    }
}

fn query_user(conn: &Connection, predicate: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, email, password_hash, role, created_at, updated_at FROM users WHERE {}",
        predicate
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], map_user_row).optional()?;
    Ok(row)
}

fn query_member_ids(conn: &Connection, chat_id: &str) -> Result<Vec<Uuid>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY user_id")?;
    let ids = stmt
        .query_map([chat_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    ids.iter().map(|id| parse_uuid(id)).collect()
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_chat_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        sent_at: row.get(4)?,
    })
}

impl TryFrom<UserRow> for Principal {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Principal {
            id: parse_uuid(&row.id)?,
            role: row.role.parse()?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
        })
    }
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(ChatMessage {
            id: parse_uuid(&row.id)?,
            chat_id: parse_uuid(&row.chat_id)?,
            sender_id: parse_uuid(&row.sender_id)?,
            sent_at: parse_ts(&row.sent_at)?,
            text: row.text,
        })
    }
}

fn chat_from_row(row: ChatRow, member_ids: Vec<Uuid>) -> Result<Chat> {
    Ok(Chat {
        id: parse_uuid(&row.id)?,
        created_at: parse_ts(&row.created_at)?,
        name: row.name,
        member_ids,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    s.parse().with_context(|| format!("Corrupt id '{}'", s))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(s).with_context(|| format!("Corrupt timestamp '{}'", s))?;
    Ok(ts.with_timezone(&Utc))
}

/// Fixed-width so that string ordering matches time ordering.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str) -> Principal {
        let now = Utc::now();
        Principal {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password_hash: "hash".to_string(),
            role: Role::User,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(chat_id: Uuid, sender_id: Uuid, text: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            text: text.to_string(),
            sent_at: DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    fn chat_with(db: &Database, members: &[Uuid]) -> Chat {
        db.create_chat(&Chat {
            id: Uuid::new_v4(),
            name: "general".into(),
            member_ids: members.to_vec(),
            created_at: Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn user_roundtrip_and_uniqueness() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("alice");
        db.create_user(&alice).unwrap();

        let found = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert_eq!(found.role, Role::User);
        assert!(db.username_exists("alice").unwrap());
        assert!(!db.username_exists("bob").unwrap());
        assert!(db.get_user_by_id(Uuid::new_v4()).unwrap().is_none());

        // UNIQUE(username)
        assert!(db.create_user(&user("alice")).is_err());

        assert!(db.set_user_role("alice", Role::Admin).unwrap());
        assert!(!db.set_user_role("bob", Role::Admin).unwrap());
        assert_eq!(db.get_user_by_id(alice.id).unwrap().unwrap().role, Role::Admin);
    }

    #[test]
    fn create_chat_skips_unknown_members() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("alice");
        db.create_user(&alice).unwrap();

        let chat = chat_with(&db, &[alice.id, Uuid::new_v4()]);
        assert_eq!(chat.member_ids, vec![alice.id]);

        let chats = db.list_chats_for_user(alice.id).unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, chat.id);
    }

    #[test]
    fn messages_newest_first_and_search() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("alice");
        let bob = user("bob");
        db.create_user(&alice).unwrap();
        db.create_user(&bob).unwrap();
        let chat = chat_with(&db, &[alice.id, bob.id]);

        db.insert_message(&message(chat.id, alice.id, "Hello there", 1)).unwrap();
        db.insert_message(&message(chat.id, bob.id, "hello back", 2)).unwrap();
        db.insert_message(&message(chat.id, alice.id, "lunch?", 3)).unwrap();

        let latest = db.get_messages(chat.id, 2).unwrap();
        let texts: Vec<_> = latest.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["lunch?", "hello back"]);

        let (hits, total) = db.search_messages(chat.id, "HELLO", 1).unwrap();
        assert_eq!(total, 2);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "hello back");

        let (total, per_sender) = db.message_stats(chat.id).unwrap();
        assert_eq!(total, 3);
        let alice_count = per_sender.iter().find(|(id, _)| *id == alice.id).unwrap().1;
        assert_eq!(alice_count, 2);
    }

    #[test]
    fn search_folds_non_ascii_case() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("alice");
        db.create_user(&alice).unwrap();
        let chat = chat_with(&db, &[alice.id]);

        db.insert_message(&message(chat.id, alice.id, "Привет всем", 1)).unwrap();
        db.insert_message(&message(chat.id, alice.id, "Grüße", 2)).unwrap();

        for keyword in ["ВСЕМ", "всем", "привет"] {
            let (hits, total) = db.search_messages(chat.id, keyword, 10).unwrap();
            assert_eq!(total, 1, "{}", keyword);
            assert_eq!(hits[0].text, "Привет всем");
        }
        let (_, total) = db.search_messages(chat.id, "GRÜSSE", 10).unwrap();
        assert_eq!(total, 0);
        let (_, total) = db.search_messages(chat.id, "GRÜ", 10).unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn delete_chat_cascades_messages() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("alice");
        db.create_user(&alice).unwrap();
        let chat = chat_with(&db, &[alice.id]);
        db.insert_message(&message(chat.id, alice.id, "bye", 1)).unwrap();

        assert!(db.delete_chat(chat.id).unwrap());
        assert!(!db.delete_chat(chat.id).unwrap());
        assert!(db.get_chat(chat.id).unwrap().is_none());
        assert_eq!(db.message_stats(chat.id).unwrap().0, 0);
    }
}
