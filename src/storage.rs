/// Local storage for client state
///
/// Keeps the last signed-in session so the terminal client can resume without
/// a password, and per-user UI preferences such as the last opened
/// conversation. Backend data is never cached here.

use crate::error::Result;
use crate::models::{ConversationId, UserId};
use crate::session::Session;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

const LAST_CONVERSATION: &str = "last_conversation";

/// Local storage manager for SQLite database
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    /// Open (or create) the database at the given path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self { conn })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                user_id TEXT NOT NULL,
                email TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT,
                saved_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS preferences (
                user_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            );
            "#,
        )?;
        Ok(())
    }

    /// Persist the current session, replacing any previous one
    pub fn save_session(&self, session: &Session) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions (slot, user_id, email, access_token, refresh_token, expires_at, saved_at) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            (
                session.user_id.as_str(),
                &session.email,
                &session.access_token,
                &session.refresh_token,
                session.expires_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Session>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, email, access_token, refresh_token, expires_at FROM sessions WHERE slot = 1",
        )?;

        let result = stmt
            .query_row([], |row| {
                let expires_at: Option<String> = row.get(4)?;
                Ok(Session {
                    user_id: UserId::from(row.get::<_, String>(0)?),
                    email: row.get(1)?,
                    access_token: row.get(2)?,
                    refresh_token: row.get(3)?,
                    expires_at: expires_at
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|t| t.with_timezone(&Utc)),
                })
            })
            .optional()?;

        Ok(result)
    }

    pub fn clear_session(&self) -> Result<()> {
        self.conn.execute("DELETE FROM sessions", [])?;
        Ok(())
    }

    fn set_preference(&self, user_id: &UserId, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO preferences (user_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
            (user_id.as_str(), key, value, Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    fn preference(&self, user_id: &UserId, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM preferences WHERE user_id = ?1 AND key = ?2",
                (user_id.as_str(), key),
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn save_last_conversation(&self, user_id: &UserId, conversation_id: &ConversationId) -> Result<()> {
        self.set_preference(user_id, LAST_CONVERSATION, conversation_id.as_str())
    }

    pub fn last_conversation(&self, user_id: &UserId) -> Result<Option<ConversationId>> {
        Ok(self
            .preference(user_id, LAST_CONVERSATION)?
            .map(ConversationId::from))
    }

    pub fn clear_last_conversation(&self, user_id: &UserId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM preferences WHERE user_id = ?1 AND key = ?2",
            (user_id.as_str(), LAST_CONVERSATION),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn session() -> Session {
        Session {
            user_id: UserId::from("u1"),
            email: "ada@uni.edu".to_string(),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_initialize_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path().join("state.db")).unwrap();

        let mut stmt = store
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"preferences".to_string()));
    }

    #[test]
    fn test_session_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.db");
        let saved = session();
        LocalStore::new(&path).unwrap().save_session(&saved).unwrap();

        let loaded = LocalStore::new(&path).unwrap().load_session().unwrap().unwrap();
        assert_eq!(loaded.user_id, saved.user_id);
        assert_eq!(loaded.refresh_token, "refresh");
        assert_eq!(
            loaded.expires_at.map(|t| t.timestamp()),
            saved.expires_at.map(|t| t.timestamp())
        );
    }

    #[test]
    fn test_only_one_session_is_kept() {
        let store = LocalStore::in_memory().unwrap();
        store.save_session(&session()).unwrap();
        let mut other = session();
        other.user_id = UserId::from("u2");
        store.save_session(&other).unwrap();
        assert_eq!(store.load_session().unwrap().unwrap().user_id.as_str(), "u2");

        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn test_last_conversation_is_per_user() {
        let store = LocalStore::in_memory().unwrap();
        let u1 = UserId::from("u1");
        let u2 = UserId::from("u2");
        store.save_last_conversation(&u1, &ConversationId::from("c1")).unwrap();

        assert_eq!(store.last_conversation(&u1).unwrap(), Some(ConversationId::from("c1")));
        assert_eq!(store.last_conversation(&u2).unwrap(), None);

        store.clear_last_conversation(&u1).unwrap();
        assert_eq!(store.last_conversation(&u1).unwrap(), None);
    }
}
