use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::Serialize;

use super::{parse_timestamp, Database};
use crate::error::PortalError;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

const USER_COLUMNS: &str = "id, username, email, password_hash, is_admin, created_at, last_login";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let created_raw: String = row.get(5)?;
    let last_raw: Option<String> = row.get(6)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        is_admin: row.get(4)?,
        created_at: parse_timestamp(&created_raw, 5)?,
        last_login: match last_raw {
            Some(raw) => Some(parse_timestamp(&raw, 6)?),
            None => None,
        },
    })
}

#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, PortalError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(PortalError::Validation("username is empty".into()));
        }
        let email = email.trim();
        if email.is_empty() {
            return Err(PortalError::Validation("email is empty".into()));
        }
        let created_at = Utc::now();
        let id = self.db.with(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password_hash, is_admin, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    username,
                    email,
                    password_hash,
                    is_admin,
                    created_at.to_rfc3339()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
            created_at,
            last_login: None,
        })
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<User>, PortalError> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username = ?1"
            ))?;
            let mut rows = stmt.query_map(rusqlite::params![username], user_from_row)?;
            rows.next().transpose()
        })
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>, PortalError> {
        self.db.with(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"))?;
            let mut rows = stmt.query_map(rusqlite::params![email], user_from_row)?;
            rows.next().transpose()
        })
    }

    pub fn touch_last_login(&self, user_id: i64) -> Result<(), PortalError> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                rusqlite::params![Utc::now().to_rfc3339(), user_id],
            )?;
            Ok(())
        })
    }

    /// Bootstrap path: creates the admin account once if it does not exist.
    /// The hash is supplied pre-computed so hashing policy stays outside the
    /// portal.
    pub fn ensure_admin(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, PortalError> {
        if let Some(existing) = self.find_by_username(username)? {
            return Ok(existing);
        }
        self.create(username, email, password_hash, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        UserStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn create_and_find_round_trips() {
        let store = store();
        let created = store
            .create("alice", "alice@example.com", "sha256$aa", false)
            .unwrap();
        let found = store.find_by_username("alice").unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.email, "alice@example.com");
        assert_eq!(found.password_hash, "sha256$aa");
        assert!(!found.is_admin);
        assert!(found.last_login.is_none());
        assert!(store.find_by_username("nobody").unwrap().is_none());

        let by_email = store.find_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, created.id);
        assert!(store.find_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_usernames_and_emails_are_rejected_by_the_schema() {
        let store = store();
        store.create("alice", "alice@example.com", "h", false).unwrap();
        assert!(store.create("alice", "other@example.com", "h2", false).is_err());
        assert!(store.create("bob", "alice@example.com", "h3", false).is_err());
    }

    #[test]
    fn ensure_admin_is_idempotent() {
        let store = store();
        let first = store.ensure_admin("admin", "admin@example.com", "h").unwrap();
        assert!(first.is_admin);
        let second = store
            .ensure_admin("admin", "admin@example.com", "different")
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.password_hash, "h");
    }

    #[test]
    fn touch_last_login_sets_the_column() {
        let store = store();
        let user = store.create("alice", "alice@example.com", "h", false).unwrap();
        store.touch_last_login(user.id).unwrap();
        let found = store.find_by_username("alice").unwrap().unwrap();
        assert!(found.last_login.is_some());
    }
}
