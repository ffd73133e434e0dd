use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::AccountStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRecord {
    pub id: String,
    pub email: String,
    pub created_at: String,
    pub pdfs: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AccountsRepoError {
    #[error("account not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct SqliteAccountStore {
    db_path: PathBuf,
}

impl SqliteAccountStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn initialize(&self) -> Result<(), AccountsRepoError> {
        self.with_connection(|_| Ok(()))
    }

    fn with_connection<T, F>(&self, func: F) -> Result<T, AccountsRepoError>
    where
        F: FnOnce(&Connection) -> Result<T, AccountsRepoError>,
    {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(self.db_path.as_path())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        ensure_schema(&conn)?;
        func(&conn)
    }

    pub fn create_account(&self, email: &str) -> Result<AccountRecord, AccountsRepoError> {
        let email = normalize_email(email).ok_or_else(|| {
            AccountsRepoError::Validation(String::from("A valid email is required"))
        })?;
        self.with_connection(|conn| {
            let existing = conn
                .query_row(
                    "SELECT id FROM accounts WHERE email = ?1",
                    params![email],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(AccountsRepoError::Validation(String::from(
                    "Email already exists",
                )));
            }

            let record = AccountRecord {
                id: Uuid::new_v4().to_string(),
                email: email.clone(),
                created_at: now_iso(),
                pdfs: Vec::new(),
            };
            conn.execute(
                "INSERT INTO accounts (id, email, created_at) VALUES (?1, ?2, ?3)",
                params![record.id, record.email, record.created_at],
            )?;
            Ok(record)
        })
    }
}

impl AccountStore for SqliteAccountStore {
    fn find_account(&self, user_id: &str) -> Result<Option<AccountRecord>, AccountsRepoError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Ok(None);
        }
        self.with_connection(|conn| {
            let Some((id, email, created_at)) = conn
                .query_row(
                    "SELECT id, email, created_at FROM accounts WHERE id = ?1",
                    params![user_id],
                    |row| {
                        Ok((
                            row.get::<_, String>("id")?,
                            row.get::<_, String>("email")?,
                            row.get::<_, String>("created_at")?,
                        ))
                    },
                )
                .optional()?
            else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "
                SELECT artifact_url
                FROM account_artifacts
                WHERE account_id = ?1
                ORDER BY seq ASC
                ",
            )?;
            let pdfs = stmt
                .query_map(params![id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(AccountRecord {
                id,
                email,
                created_at,
                pdfs,
            }))
        })
    }

    fn append_artifact(&self, user_id: &str, artifact_url: &str) -> Result<(), AccountsRepoError> {
        let artifact_url = artifact_url.trim();
        if artifact_url.is_empty() {
            return Err(AccountsRepoError::Validation(String::from(
                "artifact url must not be empty",
            )));
        }
        self.with_connection(|conn| {
            // Single statement: the account check and the append commit together.
            let inserted = conn.execute(
                "
                INSERT INTO account_artifacts (account_id, artifact_url, created_at)
                SELECT id, ?2, ?3 FROM accounts WHERE id = ?1
                ",
                params![user_id.trim(), artifact_url, now_iso()],
            )?;
            if inserted == 0 {
                return Err(AccountsRepoError::NotFound);
            }
            Ok(())
        })
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), AccountsRepoError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
          id TEXT PRIMARY KEY,
          email TEXT NOT NULL UNIQUE,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS account_artifacts (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
          artifact_url TEXT NOT NULL,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_account_artifacts_account
          ON account_artifacts(account_id, seq);
        ",
    )?;
    Ok(())
}

fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_ascii_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(email)
}

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn test_store() -> SqliteAccountStore {
        let root = std::env::temp_dir().join(format!("vidsum_accounts_{}", Uuid::new_v4()));
        let store = SqliteAccountStore::new(root.join("var/backend/accounts.db"));
        store.initialize().expect("store should initialize");
        store
    }

    #[test]
    fn created_account_starts_without_artifacts() {
        let store = test_store();
        let created = store
            .create_account("Student@Example.com")
            .expect("account should be created");
        assert_eq!(created.email, "student@example.com");

        let found = store
            .find_account(created.id.as_str())
            .expect("lookup should succeed")
            .expect("account should exist");
        assert_eq!(found, created);
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let store = test_store();
        store.create_account("a@b.io").expect("first create");
        let err = store
            .create_account(" A@B.io ")
            .expect_err("duplicate email should fail");
        assert!(matches!(err, AccountsRepoError::Validation(ref msg) if msg == "Email already exists"));
    }

    #[test]
    fn malformed_email_is_rejected() {
        let store = test_store();
        for raw in ["", "no-at-sign", "@domain", "local@", "a@b@c"] {
            assert!(matches!(
                store.create_account(raw),
                Err(AccountsRepoError::Validation(_))
            ));
        }
    }

    #[test]
    fn artifacts_are_returned_in_append_order_without_dedup() {
        let store = test_store();
        let account = store.create_account("order@example.com").unwrap();

        store
            .append_artifact(account.id.as_str(), "https://store/a.pdf")
            .unwrap();
        store
            .append_artifact(account.id.as_str(), "https://store/b.pdf")
            .unwrap();
        store
            .append_artifact(account.id.as_str(), "https://store/a.pdf")
            .unwrap();

        let found = store.find_account(account.id.as_str()).unwrap().unwrap();
        assert_eq!(
            found.pdfs,
            vec![
                String::from("https://store/a.pdf"),
                String::from("https://store/b.pdf"),
                String::from("https://store/a.pdf"),
            ]
        );
    }

    #[test]
    fn append_to_unknown_account_is_not_found() {
        let store = test_store();
        let err = store
            .append_artifact("missing", "https://store/x.pdf")
            .expect_err("unknown account should fail");
        assert!(matches!(err, AccountsRepoError::NotFound));
    }

    #[test]
    fn unknown_or_blank_user_id_finds_nothing() {
        let store = test_store();
        assert!(store.find_account("missing").unwrap().is_none());
        assert!(store.find_account("   ").unwrap().is_none());
    }

    #[test]
    fn concurrent_appends_are_all_recorded() {
        let store = Arc::new(test_store());
        let account = store.create_account("busy@example.com").unwrap();

        let handles = (0..8)
            .map(|i| {
                let store = store.clone();
                let id = account.id.clone();
                std::thread::spawn(move || {
                    store
                        .append_artifact(id.as_str(), format!("https://store/{i}.pdf").as_str())
                        .expect("concurrent append should succeed");
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("append thread panicked");
        }

        let found = store.find_account(account.id.as_str()).unwrap().unwrap();
        assert_eq!(found.pdfs.len(), 8);
    }
}
