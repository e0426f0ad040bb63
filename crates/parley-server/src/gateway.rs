//! Credential gateway: identity checks and the message audit sink.
//!
//! The relay core only ever talks to the [`CredentialGateway`] trait; the
//! SQLite implementation owns the schema, secret digesting, and the
//! reserved sentinel id used to record broadcast recipients. Audit failures
//! are logged and never abort message delivery.

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{ParleyError, ParleyResult, BROADCAST_TARGET};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};

/// Identity and audit operations consumed by the relay core.
///
/// `authenticate` is called concurrently from many handshake tasks and must
/// not block the admission tick; implementations push blocking work onto the
/// blocking pool.
#[async_trait]
pub trait CredentialGateway: Send + Sync {
    /// Check a username/secret pair against the store.
    async fn authenticate(&self, username: &str, secret: &str) -> bool;

    /// Whether the username exists in the store.
    async fn user_exists(&self, username: &str) -> bool;

    /// Create a new user. Returns `false` if the username is taken or the
    /// store rejects the write.
    async fn register(&self, username: &str, secret: &str) -> bool;

    /// Record a delivered message for auditing. `recipient` may be the
    /// broadcast marker; how that is encoded is the store's concern.
    async fn record_message(&self, sender: &str, recipient: &str, content: &str) -> bool;
}

/// SQLite-backed credential store.
///
/// Secrets are stored as hex-encoded SHA-256 digests, never as plaintext.
/// Broadcast recipients are recorded with a reserved sentinel id in the
/// audit table; the sentinel never leaves this module.
pub struct SqliteCredentials {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

/// Audit-table id standing in for the broadcast recipient.
const BROADCAST_SENTINEL: i64 = -1;

impl SqliteCredentials {
    /// Open (or create) the store at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> ParleyResult<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| ParleyError::Store(format!("cannot open {}: {e}", path.display())))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                 id       INTEGER PRIMARY KEY,
                 username TEXT NOT NULL UNIQUE,
                 secret   TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS messages (
                 id           INTEGER PRIMARY KEY,
                 content      TEXT NOT NULL,
                 sender_id    INTEGER NOT NULL,
                 recipient_id INTEGER NOT NULL,
                 sent_at      TEXT NOT NULL DEFAULT (datetime('now'))
             );",
        )
        .map_err(|e| ParleyError::Store(format!("schema init failed: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the database on the blocking pool.
    ///
    /// Logs errors but does not propagate them — store failures must not
    /// break the relay.
    async fn with_db<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await;

        match result {
            Ok(Ok(r)) => Some(r),
            Ok(Err(e)) => {
                error!(error = %e, "credential store error");
                None
            }
            Err(e) => {
                error!(error = %e, "credential store task failed");
                None
            }
        }
    }

    fn digest(secret: &str) -> String {
        hex::encode(Sha256::digest(secret.as_bytes()))
    }
}

#[async_trait]
impl CredentialGateway for SqliteCredentials {
    async fn authenticate(&self, username: &str, secret: &str) -> bool {
        let username = username.to_string();
        let digest = Self::digest(secret);
        self.with_db(move |conn| {
            conn.query_row(
                "SELECT 1 FROM users WHERE username = ?1 AND secret = ?2",
                rusqlite::params![username, digest],
                |_| Ok(()),
            )
            .map(|_| true)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(false),
                other => Err(other),
            })
        })
        .await
        .unwrap_or(false)
    }

    async fn user_exists(&self, username: &str) -> bool {
        let username = username.to_string();
        self.with_db(move |conn| {
            conn.query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                rusqlite::params![username],
                |_| Ok(()),
            )
            .map(|_| true)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(false),
                other => Err(other),
            })
        })
        .await
        .unwrap_or(false)
    }

    async fn register(&self, username: &str, secret: &str) -> bool {
        if self.user_exists(username).await {
            return false;
        }
        let username = username.to_string();
        let digest = Self::digest(secret);
        self.with_db(move |conn| {
            conn.execute(
                "INSERT INTO users (username, secret) VALUES (?1, ?2)",
                rusqlite::params![username, digest],
            )
        })
        .await
        .map(|rows| rows > 0)
        .unwrap_or(false)
    }

    async fn record_message(&self, sender: &str, recipient: &str, content: &str) -> bool {
        let sender = sender.to_string();
        let recipient = recipient.to_string();
        let content = content.to_string();
        let recorded = self
            .with_db(move |conn| {
                let sender_id: i64 = conn.query_row(
                    "SELECT id FROM users WHERE username = ?1",
                    rusqlite::params![sender],
                    |row| row.get(0),
                )?;
                let recipient_id: i64 = if recipient == BROADCAST_TARGET {
                    BROADCAST_SENTINEL
                } else {
                    conn.query_row(
                        "SELECT id FROM users WHERE username = ?1",
                        rusqlite::params![recipient],
                        |row| row.get(0),
                    )?
                };
                conn.execute(
                    "INSERT INTO messages (content, sender_id, recipient_id) VALUES (?1, ?2, ?3)",
                    rusqlite::params![content, sender_id, recipient_id],
                )
            })
            .await
            .map(|rows| rows > 0)
            .unwrap_or(false);

        if !recorded {
            warn!("message audit write failed");
        }
        recorded
    }
}

/// In-memory credential store for tests and local development.
pub struct MemoryCredentials {
    users: Mutex<std::collections::HashMap<String, String>>,
    messages: Mutex<Vec<(String, String, String)>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(std::collections::HashMap::new()),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Seed the store with `(username, secret)` pairs.
    pub fn with_users(users: &[(&str, &str)]) -> Self {
        let store = Self::new();
        {
            let mut map = store.users.lock();
            for (name, secret) in users {
                map.insert(name.to_string(), secret.to_string());
            }
        }
        store
    }

    /// Snapshot of recorded `(sender, recipient, content)` audit entries.
    pub fn recorded(&self) -> Vec<(String, String, String)> {
        self.messages.lock().clone()
    }
}

impl Default for MemoryCredentials {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialGateway for MemoryCredentials {
    async fn authenticate(&self, username: &str, secret: &str) -> bool {
        self.users.lock().get(username).map(String::as_str) == Some(secret)
    }

    async fn user_exists(&self, username: &str) -> bool {
        self.users.lock().contains_key(username)
    }

    async fn register(&self, username: &str, secret: &str) -> bool {
        let mut users = self.users.lock();
        if users.contains_key(username) {
            return false;
        }
        users.insert(username.to_string(), secret.to_string());
        true
    }

    async fn record_message(&self, sender: &str, recipient: &str, content: &str) -> bool {
        self.messages.lock().push((
            sender.to_string(),
            recipient.to_string(),
            content.to_string(),
        ));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_register_and_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCredentials::open(&dir.path().join("test.db")).unwrap();

        assert!(!store.user_exists("alice").await);
        assert!(store.register("alice", "hunter2").await);
        assert!(store.user_exists("alice").await);

        // Duplicate registration refused
        assert!(!store.register("alice", "other").await);

        assert!(store.authenticate("alice", "hunter2").await);
        assert!(!store.authenticate("alice", "wrong").await);
        assert!(!store.authenticate("nobody", "hunter2").await);
    }

    #[tokio::test]
    async fn sqlite_never_stores_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCredentials::open(&dir.path().join("test.db")).unwrap();
        assert!(store.register("alice", "hunter2").await);

        let stored: String = store
            .with_db(|conn| {
                conn.query_row(
                    "SELECT secret FROM users WHERE username = 'alice'",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_ne!(stored, "hunter2");
        assert_eq!(stored.len(), 64); // hex sha-256
    }

    #[tokio::test]
    async fn sqlite_audit_broadcast_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCredentials::open(&dir.path().join("test.db")).unwrap();
        assert!(store.register("alice", "a").await);
        assert!(store.register("bob", "b").await);

        assert!(store.record_message("alice", "bob", "hi bob").await);
        assert!(store.record_message("alice", BROADCAST_TARGET, "hi all").await);
        // Unknown sender: audit fails, but only as a return value
        assert!(!store.record_message("ghost", "bob", "boo").await);

        let recipients: Vec<i64> = store
            .with_db(|conn| {
                let mut stmt = conn.prepare("SELECT recipient_id FROM messages ORDER BY id")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await
            .unwrap();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[1], BROADCAST_SENTINEL);
    }

    #[tokio::test]
    async fn memory_store_basics() {
        let store = MemoryCredentials::with_users(&[("alice", "pw")]);
        assert!(store.authenticate("alice", "pw").await);
        assert!(!store.authenticate("alice", "nope").await);
        assert!(store.register("bob", "pw2").await);
        assert!(!store.register("bob", "pw3").await);

        store.record_message("alice", "ALL", "hello").await;
        assert_eq!(store.recorded().len(), 1);
    }
}
