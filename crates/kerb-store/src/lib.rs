//! On-device chat store for offline access and history.
//!
//! Wraps a single `rusqlite::Connection` behind a mutex; the engine
//! serializes concurrent writes, callers get read-after-write consistency
//! only by sequencing their own calls.

pub mod migrations;
pub mod models;
pub mod queries;

mod error;

pub use error::{Result, StoreError};
pub use models::{ConversationRow, MessageRow};

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

pub struct ChatStore {
    conn: Mutex<Connection>,
}

impl ChatStore {
    /// Open (or create) the store at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path))
    }

    /// In-memory store. Used by tests and as a seed when the device store
    /// cannot be opened.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self> {
        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        match path {
            Some(p) => info!("Chat store opened at {}", p.display()),
            None => info!("Chat store opened in memory"),
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }
}
