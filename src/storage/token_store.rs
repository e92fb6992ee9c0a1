use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use thiserror::Error;

use crate::auth::TokenProvider;

use super::database::Database;
use super::ensure_parent_dir;

const JWT_KEY: &str = "jwt";

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential store lock poisoned")]
    Poisoned,
}

/// On-disk home of the signed-in user's JWT.
pub struct TokenStore {
    db: Mutex<Database>,
}

impl TokenStore {
    /// Opens (and creates if needed) the credential database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TokenStoreError> {
        ensure_parent_dir(path.as_ref())?;
        Ok(Self::from_db(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, TokenStoreError> {
        Ok(Self::from_db(Database::in_memory()?))
    }

    fn from_db(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Replace the stored token
    pub fn save_token(&self, token: &str) -> Result<(), TokenStoreError> {
        let db = self.db.lock().map_err(|_| TokenStoreError::Poisoned)?;
        db.connection().execute(
            "INSERT OR REPLACE INTO credentials (key, value, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))",
            params![JWT_KEY, token],
        )?;
        Ok(())
    }

    pub fn load_token(&self) -> Result<Option<String>, TokenStoreError> {
        let db = self.db.lock().map_err(|_| TokenStoreError::Poisoned)?;
        let token = db
            .connection()
            .query_row(
                "SELECT value FROM credentials WHERE key = ?1",
                params![JWT_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }

    /// Sign out: forget the token
    pub fn clear(&self) -> Result<(), TokenStoreError> {
        let db = self.db.lock().map_err(|_| TokenStoreError::Poisoned)?;
        db.connection()
            .execute("DELETE FROM credentials WHERE key = ?1", params![JWT_KEY])?;
        Ok(())
    }
}

#[async_trait]
impl TokenProvider for TokenStore {
    async fn bearer_token(&self) -> Option<String> {
        match self.load_token() {
            Ok(token) => token,
            Err(err) => {
                log::warn!("Failed to read stored token: {err}");
                None
            }
        }
    }
}
