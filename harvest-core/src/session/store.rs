use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

use crate::browser::SessionCookie;
use crate::sqlite::configure_connection;

const SESSION_SCHEMA: &str = include_str!("../../../sql/sessions.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A cookie jar as persisted for one site domain.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub domain: String,
    pub cookies: Vec<SessionCookie>,
    pub captured_at: DateTime<Utc>,
}

/// Cookie persistence keyed by site domain, one row per domain. Writes
/// replace the whole jar atomically, so concurrent jobs on the same site
/// converge on whichever jar was written last.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        }
    }

    pub fn read_only(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_ONLY,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(SESSION_SCHEMA)?;
        Ok(())
    }

    pub fn load(&self, domain: &str) -> StoreResult<Option<PersistedSession>> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT cookies, captured_at FROM sessions WHERE domain = ?1",
                params![domain],
                |row| {
                    let cookies: String = row.get(0)?;
                    let captured_at: DateTime<Utc> = row.get(1)?;
                    Ok((cookies, captured_at))
                },
            )
            .optional()?;
        match row {
            Some((encoded, captured_at)) => Ok(Some(PersistedSession {
                domain: domain.to_string(),
                cookies: serde_json::from_str(&encoded)?,
                captured_at,
            })),
            None => Ok(None),
        }
    }

    /// Replaces the persisted jar for `domain` in a single statement, so a
    /// reader never observes a mix of two captures.
    pub fn replace(&self, domain: &str, cookies: &[SessionCookie]) -> StoreResult<()> {
        let conn = self.open()?;
        let encoded = serde_json::to_string(cookies)?;
        conn.execute(
            "INSERT INTO sessions (domain, cookies, captured_at) VALUES (?1, ?2, ?3)\n\
             ON CONFLICT(domain) DO UPDATE SET cookies = excluded.cookies,\n\
                 captured_at = excluded.captured_at",
            params![domain, encoded, Utc::now()],
        )?;
        Ok(())
    }

    /// Drops the persisted jar for `domain`. Returns whether a row existed.
    pub fn clear(&self, domain: &str) -> StoreResult<bool> {
        let conn = self.open()?;
        let removed = conn.execute("DELETE FROM sessions WHERE domain = ?1", params![domain])?;
        Ok(removed > 0)
    }

    pub fn domains(&self) -> StoreResult<Vec<PersistedSession>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT domain, cookies, captured_at FROM sessions ORDER BY domain")?;
        let rows = stmt.query_map([], |row| {
            let domain: String = row.get(0)?;
            let cookies: String = row.get(1)?;
            let captured_at: DateTime<Utc> = row.get(2)?;
            Ok((domain, cookies, captured_at))
        })?;
        let mut sessions = Vec::new();
        for row in rows {
            let (domain, encoded, captured_at) = row?;
            sessions.push(PersistedSession {
                domain,
                cookies: serde_json::from_str(&encoded)?,
                captured_at,
            });
        }
        Ok(sessions)
    }
}
