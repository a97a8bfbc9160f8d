//! SQLite-backed metadata store.
//!
//! One row per cache entry, keyed by the cache key, with a secondary index
//! on the last-accessed timestamp for ordered enumeration. Connections are
//! opened per operation; the store keeps no handle between calls, so a
//! corrupt database file can be deleted out from under it at any time.

use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use faststr::FastStr;
use http::{Method, StatusCode};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use thiserror::Error;

use super::metadata::{headers_from_json, headers_to_json, HttpCacheMetadata};
use celer::error::{error_code, subgroup};

/// Errors of the metadata store.
#[derive(Error, Debug)]
pub enum SqlError {
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("sql execution failed: {0}")]
    Execution(String),
    #[error("cache database is corrupt")]
    DatabaseCorrupt,
}

impl SqlError {
    pub fn code(&self) -> u32 {
        let code = match self {
            SqlError::IllegalArgument(_) => 0,
            SqlError::IllegalState(_) => 1,
            SqlError::Execution(_) => 2,
            SqlError::DatabaseCorrupt => 3,
        };
        error_code(subgroup::DB, code)
    }
}

/// Key and body size of one enumerated row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumerationParam {
    pub key: FastStr,
    pub response_body_size: u64,
}

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS cache_metadata (
    key                  TEXT PRIMARY KEY,
    url                  TEXT NOT NULL,
    method               TEXT NOT NULL,
    status_code          INTEGER NOT NULL,
    status_message       TEXT NOT NULL,
    response_headers     TEXT NOT NULL,
    response_body_size   INTEGER NOT NULL,
    sent_request_at      INTEGER NOT NULL,
    received_response_at INTEGER NOT NULL,
    created_at           INTEGER NOT NULL,
    last_accessed_at     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_metadata_last_accessed
    ON cache_metadata (last_accessed_at);
";

/// Typed access to the `cache.db` file under the cache root.
pub struct HttpCacheDatabase {
    db_path: PathBuf,
    corrupted: AtomicBool,
}

impl HttpCacheDatabase {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            corrupted: AtomicBool::new(false),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Clears and returns the corruption latch.
    ///
    /// The latch is set whenever any operation (including one invoked from
    /// inside a strategy listener) observes a corrupt database, so the
    /// owning cache can self-heal after the fact.
    pub fn take_corruption(&self) -> bool {
        self.corrupted.swap(false, Ordering::SeqCst)
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<HttpCacheMetadata>, SqlError> {
        let conn = self.open()?;
        let raw = conn
            .query_row(
                "SELECT key, url, method, status_code, status_message, response_headers, \
                 response_body_size, sent_request_at, received_response_at, created_at, \
                 last_accessed_at FROM cache_metadata WHERE key = ?1",
                params![key],
                |row| {
                    Ok(RawRow {
                        key: row.get(0)?,
                        url: row.get(1)?,
                        method: row.get(2)?,
                        status_code: row.get(3)?,
                        status_message: row.get(4)?,
                        response_headers: row.get(5)?,
                        response_body_size: row.get(6)?,
                        sent_request_at: row.get(7)?,
                        received_response_at: row.get(8)?,
                        created_at: row.get(9)?,
                        last_accessed_at: row.get(10)?,
                    })
                },
            )
            .optional()
            .map_err(|e| self.convert(e))?;
        raw.map(RawRow::into_metadata).transpose()
    }

    pub fn update_metadata(&self, key: &str, metadata: &HttpCacheMetadata) -> Result<(), SqlError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_metadata (key, url, method, status_code, \
             status_message, response_headers, response_body_size, sent_request_at, \
             received_response_at, created_at, last_accessed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                key,
                metadata.url.as_str(),
                metadata.method.as_str(),
                u16::from(metadata.status_code) as i64,
                metadata.status_message,
                headers_to_json(&metadata.response_headers),
                metadata.response_body_size as i64,
                metadata.sent_request_at as i64,
                metadata.received_response_at as i64,
                metadata.created_at as i64,
                metadata.last_accessed_at as i64,
            ],
        )
        .map_err(|e| self.convert(e))?;
        Ok(())
    }

    /// Returns whether a row existed.
    pub fn delete_metadata(&self, key: &str) -> Result<bool, SqlError> {
        let conn = self.open()?;
        let deleted = conn
            .execute("DELETE FROM cache_metadata WHERE key = ?1", params![key])
            .map_err(|e| self.convert(e))?;
        Ok(deleted > 0)
    }

    pub fn update_last_accessed(&self, key: &str, epoch_secs: u64) -> Result<bool, SqlError> {
        let conn = self.open()?;
        let updated = conn
            .execute(
                "UPDATE cache_metadata SET last_accessed_at = ?1 WHERE key = ?2",
                params![epoch_secs as i64, key],
            )
            .map_err(|e| self.convert(e))?;
        Ok(updated > 0)
    }

    /// Streams rows ordered by last access, oldest first.
    ///
    /// The iteration is finite and non-restartable; a listener returning
    /// `false` stops it, reported as `Ok(false)`.
    pub fn enumerate(
        &self,
        listener: &mut dyn FnMut(EnumerationParam) -> bool,
    ) -> Result<bool, SqlError> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT key, response_body_size FROM cache_metadata \
                 ORDER BY last_accessed_at ASC",
            )
            .map_err(|e| self.convert(e))?;
        let mut rows = stmt.query([]).map_err(|e| self.convert(e))?;
        while let Some(row) = rows.next().map_err(|e| self.convert(e))? {
            let key: String = row.get(0).map_err(|e| self.convert(e))?;
            let response_body_size: i64 = row.get(1).map_err(|e| self.convert(e))?;
            let param = EnumerationParam {
                key: key.into(),
                response_body_size: response_body_size as u64,
            };
            if !listener(param) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Removes the database file itself. Missing file is fine.
    pub fn delete_database_file(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.db_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn open(&self) -> Result<Connection, SqlError> {
        let conn = Connection::open(&self.db_path).map_err(|e| self.convert(e))?;
        conn.execute_batch(SCHEMA).map_err(|e| self.convert(e))?;
        Ok(conn)
    }

    fn convert(&self, e: rusqlite::Error) -> SqlError {
        if is_corruption(&e) {
            tracing::warn!("cache database reported corruption: {e}");
            self.corrupted.store(true, Ordering::SeqCst);
            SqlError::DatabaseCorrupt
        } else {
            SqlError::Execution(e.to_string())
        }
    }
}

fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == ErrorCode::DatabaseCorrupt || inner.code == ErrorCode::NotADatabase
    )
}

struct RawRow {
    key: String,
    url: String,
    method: String,
    status_code: i64,
    status_message: String,
    response_headers: String,
    response_body_size: i64,
    sent_request_at: i64,
    received_response_at: i64,
    created_at: i64,
    last_accessed_at: i64,
}

impl RawRow {
    fn into_metadata(self) -> Result<HttpCacheMetadata, SqlError> {
        let method = self
            .method
            .parse::<Method>()
            .map_err(|e| SqlError::Execution(format!("stored method is malformed: {e}")))?;
        let status_code = StatusCode::from_u16(self.status_code as u16)
            .map_err(|e| SqlError::Execution(format!("stored status code is malformed: {e}")))?;
        Ok(HttpCacheMetadata {
            key: self.key.into(),
            url: self.url.into(),
            method,
            status_code,
            status_message: self.status_message,
            response_headers: headers_from_json(&self.response_headers),
            response_body_size: self.response_body_size as u64,
            sent_request_at: self.sent_request_at as u64,
            received_response_at: self.received_response_at as u64,
            created_at: self.created_at as u64,
            last_accessed_at: self.last_accessed_at as u64,
        })
    }
}
