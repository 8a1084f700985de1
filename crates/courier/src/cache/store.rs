//! SQLite persistence for the response cache.
//!
//! One connection per process, guarded by a mutex; every mutation runs in an
//! explicit transaction so the periodic cleanup sweep cannot race a store or
//! touch.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::CourierError;

use super::CacheEntry;

/// Bumped whenever the schema changes; a mismatched on-disk stamp recreates
/// the whole cache.
const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CleanupOutcome {
    /// Total size was under the high watermark, nothing to do.
    Untouched,
    /// Evicted this many coldest entries.
    Evicted(usize),
    /// The watermark split could not be satisfied, the cache was cleared.
    Cleared,
}

pub(crate) struct SqliteStore {
    conn: Mutex<Connection>,
    high_watermark: u64,
    low_watermark: u64,
}

impl SqliteStore {
    pub(crate) fn open(
        path: &Path,
        high_watermark: u64,
        low_watermark: u64,
    ) -> Result<Self, CourierError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version != SCHEMA_VERSION {
            if version != 0 {
                debug!(
                    found = version,
                    expected = SCHEMA_VERSION,
                    "Cache schema version mismatch, recreating"
                );
            }
            conn.execute_batch(
                r#"
                DROP TABLE IF EXISTS cache_response_header;
                DROP TABLE IF EXISTS cache_response_data;
                DROP TABLE IF EXISTS cache_response;
                "#,
            )?;
            Self::init_schema(&conn)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
            high_watermark,
            low_watermark,
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_response (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              url TEXT NOT NULL UNIQUE,
              content_size INTEGER NOT NULL,
              time_stamp INTEGER NOT NULL,
              expires INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_response_data (
              response_id INTEGER PRIMARY KEY,
              body BLOB NOT NULL,
              FOREIGN KEY(response_id) REFERENCES cache_response(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS cache_response_header (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              response_id INTEGER NOT NULL,
              header_value TEXT NOT NULL,
              FOREIGN KEY(response_id) REFERENCES cache_response(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_cache_response_header_response
              ON cache_response_header(response_id);
            "#,
        )
    }

    pub(crate) fn lookup(&self, url: &str) -> rusqlite::Result<Option<CacheEntry>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT id, content_size, time_stamp, expires FROM cache_response WHERE url = ?1",
                params![url],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, content_size, stored_at, expires)) = row else {
            return Ok(None);
        };

        // Entry and blob rows exist together; a missing blob means the row
        // is corrupt and gets dropped.
        let body: Option<Vec<u8>> = conn
            .query_row(
                "SELECT body FROM cache_response_data WHERE response_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(body) = body else {
            conn.execute("DELETE FROM cache_response WHERE id = ?1", params![id])?;
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT header_value FROM cache_response_header WHERE response_id = ?1 ORDER BY id",
        )?;
        let headers = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(CacheEntry {
            response_id: id,
            url: url.to_string(),
            content_size,
            stored_at,
            expires,
            headers,
            body: body.into(),
        }))
    }

    /// Upsert the entry, replace its blob and header rows in one transaction.
    /// Returns the row id of the stored entry. Two in-flight transfers for
    /// the same URL may both complete; the upsert lets the later completion
    /// win instead of raising a constraint error.
    pub(crate) fn store(
        &self,
        url: &str,
        headers: &[String],
        body: &[u8],
        now: i64,
        max_age: i64,
    ) -> rusqlite::Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let expires = now.saturating_add(max_age);

        tx.execute(
            "INSERT INTO cache_response (url, content_size, time_stamp, expires)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(url) DO UPDATE SET
               content_size = excluded.content_size,
               time_stamp = excluded.time_stamp,
               expires = excluded.expires",
            params![url, body.len() as i64, now, expires],
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM cache_response WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;

        tx.execute(
            "DELETE FROM cache_response_data WHERE response_id = ?1",
            params![id],
        )?;
        tx.execute(
            "INSERT INTO cache_response_data (response_id, body) VALUES (?1, ?2)",
            params![id, body],
        )?;

        tx.execute(
            "DELETE FROM cache_response_header WHERE response_id = ?1",
            params![id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cache_response_header (response_id, header_value) VALUES (?1, ?2)",
            )?;
            for line in headers {
                stmt.execute(params![id, line])?;
            }
        }

        tx.commit()?;
        Ok(id)
    }

    /// Refresh the stored-at timestamp, preserving the freshness window.
    pub(crate) fn touch(&self, response_id: i64, now: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE cache_response
             SET expires = ?2 + (expires - time_stamp), time_stamp = ?2
             WHERE id = ?1",
            params![response_id, now],
        )?;
        Ok(())
    }

    pub(crate) fn remove(&self, url: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cache_response WHERE url = ?1", params![url])?;
        Ok(())
    }

    pub(crate) fn total_size(&self) -> rusqlite::Result<u64> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(content_size), 0) FROM cache_response",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    /// Watermark eviction inside a single transaction.
    ///
    /// Deletes the coldest (oldest-expiry) entries until the projected
    /// remaining size is under the low watermark; if nothing could be
    /// deleted, clears the cache entirely.
    pub(crate) fn cleanup(&self) -> rusqlite::Result<CleanupOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let total: i64 = tx.query_row(
            "SELECT COALESCE(SUM(content_size), 0) FROM cache_response",
            [],
            |row| row.get(0),
        )?;
        if total.max(0) as u64 <= self.high_watermark {
            return Ok(CleanupOutcome::Untouched);
        }

        let mut doomed: Vec<i64> = Vec::new();
        let mut remaining = total;
        {
            let mut stmt = tx.prepare(
                "SELECT id, content_size FROM cache_response ORDER BY expires ASC, id ASC",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                if remaining.max(0) as u64 <= self.low_watermark {
                    break;
                }
                doomed.push(row.get::<_, i64>(0)?);
                remaining -= row.get::<_, i64>(1)?;
            }
        }

        let mut affected = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM cache_response WHERE id = ?1")?;
            for id in &doomed {
                affected += stmt.execute(params![id])?;
            }
        }

        if affected == 0 {
            tx.execute("DELETE FROM cache_response", [])?;
            tx.commit()?;
            return Ok(CleanupOutcome::Cleared);
        }

        tx.commit()?;
        Ok(CleanupOutcome::Evicted(affected))
    }
}
