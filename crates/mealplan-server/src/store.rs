//! SQLite persistence for cached events and cache window metadata.
//!
//! All timestamps are stored as naive ISO-8601 text. The store is cheap to
//! clone (it wraps a connection pool) and every blocking call has an async
//! wrapper that runs it on the blocking thread pool.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use mealplan_core::{CacheMetadata, CachedEvent, DateRange};

use crate::error::ServerResult;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cached_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    calendar_name TEXT NOT NULL,
    date TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    start_time TEXT NOT NULL,
    end_time TEXT,
    all_day INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cached_events_date ON cached_events(date);

CREATE TABLE IF NOT EXISTS cache_metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_refresh TEXT NOT NULL,
    cache_start TEXT NOT NULL,
    cache_end TEXT NOT NULL
);
";

/// Event and metadata storage backed by a pooled SQLite database.
#[derive(Clone)]
pub struct EventStore {
    pool: Pool<SqliteConnectionManager>,
}

impl EventStore {
    /// Opens (and if necessary creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> ServerResult<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder().max_size(4).build(manager)?;
        let store = Self { pool };
        store.conn()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    fn conn(&self) -> ServerResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Events whose date falls inside `range`, ordered by start time.
    pub fn events_in_range_blocking(&self, range: DateRange) -> ServerResult<Vec<CachedEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT calendar_name, date, title, start_time, end_time, all_day, created_at
             FROM cached_events
             WHERE date >= ?1 AND date <= ?2
             ORDER BY start_time ASC",
        )?;

        let rows = stmt.query_map(
            params![fmt_date(range.start), fmt_date(range.end)],
            row_to_event,
        )?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Replaces all events in `range` with `events` in one transaction.
    ///
    /// Window metadata is left untouched: filling a gap outside the
    /// refreshed window must not claim that window grew.
    pub fn replace_range_blocking(
        &self,
        range: DateRange,
        events: &[CachedEvent],
    ) -> ServerResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_range(&tx, range)?;
        insert_events(&tx, events)?;
        tx.commit()?;

        debug!(range = %range, count = events.len(), "replaced cached range");
        Ok(())
    }

    /// Replaces the whole cache window and its metadata atomically.
    ///
    /// Delete, insert and metadata update share one transaction so a crash
    /// can never leave fresh metadata over stale rows or vice versa.
    pub fn replace_window_blocking(
        &self,
        window: DateRange,
        events: &[CachedEvent],
        last_refresh: NaiveDateTime,
    ) -> ServerResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_range(&tx, window)?;
        insert_events(&tx, events)?;
        tx.execute(
            "INSERT INTO cache_metadata (id, last_refresh, cache_start, cache_end)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 last_refresh = excluded.last_refresh,
                 cache_start = excluded.cache_start,
                 cache_end = excluded.cache_end",
            params![
                fmt_datetime(last_refresh),
                fmt_date(window.start),
                fmt_date(window.end)
            ],
        )?;
        tx.commit()?;

        debug!(window = %window, count = events.len(), "replaced cache window");
        Ok(())
    }

    /// The current cache window metadata, if any refresh has completed.
    pub fn metadata_blocking(&self) -> ServerResult<Option<CacheMetadata>> {
        let conn = self.conn()?;
        let meta = conn
            .query_row(
                "SELECT last_refresh, cache_start, cache_end FROM cache_metadata WHERE id = 1",
                [],
                |row| {
                    Ok(CacheMetadata {
                        last_refresh: parse_datetime_col(row.get::<_, String>(0)?, 0)?,
                        cache_start: parse_date_col(row.get::<_, String>(1)?, 1)?,
                        cache_end: parse_date_col(row.get::<_, String>(2)?, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    pub async fn events_in_range(&self, range: DateRange) -> ServerResult<Vec<CachedEvent>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.events_in_range_blocking(range)).await?
    }

    pub async fn replace_range(
        &self,
        range: DateRange,
        events: Vec<CachedEvent>,
    ) -> ServerResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.replace_range_blocking(range, &events)).await?
    }

    pub async fn replace_window(
        &self,
        window: DateRange,
        events: Vec<CachedEvent>,
        last_refresh: NaiveDateTime,
    ) -> ServerResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.replace_window_blocking(window, &events, last_refresh)
        })
        .await?
    }

    pub async fn metadata(&self) -> ServerResult<Option<CacheMetadata>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.metadata_blocking()).await?
    }
}

fn delete_range(conn: &Connection, range: DateRange) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM cached_events WHERE date >= ?1 AND date <= ?2",
        params![fmt_date(range.start), fmt_date(range.end)],
    )
}

fn insert_events(conn: &Connection, events: &[CachedEvent]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO cached_events
             (calendar_name, date, title, start_time, end_time, all_day, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for event in events {
        stmt.execute(params![
            event.calendar_name,
            fmt_date(event.date),
            event.title,
            fmt_datetime(event.start),
            event.end.map(fmt_datetime),
            event.all_day,
            fmt_datetime(event.created_at),
        ])?;
    }
    Ok(())
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedEvent> {
    let end: Option<String> = row.get(4)?;
    Ok(CachedEvent {
        calendar_name: row.get(0)?,
        date: parse_date_col(row.get::<_, String>(1)?, 1)?,
        title: row.get(2)?,
        start: parse_datetime_col(row.get::<_, String>(3)?, 3)?,
        end: match end {
            Some(raw) => Some(parse_datetime_col(raw, 4)?),
            None => None,
        },
        all_day: row.get(5)?,
        created_at: parse_datetime_col(row.get::<_, String>(6)?, 6)?,
    })
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn fmt_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

fn parse_date_col(raw: String, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_datetime_col(raw: String, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&raw, DATETIME_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
