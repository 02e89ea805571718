//! Transcript record persistence.
//!
//! The recording core only sees the [`TranscriptStore`] trait
//! (save/retrieve/update/search); storage internals stay behind it. The
//! bundled implementation is raw-SQL rusqlite, one connection behind a mutex.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A persisted meeting transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub id: i64,
    pub title: Option<String>,
    pub app_name: Option<String>,
    pub status: String,
    pub transcript_text: Option<String>,
    pub summary: Option<String>,
    pub notes: Option<String>,
    pub duration_seconds: Option<i64>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

pub trait TranscriptStore: Send + Sync {
    /// Insert a new record, returning its id.
    fn save(&self, record: &TranscriptRecord) -> Result<i64>;

    fn retrieve(&self, id: i64) -> Result<Option<TranscriptRecord>>;

    /// Load, mutate, and write back one record.
    fn update(&self, id: i64, mutator: &dyn Fn(&mut TranscriptRecord)) -> Result<()>;

    /// Case-insensitive substring search over title, transcript and notes.
    fn search(&self, query: &str, limit: u32, offset: u32) -> Result<Vec<TranscriptRecord>>;

    /// Most recent records.
    fn list(&self, limit: u32, offset: u32) -> Result<Vec<TranscriptRecord>>;
}

pub struct SqliteTranscriptStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = "id, title, app_name, status, transcript_text, summary, notes, \
     duration_seconds, started_at, completed_at, error";

impl SqliteTranscriptStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let conn = Connection::open(path).context("Failed to open transcript database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(&crate::global::db_file()?)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS transcripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT,
                app_name TEXT,
                status TEXT NOT NULL,
                transcript_text TEXT,
                summary TEXT,
                notes TEXT,
                duration_seconds INTEGER,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                completed_at TEXT,
                error TEXT
            )",
            [],
        )
        .context("Failed to create transcripts table")?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranscriptRecord> {
        Ok(TranscriptRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            app_name: row.get(2)?,
            status: row.get(3)?,
            transcript_text: row.get(4)?,
            summary: row.get(5)?,
            notes: row.get(6)?,
            duration_seconds: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
            error: row.get(10)?,
        })
    }
}

impl TranscriptStore for SqliteTranscriptStore {
    fn save(&self, record: &TranscriptRecord) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO transcripts (title, app_name, status, transcript_text, summary, \
             notes, duration_seconds, completed_at, error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.title,
                record.app_name,
                record.status,
                record.transcript_text,
                record.summary,
                record.notes,
                record.duration_seconds,
                record.completed_at,
                record.error,
            ],
        )
        .context("Failed to insert transcript")?;
        Ok(conn.last_insert_rowid())
    }

    fn retrieve(&self, id: i64) -> Result<Option<TranscriptRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM transcripts WHERE id = ?1",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare transcript query")?;

        let mut rows = stmt
            .query_map(params![id], Self::row_to_record)
            .context("Failed to query transcript")?;

        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn update(&self, id: i64, mutator: &dyn Fn(&mut TranscriptRecord)) -> Result<()> {
        let mut record = self
            .retrieve(id)?
            .with_context(|| format!("No transcript with id {}", id))?;
        mutator(&mut record);

        let conn = self.lock();
        conn.execute(
            "UPDATE transcripts SET title = ?1, app_name = ?2, status = ?3, \
             transcript_text = ?4, summary = ?5, notes = ?6, duration_seconds = ?7, \
             completed_at = ?8, error = ?9 WHERE id = ?10",
            params![
                record.title,
                record.app_name,
                record.status,
                record.transcript_text,
                record.summary,
                record.notes,
                record.duration_seconds,
                record.completed_at,
                record.error,
                id,
            ],
        )
        .context("Failed to update transcript")?;
        Ok(())
    }

    fn search(&self, query: &str, limit: u32, offset: u32) -> Result<Vec<TranscriptRecord>> {
        let conn = self.lock();
        let pattern = format!("%{}%", query);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM transcripts \
                 WHERE title LIKE ?1 OR transcript_text LIKE ?1 OR notes LIKE ?1 \
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare search query")?;

        let rows = stmt
            .query_map(params![pattern, limit, offset], Self::row_to_record)
            .context("Failed to search transcripts")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read search results")
    }

    fn list(&self, limit: u32, offset: u32) -> Result<Vec<TranscriptRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM transcripts ORDER BY id DESC LIMIT ?1 OFFSET ?2",
                SELECT_COLUMNS
            ))
            .context("Failed to prepare list query")?;

        let rows = stmt
            .query_map(params![limit, offset], Self::row_to_record)
            .context("Failed to list transcripts")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read list results")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str) -> TranscriptRecord {
        TranscriptRecord {
            title: Some(title.to_string()),
            status: "capturing".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_save_and_retrieve() {
        let store = SqliteTranscriptStore::open_in_memory().unwrap();
        let id = store.save(&record("Standup")).unwrap();

        let found = store.retrieve(id).unwrap().unwrap();
        assert_eq!(found.title, Some("Standup".to_string()));
        assert_eq!(found.status, "capturing");
        assert!(!found.started_at.is_empty());
    }

    #[test]
    fn test_retrieve_missing_is_none() {
        let store = SqliteTranscriptStore::open_in_memory().unwrap();
        assert!(store.retrieve(42).unwrap().is_none());
    }

    #[test]
    fn test_update_mutates_record() {
        let store = SqliteTranscriptStore::open_in_memory().unwrap();
        let id = store.save(&record("Planning")).unwrap();

        store
            .update(id, &|r| {
                r.status = "completed".to_string();
                r.notes = Some("follow up with infra".to_string());
                r.duration_seconds = Some(1800);
            })
            .unwrap();

        let found = store.retrieve(id).unwrap().unwrap();
        assert_eq!(found.status, "completed");
        assert_eq!(found.notes, Some("follow up with infra".to_string()));
        assert_eq!(found.duration_seconds, Some(1800));
    }

    #[test]
    fn test_search_matches_title_and_notes() {
        let store = SqliteTranscriptStore::open_in_memory().unwrap();
        store.save(&record("Quarterly review")).unwrap();
        let id = store.save(&record("Standup")).unwrap();
        store
            .update(id, &|r| r.notes = Some("review action items".to_string()))
            .unwrap();

        let hits = store.search("review", 10, 0).unwrap();
        assert_eq!(hits.len(), 2);

        let hits = store.search("review", 1, 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_list_is_most_recent_first() {
        let store = SqliteTranscriptStore::open_in_memory().unwrap();
        store.save(&record("first")).unwrap();
        store.save(&record("second")).unwrap();

        let listed = store.list(10, 0).unwrap();
        assert_eq!(listed[0].title, Some("second".to_string()));
        assert_eq!(listed[1].title, Some("first".to_string()));
    }
}
