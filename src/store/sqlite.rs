use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::digest::{DigestEntry, DigestRun, RunStatus, Window};
use crate::error::StorageError;
use crate::store::repo::DigestRepository;

pub struct SqliteRepo {
    conn: Connection,
}

impl SqliteRepo {
    pub fn open(path: &std::path::Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let repo = Self { conn };
        repo.migrate()?;
        Ok(repo)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let repo = Self { conn };
        repo.migrate()?;
        Ok(repo)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        // A run row starts out 'failed'; finish_run flips it exactly once.
        // A crash mid-run therefore reads as a failed run, which is accurate.
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS digest_runs (
                run_id         INTEGER PRIMARY KEY,
                window_start   INTEGER NOT NULL,
                window_end     INTEGER NOT NULL,
                message_count  INTEGER NOT NULL DEFAULT 0,
                skipped_count  INTEGER NOT NULL DEFAULT 0,
                status         TEXT NOT NULL DEFAULT 'failed',
                created_at     INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS digest_entries (
                source_message_id  TEXT PRIMARY KEY,
                digest_run_id      INTEGER NOT NULL REFERENCES digest_runs(run_id),
                summary_text       TEXT NOT NULL,
                sender             TEXT NOT NULL,
                subject            TEXT NOT NULL,
                category           TEXT NOT NULL,
                received_at        INTEGER NOT NULL,
                created_at         INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_run
                ON digest_entries(digest_run_id);
            "#,
        )?;
        Ok(())
    }
}

fn epoch(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

impl DigestRepository for SqliteRepo {
    fn create_run(&self, window: &Window, now: DateTime<Utc>) -> Result<DigestRun, StorageError> {
        self.conn.execute(
            r#"
            INSERT INTO digest_runs (window_start, window_end, created_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![epoch(window.start), epoch(window.end), epoch(now)],
        )?;
        Ok(DigestRun {
            run_id: self.conn.last_insert_rowid(),
            window: *window,
            message_count: 0,
            skipped_count: 0,
            status: RunStatus::Failed,
        })
    }

    fn finish_run(&self, run: &DigestRun) -> Result<(), StorageError> {
        self.conn.execute(
            r#"
            UPDATE digest_runs
            SET message_count = ?2, skipped_count = ?3, status = ?4
            WHERE run_id = ?1
            "#,
            params![
                run.run_id,
                run.message_count,
                run.skipped_count,
                run.status.as_str()
            ],
        )?;
        Ok(())
    }

    fn upsert_entry(&self, entry: &DigestEntry) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            r#"
            INSERT INTO digest_entries
              (source_message_id, digest_run_id, summary_text, sender, subject,
               category, received_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(source_message_id) DO NOTHING
            "#,
            params![
                entry.source_message_id,
                entry.digest_run_id,
                entry.summary_text,
                entry.sender,
                entry.subject,
                entry.category,
                epoch(entry.received_at),
                epoch(entry.created_at),
            ],
        )?;
        Ok(changed > 0)
    }

    fn has_entry(&self, source_message_id: &str) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                r#"SELECT 1 FROM digest_entries WHERE source_message_id = ?1"#,
                params![source_message_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn entries_for_run(&self, run_id: i64) -> Result<Vec<DigestEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT source_message_id, digest_run_id, summary_text, sender,
                   subject, category, received_at, created_at
            FROM digest_entries
            WHERE digest_run_id = ?1
            ORDER BY received_at ASC, source_message_id ASC
            "#,
        )?;

        let mut rows = stmt.query(params![run_id])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            out.push(DigestEntry {
                source_message_id: r.get(0)?,
                digest_run_id: r.get(1)?,
                summary_text: r.get(2)?,
                sender: r.get(3)?,
                subject: r.get(4)?,
                category: r.get(5)?,
                received_at: from_epoch(r.get(6)?),
                created_at: from_epoch(r.get(7)?),
            });
        }
        Ok(out)
    }

    fn recent_runs(&self, limit: u32) -> Result<Vec<DigestRun>, StorageError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT run_id, window_start, window_end, message_count,
                   skipped_count, status
            FROM digest_runs
            ORDER BY run_id DESC
            LIMIT ?1
            "#,
        )?;

        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let status: String = r.get(5)?;
            out.push(DigestRun {
                run_id: r.get(0)?,
                window: Window {
                    start: from_epoch(r.get(1)?),
                    end: from_epoch(r.get(2)?),
                },
                message_count: r.get(3)?,
                skipped_count: r.get(4)?,
                status: RunStatus::parse(&status),
            });
        }
        Ok(out)
    }
}
