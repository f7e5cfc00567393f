use chrono::{DateTime, Utc};

use crate::domain::digest::{DigestEntry, DigestRun, Window};
use crate::error::StorageError;

/// Persistence seam for digest runs and entries. Upsert semantics on
/// `source_message_id` are the contract: writing an entry that already exists
/// is a no-op success, never a duplicate and never an error.
pub trait DigestRepository: Send {
    /// Open the run record for this invocation. Counts and status are filled
    /// in by `finish_run` exactly once.
    fn create_run(&self, window: &Window, now: DateTime<Utc>) -> Result<DigestRun, StorageError>;

    /// Record the terminal state of a run.
    fn finish_run(&self, run: &DigestRun) -> Result<(), StorageError>;

    /// Insert if absent; returns whether a row was written.
    fn upsert_entry(&self, entry: &DigestEntry) -> Result<bool, StorageError>;

    fn has_entry(&self, source_message_id: &str) -> Result<bool, StorageError>;

    fn entries_for_run(&self, run_id: i64) -> Result<Vec<DigestEntry>, StorageError>;

    fn recent_runs(&self, limit: u32) -> Result<Vec<DigestRun>, StorageError>;
}
