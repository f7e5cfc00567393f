use chrono::{DateTime, Duration, Utc};

/// Fetch window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn last_hours(hours: i64, end: DateTime<Utc>) -> Self {
        Self {
            start: end - Duration::hours(hours),
            end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => RunStatus::Success,
            "partial" => RunStatus::Partial,
            _ => RunStatus::Failed,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted summary. At most one entry exists per source message id;
/// re-processing the same message on a later run is a no-op.
#[derive(Debug, Clone)]
pub struct DigestEntry {
    pub source_message_id: String,
    pub digest_run_id: i64,
    pub summary_text: String,
    pub sender: String,
    pub subject: String,
    pub category: String,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Run-level record, created once per invocation and terminal once finished.
#[derive(Debug, Clone)]
pub struct DigestRun {
    pub run_id: i64,
    pub window: Window,
    pub message_count: u32,
    pub skipped_count: u32,
    pub status: RunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_last_hours() {
        let end = Utc::now();
        let w = Window::last_hours(24, end);
        assert_eq!(w.end - w.start, Duration::hours(24));
        assert_eq!(w.end, end);
    }

    #[test]
    fn status_roundtrip() {
        for s in [RunStatus::Success, RunStatus::Partial, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(s.as_str()), s);
        }
        assert_eq!(RunStatus::parse("garbage"), RunStatus::Failed);
    }
}
