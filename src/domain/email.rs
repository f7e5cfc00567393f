use chrono::{DateTime, Utc};

/// A message fetched from the provider. Immutable once fetched; identity is
/// the provider-unique `id`. Not persisted itself; only the digest entry
/// derived from it is.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub id: String,
    pub thread_id: String,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub labels: Vec<String>,
}
