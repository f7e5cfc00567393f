//! Per-stage error taxonomy.
//!
//! Each pipeline stage has its own error type so the orchestrator can apply
//! the right propagation policy: auth and total-fetch failures abort the run,
//! summarization and storage failures skip the affected message, delivery
//! failures leave persisted state intact.

use thiserror::Error;

/// Fatal: aborts the run before anything else happens.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no refresh token stored; run `gmail_digest auth` first")]
    NoRefreshToken,

    #[error("access token rejected by provider")]
    TokenRejected,

    #[error("token refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("token endpoint unreachable: {0}")]
    Endpoint(String),

    #[error("keyring: {0}")]
    Keyring(String),

    #[error("config: {0}")]
    Config(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal when the whole listing fails; individual message failures inside a
/// fetch are logged and skipped instead.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gmail api error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Per-message, non-fatal: the message is skipped and the run degrades to
/// `partial`.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("OPENAI_API_KEY not set")]
    MissingApiKey,

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
}

/// Per-entry, non-fatal for individual writes; failing to open the store or
/// record the run itself is fatal.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("record store api error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Fatal to the notification stage only; already-written entries stay.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("send rejected {status}: {message}")]
    Rejected { status: u16, message: String },
}
