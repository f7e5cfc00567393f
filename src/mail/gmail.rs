//! Gmail API v1 client: list/search with transparent pagination, full-message
//! get, and send. All calls are blocking with explicit timeouts and bounded
//! retries.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::domain::digest::Window;
use crate::domain::email::EmailMessage;
use crate::error::{AuthError, DeliveryError, FetchError};
use crate::mail::decoders;
use crate::retry::{RetryPolicy, send_with_retry};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDetail {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    /// Epoch milliseconds, as a string.
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PayloadBody>,
    #[serde(default)]
    pub parts: Vec<MessagePayload>,
}

#[derive(Debug, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadBody {
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

// ============================================================================
// Query building
// ============================================================================

/// Label/query restrictions for a fetch, on top of the time window.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub labels: Vec<String>,
    pub extra_query: Option<String>,
}

/// Gmail search expression for `[window.start, window.end)`. Bulk categories
/// and spam are excluded up front so they never reach the summarizer.
pub fn build_query(window: &Window, filter: &MessageFilter) -> String {
    let mut q = format!(
        "after:{} before:{} -category:promotions -category:social -in:spam",
        window.start.timestamp(),
        window.end.timestamp()
    );
    for label in &filter.labels {
        q.push_str(" label:");
        q.push_str(label);
    }
    if let Some(extra) = filter.extra_query.as_deref()
        && !extra.trim().is_empty()
    {
        q.push(' ');
        q.push_str(extra.trim());
    }
    q
}

// ============================================================================
// Client
// ============================================================================

pub struct GmailClient {
    http: reqwest::blocking::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GmailClient {
    pub fn new(retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::blocking::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            retry,
        })
    }

    /// Fetch messages whose received timestamp falls in the window, applying
    /// pagination transparently. A message whose detail fetch or body decode
    /// fails is logged and skipped rather than aborting the whole fetch; if
    /// errors leave *zero* messages from a non-empty listing, that is a total
    /// fetch failure.
    pub fn fetch_recent(
        &self,
        access_token: &str,
        window: &Window,
        filter: &MessageFilter,
    ) -> Result<Vec<EmailMessage>, FetchError> {
        let q = build_query(window, filter);
        let stubs = self.list_message_ids(access_token, &q)?;
        log::info!("listed {} message(s) for query {:?}", stubs.len(), q);

        let mut out = Vec::with_capacity(stubs.len());
        let mut last_err: Option<FetchError> = None;
        for stub in &stubs {
            match self.get_message(access_token, &stub.id) {
                Ok(msg) => out.push(msg),
                Err(FetchError::Auth(e)) => return Err(FetchError::Auth(e)),
                Err(e) => {
                    log::warn!("skipping message {}: {}", stub.id, e);
                    last_err = Some(e);
                }
            }
        }

        if out.is_empty()
            && !stubs.is_empty()
            && let Some(e) = last_err
        {
            return Err(e);
        }
        Ok(out)
    }

    fn list_message_ids(&self, access_token: &str, q: &str) -> Result<Vec<MessageStub>, FetchError> {
        let url = format!("{}/users/me/messages", self.base_url);
        let mut stubs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, String)> =
                vec![("q", q.to_string()), ("maxResults", "100".to_string())];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let resp = send_with_retry(
                self.http.get(&url).bearer_auth(access_token).query(&params),
                &self.retry,
            )?;
            let list: MessageListResponse = check_json(resp)?;

            stubs.extend(list.messages);
            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(stubs)
    }

    fn get_message(&self, access_token: &str, id: &str) -> Result<EmailMessage, FetchError> {
        let url = format!("{}/users/me/messages/{}", self.base_url, id);
        let resp = send_with_retry(
            self.http
                .get(&url)
                .bearer_auth(access_token)
                .query(&[("format", "full")]),
            &self.retry,
        )?;
        let detail: MessageDetail = check_json(resp)?;
        Ok(message_from_detail(detail))
    }

    /// Send an HTML message via `users/me/messages/send`; returns the provider
    /// message id as the delivery receipt.
    pub fn send_message(
        &self,
        access_token: &str,
        from: &str,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<String, DeliveryError> {
        let raw = encode_rfc822(from, to, subject, html_body);
        let url = format!("{}/users/me/messages/send", self.base_url);

        let resp = send_with_retry(
            self.http
                .post(&url)
                .bearer_auth(access_token)
                .json(&serde_json::json!({ "raw": raw })),
            &self.retry,
        )?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let sent: SendResponse = resp.json()?;
        Ok(sent.id)
    }
}

fn check_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::blocking::Response,
) -> Result<T, FetchError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(FetchError::Auth(AuthError::TokenRejected));
    }
    if !status.is_success() {
        let message = resp.text().unwrap_or_default();
        return Err(FetchError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json()?)
}

/// Normalize a Gmail message detail into the domain record. An undecodable
/// body degrades to the snippet rather than failing the message.
pub fn message_from_detail(detail: MessageDetail) -> EmailMessage {
    let headers = detail
        .payload
        .as_ref()
        .map(|p| &p.headers[..])
        .unwrap_or(&[]);

    let sender = decoders::header_value(headers, "From").unwrap_or_default();
    let subject =
        decoders::header_value(headers, "Subject").unwrap_or_else(|| "(no subject)".to_string());

    let received_at = detail
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_default();

    let body_text = detail
        .payload
        .as_ref()
        .and_then(decoders::extract_body_text)
        .unwrap_or_else(|| {
            log::warn!("message {}: no decodable text part, using snippet", detail.id);
            detail.snippet.clone()
        });

    EmailMessage {
        id: detail.id,
        thread_id: detail.thread_id,
        sender,
        subject,
        received_at,
        body_text,
        labels: detail.label_ids,
    }
}

/// Minimal RFC 822 message, UTF-8 HTML body, URL-safe base64 as the Gmail
/// send endpoint expects. The subject is B-encoded so non-ASCII survives.
fn encode_rfc822(from: &str, to: &str, subject: &str, html_body: &str) -> String {
    let encoded_subject = format!(
        "=?UTF-8?B?{}?=",
        general_purpose::STANDARD.encode(subject.as_bytes())
    );
    let mime = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {encoded_subject}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=UTF-8\r\n\r\n{html_body}"
    );
    general_purpose::URL_SAFE.encode(mime.as_bytes())
}
