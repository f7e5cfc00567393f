//! OpenAI-style chat completion client for per-message summaries.
//!
//! Works with any endpoint that accepts the OpenAI request format; the base
//! URL is configurable. Calls are blocking with a timeout and the shared
//! retry policy; 429/5xx are retried, other 4xx are not.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::domain::email::EmailMessage;
use crate::error::SummarizeError;
use crate::mail::decoders::normalize_snippet;
use crate::retry::{RetryPolicy, send_with_retry};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const SYSTEM_PROMPT: &str =
    "Summarise the email in 1-2 sentences. Do not repeat the subject line.";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct Summarizer {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    body_char_budget: usize,
    retry: RetryPolicy,
}

impl Summarizer {
    /// API key comes from `OPENAI_API_KEY`; everything else from config.
    pub fn from_env(cfg: &Config, retry: RetryPolicy) -> Result<Self, SummarizeError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| SummarizeError::MissingApiKey)?;
        Ok(Self {
            http: reqwest::blocking::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()?,
            base_url: cfg
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: cfg.model().to_string(),
            max_tokens: cfg.summary_max_tokens(),
            body_char_budget: cfg.body_char_budget(),
            retry,
        })
    }

    /// Condense one message to plain text. Failures here never abort the run;
    /// the orchestrator marks the message skipped.
    pub fn summarize(&self, msg: &EmailMessage) -> Result<String, SummarizeError> {
        let body = msg.body_text.trim();
        if body.is_empty() {
            return Ok("Summary not available.".to_string());
        }

        let prompt = build_prompt(&msg.subject, body, self.body_char_budget);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.2,
        };

        let url = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let resp = send_with_retry(
            self.http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request),
            &self.retry,
        )?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            return Err(classify_api_error(status, message));
        }

        let parsed: ChatResponse = resp.json()?;
        let summary = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SummarizeError::MalformedResponse("no assistant content in choices".to_string())
            })?;

        // A summary that just restates the subject is useless; fall back to a
        // body snippet instead.
        if restates_subject(&msg.subject, &summary) {
            let fallback = normalize_snippet(body, 180);
            if !fallback.is_empty() {
                return Ok(fallback);
            }
        }
        Ok(summary)
    }
}

fn classify_api_error(status: StatusCode, message: String) -> SummarizeError {
    // Retryable statuses already exhausted their budget in send_with_retry;
    // what reaches here is terminal either way.
    SummarizeError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Prompt body: subject plus the message text truncated to the char budget.
pub fn build_prompt(subject: &str, body: &str, char_budget: usize) -> String {
    format!("Subject: {subject}\n\n{}", truncate_chars(body, char_budget))
}

pub fn truncate_chars(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        return s.to_string();
    }
    let mut out: String = s.chars().take(budget.saturating_sub(2)).collect();
    out.push_str(" …");
    out
}

/// True when the summary starts by restating the subject (ignoring case and
/// punctuation).
pub fn restates_subject(subject: &str, summary: &str) -> bool {
    let subj: String = subject
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    let summ: String = summary
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    let prefix: String = subj.chars().take(30).collect();
    !prefix.is_empty() && summ.starts_with(&prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_budget() {
        let long = "x".repeat(5000);
        let truncated = truncate_chars(&long, 1200);
        assert!(truncated.chars().count() <= 1200);
        assert!(truncated.ends_with('…'));
        assert_eq!(truncate_chars("short", 1200), "short");
    }

    #[test]
    fn prompt_contains_subject_and_body() {
        let p = build_prompt("Invoice due", "please pay by friday", 1200);
        assert!(p.starts_with("Subject: Invoice due\n\n"));
        assert!(p.ends_with("please pay by friday"));
    }

    #[test]
    fn subject_restatement_detection() {
        assert!(restates_subject(
            "Re: Project Update",
            "Project update: the milestone slipped a week."
        ));
        assert!(!restates_subject(
            "Re: Project Update",
            "The milestone slipped a week; reply with a new date."
        ));
        // empty subject never matches
        assert!(!restates_subject("", "anything"));
    }

    #[test]
    fn chat_response_parses() {
        let json = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": " A short summary. "}}
            ]
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        let content = resp.choices[0].message.content.as_deref().unwrap();
        assert_eq!(content.trim(), "A short summary.");
    }

    #[test]
    fn empty_choices_is_malformed() {
        let json = r#"{"id": "chatcmpl-2", "choices": []}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(resp.choices.is_empty());
    }
}
