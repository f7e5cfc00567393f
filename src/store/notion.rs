//! Optional Notion mirror: appends each run's digest as a page in a Notion
//! database. Strictly best-effort: the sqlite store owns the uniqueness
//! invariant; a Notion failure is logged and never changes run status.

use std::time::Duration;

use serde_json::json;

use crate::error::StorageError;
use crate::retry::{RetryPolicy, send_with_retry};

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
// Notion rich_text blocks cap out around 2k chars
const CHUNK_SIZE: usize = 1900;
const MAX_BLOCKS: usize = 50;

pub struct NotionLog {
    http: reqwest::blocking::Client,
    secret: String,
    database_id: String,
    retry: RetryPolicy,
}

impl NotionLog {
    /// Returns `None` unless both the database id (config) and NOTION_SECRET
    /// (env) are present.
    pub fn from_env(database_id: Option<&str>, retry: RetryPolicy) -> Option<Self> {
        let database_id = database_id?.to_string();
        let secret = std::env::var("NOTION_SECRET").ok()?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .ok()?;
        Some(Self {
            http,
            secret,
            database_id,
            retry,
        })
    }

    /// Create a page titled `title` whose children are one bulleted block per
    /// line (long lines chunked).
    pub fn append_run(&self, title: &str, lines: &[String]) -> Result<(), StorageError> {
        let blocks = build_blocks(lines);
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": {
                "Name": { "title": [{ "text": { "content": title } }] }
            },
            "children": blocks,
        });

        let resp = send_with_retry(
            self.http
                .post(format!("{NOTION_API}/pages"))
                .bearer_auth(&self.secret)
                .header("Notion-Version", NOTION_VERSION)
                .json(&body),
            &self.retry,
        )?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StorageError::Api {
                status: status.as_u16(),
                message: resp.text().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

fn build_blocks(lines: &[String]) -> Vec<serde_json::Value> {
    let mut blocks = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        for chunk in chars.chunks(CHUNK_SIZE) {
            let text: String = chunk.iter().collect();
            blocks.push(json!({
                "object": "block",
                "type": "bulleted_list_item",
                "bulleted_list_item": {
                    "rich_text": [{ "type": "text", "text": { "content": text } }]
                }
            }));
            if blocks.len() >= MAX_BLOCKS {
                return blocks;
            }
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_skip_blank_lines_and_chunk_long_ones() {
        let lines = vec![
            "short line".to_string(),
            "".to_string(),
            "y".repeat(CHUNK_SIZE + 10),
        ];
        let blocks = build_blocks(&lines);
        assert_eq!(blocks.len(), 3); // short + two chunks
        let first = blocks[0]["bulleted_list_item"]["rich_text"][0]["text"]["content"]
            .as_str()
            .unwrap();
        assert_eq!(first, "short line");
    }

    #[test]
    fn blocks_are_capped() {
        let lines: Vec<String> = (0..100).map(|i| format!("line {i}")).collect();
        assert_eq!(build_blocks(&lines).len(), MAX_BLOCKS);
    }
}
