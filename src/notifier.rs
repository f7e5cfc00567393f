//! Digest composition and delivery. Summaries are ordered by received_at
//! ascending regardless of the order fetch/summarize produced them; delivery
//! shares a failure domain with nothing, persisted entries stay either way.

use chrono::{DateTime, Utc};

use crate::domain::digest::DigestEntry;
use crate::error::DeliveryError;
use crate::mail::GmailClient;
use crate::rules::Rules;

/// Subject prefix; also used by the pipeline to drop digests the account
/// sent to itself from a previous run.
pub const DIGEST_SUBJECT_PREFIX: &str = "Gmail Daily Digest";

const CARD_CSS: &str = "margin:8px 0;padding:12px;border:1px solid #e0e0e0;border-radius:8px;";

/// A composed digest, ready to deliver (HTML) and to mirror (plain lines).
#[derive(Debug)]
pub struct Digest {
    pub subject: String,
    pub html: String,
    pub lines: Vec<String>,
}

/// Build the digest for one run. Entries are sorted oldest-first by
/// received_at; follow-up actions and reader suggestions get their own
/// sections.
pub fn compose_digest(run_date: DateTime<Utc>, entries: &[DigestEntry], rules: &Rules) -> Digest {
    let mut ordered: Vec<&DigestEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then_with(|| a.source_message_id.cmp(&b.source_message_id))
    });

    let date = run_date.format("%d/%m/%Y");
    let subject = format!("{DIGEST_SUBJECT_PREFIX} — {date}");

    let mut cards = String::new();
    let mut followups: Vec<String> = Vec::new();
    let mut categories: Vec<String> = Vec::new();

    for (i, entry) in ordered.iter().enumerate() {
        let ref_no = format!("[{:02}]", i + 1);
        let when = entry.received_at.format("%d/%m/%Y %H:%M");
        let header = format!(
            "{ref_no} {} — {} ({when})",
            escape_html(&entry.subject),
            escape_html(&entry.sender)
        );
        cards.push_str(&format!(
            "<div style=\"{CARD_CSS}\"><div style=\"font-weight:bold;\">{header}</div>\
             <div style=\"color:#555;margin-top:4px;\">{}</div>\
             <div style=\"color:#999;font-size:12px;margin-top:4px;\">{}</div></div>\n",
            escape_html(&entry.summary_text),
            escape_html(&entry.category)
        ));

        if !categories.contains(&entry.category) {
            categories.push(entry.category.clone());
        }
        if let Some(action) = rules.detect_followup(&entry.subject, &entry.summary_text) {
            followups.push(format!(
                "[Action: {action}] {ref_no} {}",
                escape_html(&entry.subject)
            ));
        }
    }

    let suggestions = build_suggestions(&categories, !followups.is_empty());

    let mut lines = vec![format!(
        "Overview: {} message(s) | {} follow-up(s)",
        ordered.len(),
        followups.len()
    )];
    for (i, entry) in ordered.iter().enumerate() {
        lines.push(format!(
            "[{:02}] {} — {}: {}",
            i + 1,
            entry.subject,
            entry.sender,
            entry.summary_text
        ));
    }

    let actions_html = if followups.is_empty() {
        "<li>None</li>".to_string()
    } else {
        followups
            .iter()
            .map(|f| format!("<li>{f}</li>"))
            .collect::<String>()
    };
    for f in &followups {
        lines.push(f.clone());
    }
    for s in &suggestions {
        lines.push(format!("Suggestion: {s}"));
    }

    let suggestions_html: String = suggestions
        .iter()
        .map(|s| format!("<li>{}</li>", escape_html(s)))
        .collect();

    let html = format!(
        "<html><body style=\"font-family:Helvetica,Arial;background:#f6f8fa;padding:24px;\">\
         <div style=\"max-width:680px;margin:auto;background:#fff;padding:24px;border-radius:12px;\">\
         <h2 style=\"margin-top:0\">{DIGEST_SUBJECT_PREFIX} <span style=\"font-size:14px;color:#888\">— {date}</span></h2>\
         <h3>Overview</h3><ul><li>Total: {} | Follow-ups: {}</li></ul>\
         {cards}\
         <h3>Action Items</h3><ul>{actions_html}</ul>\
         <h3>Suggestions</h3><ul>{suggestions_html}</ul>\
         </div></body></html>",
        ordered.len(),
        followups.len()
    );

    Digest {
        subject,
        html,
        lines,
    }
}

/// Reader-facing tips keyed off what actually showed up in the run.
fn build_suggestions(categories: &[String], has_followups: bool) -> Vec<String> {
    let mut out = Vec::new();
    if categories.iter().any(|c| c == "Meetings & Invites") {
        out.push("Mark upcoming meetings and invites on the calendar.".to_string());
    }
    if categories.iter().any(|c| c == "Purchases & Offers") {
        out.push("Consider unsubscribing from promotional newsletters.".to_string());
    }
    if categories.iter().any(|c| c == "Bills & Finance") {
        out.push("Check due dates on bills and statements.".to_string());
    }
    if has_followups {
        out.push("Schedule time today to clear pending follow-ups.".to_string());
    }
    if out.is_empty() {
        out.push("Inbox looks good today, no suggestions!".to_string());
    }
    out
}

pub struct Notifier<'a> {
    gmail: &'a GmailClient,
    sender: String,
    recipient: String,
}

impl<'a> Notifier<'a> {
    pub fn new(gmail: &'a GmailClient, sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            gmail,
            sender: sender.into(),
            recipient: recipient.into(),
        }
    }

    /// Send the composed digest; returns the provider message id.
    pub fn send_digest(&self, access_token: &str, digest: &Digest) -> Result<String, DeliveryError> {
        self.gmail.send_message(
            access_token,
            &self.sender,
            &self.recipient,
            &digest.subject,
            &digest.html,
        )
    }
}

/// Best-effort desktop toast when a run completes; never affects the run.
pub fn desktop_toast(summary: &str, body: &str) {
    if let Err(e) = notify_rust::Notification::new()
        .summary(summary)
        .body(body)
        .show()
    {
        log::debug!("desktop notification failed: {e}");
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(id: &str, subject: &str, received_at: DateTime<Utc>) -> DigestEntry {
        DigestEntry {
            source_message_id: id.to_string(),
            digest_run_id: 1,
            summary_text: format!("summary for {id}"),
            sender: "sender@example.com".to_string(),
            subject: subject.to_string(),
            category: "Personal".to_string(),
            received_at,
            created_at: received_at,
        }
    }

    #[test]
    fn summaries_ordered_oldest_first_regardless_of_input_order() {
        let base = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        let entries = vec![
            entry("c", "newest", base),
            entry("a", "oldest", base - Duration::hours(3)),
            entry("b", "middle", base - Duration::hours(1)),
        ];
        let digest = compose_digest(base, &entries, &Rules::default());

        let pos_oldest = digest.html.find("oldest").unwrap();
        let pos_middle = digest.html.find("middle").unwrap();
        let pos_newest = digest.html.find("newest").unwrap();
        assert!(pos_oldest < pos_middle && pos_middle < pos_newest);
        assert!(digest.lines[1].contains("oldest"));
    }

    #[test]
    fn subject_carries_run_date() {
        let date = Utc.with_ymd_and_hms(2026, 8, 30, 23, 59, 0).unwrap();
        let digest = compose_digest(date, &[], &Rules::default());
        assert_eq!(digest.subject, "Gmail Daily Digest — 30/08/2026");
    }

    #[test]
    fn html_is_escaped() {
        let base = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        let entries = vec![entry("x", "<script>alert(1)</script>", base)];
        let digest = compose_digest(base, &entries, &Rules::default());
        assert!(!digest.html.contains("<script>"));
        assert!(digest.html.contains("&lt;script&gt;"));
    }

    #[test]
    fn followups_show_as_action_items() {
        let base = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        let entries = vec![entry("x", "Re: contract", base)];
        let digest = compose_digest(base, &entries, &Rules::default());
        assert!(digest.html.contains("[Action: Send reply]"));
    }

    #[test]
    fn empty_run_still_composes() {
        let base = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        let digest = compose_digest(base, &[], &Rules::default());
        assert!(digest.html.contains("Total: 0"));
        assert!(digest.html.contains("<li>None</li>"));
        assert!(digest.html.contains("Inbox looks good today"));
    }

    #[test]
    fn suggestions_follow_digest_content() {
        let base = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        let mut promo = entry("p", "50% off everything", base);
        promo.category = "Purchases & Offers".to_string();
        let entries = vec![promo, entry("r", "Re: contract", base)];
        let digest = compose_digest(base, &entries, &Rules::default());

        assert!(digest.html.contains("<h3>Suggestions</h3>"));
        assert!(digest.html.contains("unsubscribing from promotional"));
        // "Re:" subject produces a follow-up, which produces its suggestion
        assert!(digest.html.contains("Schedule time today"));
        assert!(!digest.html.contains("Inbox looks good today"));
        assert!(digest.html.contains("Total: 2 | Follow-ups: 1"));
        assert!(
            digest
                .lines
                .iter()
                .any(|l| l.starts_with("Suggestion: Schedule time"))
        );
    }
}
