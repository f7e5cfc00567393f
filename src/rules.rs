//! Lightweight classification over sender/subject/summary text: a category
//! tag per message (first matching rule wins) and follow-up detection for the
//! digest's action-items section.

use regex::Regex;

pub struct Rules {
    categories: Vec<(&'static str, Regex)>,
    actions: Vec<(&'static str, Regex)>,
    reply_prefix: Regex,
}

impl Default for Rules {
    fn default() -> Self {
        let rule = |pat: &str| Regex::new(&format!("(?i){pat}")).expect("static rule pattern");
        Self {
            categories: vec![
                (
                    "Bills & Finance",
                    rule(r"(invoice|bill|payment|transfer|statement|receipt|boleto|fatura)"),
                ),
                (
                    "Meetings & Invites",
                    rule(r"(invitation|meeting|appointment|\.ics|calendar|rsvp)"),
                ),
                (
                    "Purchases & Offers",
                    rule(r"(order|shipped|delivery|promo|offer|discount|reward)"),
                ),
                (
                    "Newsletters",
                    rule(r"(newsletter|weekly digest|digest update|unsubscribe)"),
                ),
                (
                    "Alerts",
                    rule(r"(security alert|sign.?in|verification code|password reset)"),
                ),
            ],
            actions: vec![
                (
                    "Send reply",
                    rule(r"(please\s+reply|need\s+response|awaiting\s+your\s+reply)"),
                ),
                (
                    "Provide document",
                    rule(r"(send|provide|need).{0,40}?(photo|picture|invoice|attachment|document|certificate)"),
                ),
                (
                    "Schedule meeting",
                    rule(r"(schedule|book|arrange).{0,40}?(call|meeting|appointment)"),
                ),
                (
                    "Confirm attendance",
                    rule(r"(rsvp|confirm).{0,40}?(attendance|presence)"),
                ),
            ],
            reply_prefix: Regex::new(r"(?i)^re:\s").expect("static rule pattern"),
        }
    }
}

impl Rules {
    /// First matching category over "subject + sender", else "Personal".
    pub fn categorize(&self, sender: &str, subject: &str) -> String {
        let hay = format!("{subject} {sender}");
        for (name, pat) in &self.categories {
            if pat.is_match(&hay) {
                return (*name).to_string();
            }
        }
        "Personal".to_string()
    }

    /// Suggested follow-up action, if any, from subject + summary.
    pub fn detect_followup(&self, subject: &str, summary: &str) -> Option<String> {
        let hay = format!("{subject} {summary}");
        for (action, pat) in &self.actions {
            if pat.is_match(&hay) {
                return Some((*action).to_string());
            }
        }
        if self.reply_prefix.is_match(subject) {
            return Some("Send reply".to_string());
        }
        None
    }
}
