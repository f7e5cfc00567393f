//! Body extraction from Gmail MIME payloads: walk the part tree for
//! text/plain, fall back to text/html rendered through html2text, decode the
//! URL-safe base64 Gmail wraps part data in.

use base64::{Engine as _, engine::general_purpose};

use crate::mail::gmail::{Header, MessagePayload};

pub fn header_value(headers: &[Header], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

/// Best-effort text body: prefer a text/plain part anywhere in the tree,
/// otherwise render the first text/html part.
pub fn extract_body_text(payload: &MessagePayload) -> Option<String> {
    if let Some(text) = find_part(payload, "text/plain") {
        return Some(text);
    }
    find_part(payload, "text/html").map(|html| html_to_text(&html))
}

fn find_part(payload: &MessagePayload, target_mime: &str) -> Option<String> {
    if payload.mime_type.eq_ignore_ascii_case(target_mime)
        && let Some(body) = &payload.body
        && let Some(data) = &body.data
    {
        return decode_part(data);
    }
    for part in &payload.parts {
        if let Some(text) = find_part(part, target_mime) {
            return Some(text);
        }
    }
    None
}

/// Gmail part data is URL-safe base64, padding optional.
pub fn decode_part(data: &str) -> Option<String> {
    let bytes = general_purpose::URL_SAFE
        .decode(data)
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(data))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 80).unwrap_or_else(|_| strip_tags(html))
}

// last-resort tag stripper for markup html2text chokes on
fn strip_tags(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Collapse a body into a single-line snippet of at most `max_chars`.
pub fn normalize_snippet(s: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(line);
        if out.chars().count() >= max_chars {
            break;
        }
    }
    out.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::gmail::PayloadBody;

    fn leaf(mime: &str, data: &str) -> MessagePayload {
        MessagePayload {
            mime_type: mime.to_string(),
            headers: vec![],
            body: Some(PayloadBody {
                data: Some(data.to_string()),
            }),
            parts: vec![],
        }
    }

    fn b64(s: &str) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(s.as_bytes())
    }

    #[test]
    fn decodes_padded_and_unpadded() {
        assert_eq!(decode_part("SGVsbG8=").as_deref(), Some("Hello"));
        assert_eq!(decode_part("SGVsbG8").as_deref(), Some("Hello"));
        assert!(decode_part("!!not base64!!").is_none());
    }

    #[test]
    fn prefers_plain_over_html() {
        let payload = MessagePayload {
            mime_type: "multipart/alternative".to_string(),
            headers: vec![],
            body: None,
            parts: vec![
                leaf("text/html", &b64("<p>rich</p>")),
                leaf("text/plain", &b64("plain wins")),
            ],
        };
        assert_eq!(extract_body_text(&payload).as_deref(), Some("plain wins"));
    }

    #[test]
    fn nested_parts_are_walked() {
        let inner = MessagePayload {
            mime_type: "multipart/alternative".to_string(),
            headers: vec![],
            body: None,
            parts: vec![leaf("text/plain", &b64("deep text"))],
        };
        let payload = MessagePayload {
            mime_type: "multipart/mixed".to_string(),
            headers: vec![],
            body: None,
            parts: vec![inner],
        };
        assert_eq!(extract_body_text(&payload).as_deref(), Some("deep text"));
    }

    #[test]
    fn html_only_is_rendered_to_text() {
        let payload = leaf("text/html", &b64("<html><body><b>Bold</b> move</body></html>"));
        let text = extract_body_text(&payload).unwrap();
        assert!(text.contains("Bold"));
        assert!(text.contains("move"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn attachment_only_yields_none() {
        let payload = MessagePayload {
            mime_type: "application/pdf".to_string(),
            headers: vec![],
            body: None,
            parts: vec![],
        };
        assert!(extract_body_text(&payload).is_none());
    }

    #[test]
    fn snippet_collapses_whitespace_and_truncates() {
        let s = "first line\n\n   second line   \nthird";
        assert_eq!(normalize_snippet(s, 200), "first line second line third");
        assert_eq!(normalize_snippet(s, 10), "first line");
    }
}
