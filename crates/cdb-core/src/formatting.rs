//! HTML sanitizer and outbound message rendering.
//!
//! Lesson bodies come from editor-controlled sources (day folders or a
//! master document) and are rendered in Telegram HTML parse mode, which
//! accepts only a small inline tag set. Everything outside the allow-list
//! is escaped so the sanitizer output is always safe to send.

use crate::domain::{CorrelationToken, UserId};
use crate::store::Lesson;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Tags Telegram renders inline. Anything else is escaped verbatim.
const ALLOWED_TAGS: &[&str] = &[
    "b",
    "strong",
    "i",
    "em",
    "u",
    "ins",
    "s",
    "strike",
    "del",
    "code",
    "pre",
    "a",
    "tg-spoiler",
    "blockquote",
];

/// Allow-list sanitizer for lesson/task bodies.
///
/// Allowed tags pass through unchanged; every other `<`, `>`, `"` and bare
/// `&` is escaped, so `1 < 2` becomes `1 &lt; 2` and a `<script>` tag can
/// never survive verbatim.
pub fn sanitize_html(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'<' => {
                if let Some(len) = parse_allowed_tag(&input[i..]) {
                    out.push_str(&input[i..i + len]);
                    i += len;
                } else {
                    out.push_str("&lt;");
                    i += 1;
                }
            }
            b'>' => {
                out.push_str("&gt;");
                i += 1;
            }
            b'"' => {
                out.push_str("&quot;");
                i += 1;
            }
            b'&' => {
                if let Some(len) = entity_len(&input[i..]) {
                    out.push_str(&input[i..i + len]);
                    i += len;
                } else {
                    out.push_str("&amp;");
                    i += 1;
                }
            }
            _ => {
                // Copy the full UTF-8 character, not just one byte.
                let ch = input[i..].chars().next().unwrap_or('\u{fffd}');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    out
}

/// If `s` (starting at `<`) is an allowed open/close tag, return its length.
fn parse_allowed_tag(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    debug_assert_eq!(bytes.first(), Some(&b'<'));

    let mut p = 1usize;
    let closing = bytes.get(p) == Some(&b'/');
    if closing {
        p += 1;
    }

    let name_start = p;
    while p < bytes.len() {
        let b = bytes[p];
        if b.is_ascii_alphanumeric() || b == b'-' {
            p += 1;
        } else {
            break;
        }
    }
    let name = s[name_start..p].to_lowercase();
    if !ALLOWED_TAGS.contains(&name.as_str()) {
        return None;
    }

    if closing {
        // Closing tags take no attributes.
        return (bytes.get(p) == Some(&b'>')).then_some(p + 1);
    }

    if bytes.get(p) == Some(&b'>') {
        return Some(p + 1);
    }

    // Only `<a href="...">` may carry an attribute.
    if name == "a" {
        let rest = &s[p..];
        if let Some(len) = parse_href_attr(rest) {
            return Some(p + len);
        }
    }

    None
}

/// Matches ` href="<url>">` or ` href='<url>'>` with an http/https/tg url.
fn parse_href_attr(s: &str) -> Option<usize> {
    let trimmed = s.trim_start();
    let ws = s.len() - trimmed.len();
    if ws == 0 {
        return None;
    }

    let rest = trimmed.strip_prefix("href=")?;
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    let url = &inner[..end];
    if url.contains('<') || url.contains('>') {
        return None;
    }
    let lower = url.to_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("tg://"))
    {
        return None;
    }

    let after = &inner[end + 1..];
    if !after.starts_with('>') {
        return None;
    }

    // ws + "href=" + quote + url + quote + ">"
    Some(ws + 5 + 1 + end + 1 + 1)
}

/// Length of a known character entity at the start of `s`, if any.
fn entity_len(s: &str) -> Option<usize> {
    for ent in ["&amp;", "&lt;", "&gt;", "&quot;", "&#"] {
        if s.starts_with(ent) {
            if ent == "&#" {
                // Numeric entity: &#123; or &#x1F600;
                let rest = &s[2..];
                let end = rest.find(';')?;
                if end > 0 && end <= 8 {
                    return Some(2 + end + 1);
                }
                return None;
            }
            return Some(ent.len());
        }
    }
    None
}

// === Outbound message rendering ===

const SEPARATOR: &str = "➖➖➖➖➖➖➖➖➖➖";

/// Render a lesson for delivery. `body` and `assignment` are already
/// sanitized by the sync engine; only the title needs escaping here.
pub fn render_lesson_html(lesson: &Lesson) -> String {
    let mut msg = format!(
        "{SEPARATOR}\n📚 <b>{}</b>\n{SEPARATOR}\n\n{}",
        escape_html(&lesson.title),
        lesson.body
    );

    if let Some(task) = &lesson.assignment {
        msg.push_str(&format!("\n\n{SEPARATOR}\n\n📝 <b>Assignment:</b>\n{task}"));
    }

    msg
}

/// Render a submission for the review chat, with the correlation token
/// embedded so a reply can be traced back even if the correlation table
/// is lost across a restart.
pub fn render_submission_html(
    user_id: UserId,
    username: Option<&str>,
    day: u32,
    text: &str,
    token: &CorrelationToken,
) -> String {
    let who = match username {
        Some(u) => format!("@{}", escape_html(u)),
        None => "—".to_string(),
    };
    format!(
        "📝 <b>New submission</b>\n\n\
         👤 User: {who} (id {})\n\
         📚 Day {day}\n\n\
         {}\n\n\
         <code>token: {token}</code>\n\
         <i>Reply to this message to send feedback.</i>",
        user_id.0,
        escape_html(text),
    )
}

/// Pull an embedded correlation token back out of a forwarded submission.
///
/// Works on both the HTML we sent and the plain text Telegram hands back
/// (tags stripped), so this is the restart-safe correlation fallback.
pub fn extract_token(message_text: &str) -> Option<CorrelationToken> {
    let idx = message_text.find("token: ")?;
    let rest = &message_text[idx + "token: ".len()..];
    let tok: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if tok.is_empty() {
        return None;
    }
    Some(CorrelationToken(tok))
}

pub fn render_feedback_html(day: u32, feedback: &str) -> String {
    format!(
        "💬 <b>Feedback on your Day {day} assignment</b>\n\n{}",
        escape_html(feedback)
    )
}

/// Fixed response for tiers without human review.
pub fn auto_response_html(day: u32) -> String {
    format!(
        "✅ <b>Assignment received</b>\n\n\
         Your Day {day} work is noted. Review by our team is not included \
         in your current tariff, but you can discuss it with other \
         participants in the community space."
    )
}
