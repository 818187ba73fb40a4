// ── Shape-tolerant comment parsing ──
//
// The upstream payload layout drifts between releases: `id` vs
// `commentId`, a flat `username` vs a nested `user` / `sender` object,
// `text` vs `content` vs `message`. Each field has an ordered list of
// JSON pointers; the first one that yields a non-blank string wins.
// Every step is total, so parsing cannot panic on any input.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::comment::Comment;

pub const MAX_USERNAME_CHARS: usize = 50;
pub const MAX_TEXT_CHARS: usize = 500;
pub const UNKNOWN_SESSION: &str = "unknown-session";

const ID_PATHS: &[&str] = &["/id", "/commentId", "/msgId", "/comment/id"];
const USER_ID_PATHS: &[&str] = &[
    "/userId",
    "/user/userId",
    "/user/id",
    "/sender/userId",
    "/sender/id",
];
const USERNAME_PATHS: &[&str] = &[
    "/username",
    "/uniqueId",
    "/user/uniqueId",
    "/user/username",
    "/sender/username",
    "/sender/uniqueId",
    "/nickname",
];
const TEXT_PATHS: &[&str] = &["/text", "/content", "/message", "/comment/text", "/comment"];
const SESSION_PATHS: &[&str] = &["/sessionId", "/session/id", "/roomId"];
const TIMESTAMP_PATHS: &[&str] = &["/timestamp", "/createTime", "/created_at"];

/// Validate a raw payload into a [`Comment`].
///
/// Returns `None` if a required field (id, user id, username, text) is
/// missing, not a string, or blank. The comment timestamp comes from the
/// payload when it carries a usable one, otherwise from `received_at`.
pub fn parse_and_validate_comment(raw: &Value, received_at: DateTime<Utc>) -> Option<Comment> {
    if !raw.is_object() {
        return None;
    }

    let id = first_string(raw, ID_PATHS)?;
    let user_id = first_string(raw, USER_ID_PATHS)?;
    let username = sanitize_username(&first_string(raw, USERNAME_PATHS)?);
    if username.is_empty() {
        return None;
    }
    let text = sanitize_text(&first_string(raw, TEXT_PATHS)?);

    let session_id = first_string(raw, SESSION_PATHS).unwrap_or_else(|| UNKNOWN_SESSION.to_owned());
    let timestamp = first_timestamp(raw, TIMESTAMP_PATHS).unwrap_or(received_at);

    Some(Comment {
        id,
        user_id,
        username,
        text,
        timestamp,
        session_id,
    })
}

/// Keep `[A-Za-z0-9_.@-]`, at most 50 characters.
pub fn sanitize_username(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'))
        .take(MAX_USERNAME_CHARS)
        .collect()
}

/// Trim, then keep at most 500 characters.
pub fn sanitize_text(raw: &str) -> String {
    raw.trim().chars().take(MAX_TEXT_CHARS).collect()
}

fn first_string(raw: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| raw.pointer(p))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Millisecond epoch numbers (or numeric strings) and RFC 3339 strings.
fn first_timestamp(raw: &Value, paths: &[&str]) -> Option<DateTime<Utc>> {
    paths
        .iter()
        .filter_map(|p| raw.pointer(p))
        .find_map(|v| match v {
            Value::Number(n) => n.as_i64().and_then(millis_to_datetime),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(millis_to_datetime)
                .or_else(|| {
                    DateTime::parse_from_rfc3339(s.trim())
                        .ok()
                        .map(|d| d.with_timezone(&Utc))
                }),
            _ => None,
        })
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}
