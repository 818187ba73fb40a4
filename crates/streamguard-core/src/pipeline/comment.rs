// ── Comment domain type ──

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::Serialize;

/// A validated chat comment. Only the parser constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

/// Phone-number-like runs: optional `+`, digits with common separators.
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d[\d\s().-]{5,}\d").expect("phone pattern is valid")
});

const MIN_PHONE_DIGITS: usize = 7;

/// Mask phone numbers in the comment text. Every other field is kept
/// as-is, and masking an already-masked comment changes nothing.
pub fn sanitize_comment(comment: &Comment) -> Comment {
    Comment {
        text: mask_phone_numbers(&comment.text),
        ..comment.clone()
    }
}

fn mask_phone_numbers(text: &str) -> String {
    PHONE_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let run = &caps[0];
            if run.chars().filter(char::is_ascii_digit).count() < MIN_PHONE_DIGITS {
                return run.to_owned();
            }
            run.chars()
                .map(|c| if c.is_ascii_digit() { '*' } else { c })
                .collect()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(text: &str) -> Comment {
        Comment {
            id: "c1".into(),
            user_id: "u1".into(),
            username: "bob".into(),
            text: text.into(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            session_id: "s1".into(),
        }
    }

    #[test]
    fn masks_phone_numbers_only_in_text() {
        let c = comment("call me at +1 (555) 123-4567 tonight");
        let s = sanitize_comment(&c);
        assert_eq!(s.text, "call me at +* (***) ***-**** tonight");
        assert_eq!(s.id, c.id);
        assert_eq!(s.user_id, c.user_id);
        assert_eq!(s.username, c.username);
        assert_eq!(s.timestamp, c.timestamp);
        assert_eq!(s.session_id, c.session_id);
    }

    #[test]
    fn short_digit_runs_are_kept() {
        let c = comment("top 10 at 12:30, score 2024");
        assert_eq!(sanitize_comment(&c).text, c.text);
    }

    #[test]
    fn sanitizing_is_idempotent() {
        for text in [
            "0612345678",
            "reach 555.123.4567 or 555 987 6543",
            "nothing here",
            "",
        ] {
            let once = sanitize_comment(&comment(text));
            let twice = sanitize_comment(&once);
            assert_eq!(once, twice, "text: {text:?}");
        }
    }
}
