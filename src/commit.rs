//! Commit records as read from the backend.
//!
//! Records are created once by the loader and never mutated. Rewriting only
//! ever produces new commits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque, content-derived commit identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }

    /// Whether `prefix` abbreviates this id (at least four characters).
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        prefix.len() >= 4 && self.0.starts_with(prefix)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point in time in git's raw form: seconds since the epoch plus the
/// author's UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub offset_minutes: i32,
}

impl Timestamp {
    /// Parse git's raw date format, e.g. `1700000000 +0130`.
    pub fn parse_raw(raw: &str) -> Option<Self> {
        let (secs, tz) = raw.trim().split_once(' ')?;
        let seconds = secs.parse().ok()?;
        let (sign, digits) = match tz.as_bytes().first()? {
            b'+' => (1, &tz[1..]),
            b'-' => (-1, &tz[1..]),
            _ => return None,
        };
        if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let hours: i32 = digits[..2].parse().ok()?;
        let minutes: i32 = digits[2..].parse().ok()?;
        Some(Self {
            seconds,
            offset_minutes: sign * (hours * 60 + minutes),
        })
    }

    /// Render in git's raw date format, as accepted by `GIT_AUTHOR_DATE`.
    pub fn to_raw(self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.abs();
        format!("{} {}{:02}{:02}", self.seconds, sign, abs / 60, abs % 60)
    }
}

/// Identity plus time, used for both author and committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub time: Timestamp,
}

/// One historical commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub id: CommitId,
    pub parent_ids: Vec<CommitId>,
    pub author: Signature,
    pub committer: Signature,
    pub subject: String,
    pub body: String,
    pub tree_id: String,
}

impl CommitRecord {
    /// Reassemble the full commit message.
    pub fn message(&self) -> String {
        join_message(&self.subject, &self.body)
    }

    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }
}

/// Split a raw commit message into its subject line and body.
///
/// The body is everything after the first blank line, with surrounding
/// whitespace trimmed.
pub fn split_message(message: &str) -> (String, String) {
    let message = message.trim_start_matches('\n');
    match message.split_once('\n') {
        Some((subject, rest)) => (subject.trim_end().to_string(), rest.trim().to_string()),
        None => (message.trim_end().to_string(), String::new()),
    }
}

/// Inverse of [`split_message`].
pub fn join_message(subject: &str, body: &str) -> String {
    if body.is_empty() {
        format!("{subject}\n")
    } else {
        format!("{subject}\n\n{body}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_timestamps_round_trip_negative_offsets() {
        let ts = Timestamp::parse_raw("1700000000 -0330").unwrap();
        assert_eq!(ts.offset_minutes, -210);
        assert_eq!(ts.to_raw(), "1700000000 -0330");
    }

    #[test]
    fn malformed_timestamps_are_rejected() {
        assert!(Timestamp::parse_raw("1700000000").is_none());
        assert!(Timestamp::parse_raw("abc +0000").is_none());
        assert!(Timestamp::parse_raw("1700000000 0100").is_none());
    }

    #[test]
    fn split_message_separates_subject_and_body() {
        let (subject, body) = split_message("Add parser\n\nHandles nested input.\n");
        assert_eq!(subject, "Add parser");
        assert_eq!(body, "Handles nested input.");

        let (subject, body) = split_message("Only a subject\n");
        assert_eq!(subject, "Only a subject");
        assert!(body.is_empty());
    }

    #[test]
    fn short_ids_and_prefixes() {
        let id = CommitId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert!(id.matches_prefix("0123"));
        assert!(!id.matches_prefix("012"));
        assert!(!id.matches_prefix("1234"));
    }
}
