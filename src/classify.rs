//! Commit classification by subject line.

use crate::commit::CommitRecord;
use crate::error::Error;

const FIXUP_PREFIX: &str = "fixup! ";
const SQUASH_PREFIX: &str = "squash! ";
const AMEND_PREFIX: &str = "amend! ";
const REVERT_PREFIX: &str = "Revert \"";
const REVERTS_COMMIT: &str = "This reverts commit ";

/// What a commit means for the rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitKind {
    /// An ordinary commit. `key` is its own normalized subject, which later
    /// fixups are matched against.
    Normal { key: String },
    Fixup { target_key: String },
    Squash { target_key: String },
    /// `amend! <subject>`: like a fixup, but its body replaces the target's message.
    Amend { target_key: String },
    /// `Revert "<subject>"`. `reverted` is the commit id named by the message,
    /// if any.
    Revert {
        target_key: String,
        reverted: Option<String>,
    },
}

impl CommitKind {
    /// The normalized subject this commit matches by (its own for normal
    /// commits, its target's for everything else).
    pub fn key(&self) -> &str {
        match self {
            CommitKind::Normal { key } => key,
            CommitKind::Fixup { target_key }
            | CommitKind::Squash { target_key }
            | CommitKind::Amend { target_key }
            | CommitKind::Revert { target_key, .. } => target_key,
        }
    }

    /// Fixup, squash and amend commits fold into an earlier commit.
    pub fn is_autosquash(&self) -> bool {
        matches!(
            self,
            CommitKind::Fixup { .. } | CommitKind::Squash { .. } | CommitKind::Amend { .. }
        )
    }
}

/// Knobs for the classifier.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyOptions {
    /// Recognize `amend! ` subjects. When off they classify as normal commits.
    pub amend_markers: bool,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            amend_markers: true,
        }
    }
}

/// A commit record together with its classification.
#[derive(Debug, Clone)]
pub struct Classified {
    pub record: CommitRecord,
    pub kind: CommitKind,
}

/// Classify every commit of a range, rejecting merges.
pub fn classify_all(
    records: Vec<CommitRecord>,
    options: ClassifyOptions,
) -> Result<Vec<Classified>, Error> {
    records
        .into_iter()
        .map(|record| {
            if record.is_merge() {
                return Err(Error::UnsupportedMerge {
                    id: record.id.clone(),
                    parents: record.parent_ids.len(),
                });
            }
            let kind = classify(&record, options);
            Ok(Classified { record, kind })
        })
        .collect()
}

/// Classify a single commit. Total: every subject yields exactly one kind.
pub fn classify(record: &CommitRecord, options: ClassifyOptions) -> CommitKind {
    let subject = record.subject.as_str();

    if let Some(rest) = subject.strip_prefix(FIXUP_PREFIX) {
        return CommitKind::Fixup {
            target_key: strip_markers(rest),
        };
    }
    if let Some(rest) = subject.strip_prefix(SQUASH_PREFIX) {
        return CommitKind::Squash {
            target_key: strip_markers(rest),
        };
    }
    if options.amend_markers {
        if let Some(rest) = subject.strip_prefix(AMEND_PREFIX) {
            return CommitKind::Amend {
                target_key: strip_markers(rest),
            };
        }
    }
    if let Some(target_key) = parse_revert_subject(subject) {
        return CommitKind::Revert {
            target_key,
            reverted: reverted_id(subject, &record.body),
        };
    }

    CommitKind::Normal {
        key: normalize(subject),
    }
}

/// Collapse runs of whitespace and trim.
pub fn normalize(subject: &str) -> String {
    subject.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip any stack of autosquash markers down to the innermost subject, so
/// `fixup! fixup! A` targets `A`.
fn strip_markers(subject: &str) -> String {
    let mut rest = subject.trim_start();
    loop {
        let next = rest
            .strip_prefix(FIXUP_PREFIX)
            .or_else(|| rest.strip_prefix(SQUASH_PREFIX))
            .or_else(|| rest.strip_prefix(AMEND_PREFIX));
        match next {
            Some(inner) => rest = inner.trim_start(),
            None => return normalize(rest),
        }
    }
}

/// `Revert "X"` or `Revert "X" (abc123)` yields `X`.
fn parse_revert_subject(subject: &str) -> Option<String> {
    let rest = subject.strip_prefix(REVERT_PREFIX)?;
    let close = rest.rfind('"')?;
    let (quoted, tail) = (&rest[..close], rest[close + 1..].trim());
    if !tail.is_empty() && !(tail.starts_with('(') && tail.ends_with(')')) {
        return None;
    }
    let key = normalize(quoted);
    if key.is_empty() { None } else { Some(key) }
}

/// The id a revert names, from `This reverts commit <id>.` in the body or a
/// trailing `(<id>)` in the subject.
fn reverted_id(subject: &str, body: &str) -> Option<String> {
    let from_body = body.lines().find_map(|line| {
        let id = line.trim().strip_prefix(REVERTS_COMMIT)?;
        Some(id.trim_end_matches('.').trim().to_string())
    });
    let from_subject = || {
        let open = subject.rfind('(')?;
        let inner = subject[open + 1..].strip_suffix(')')?;
        Some(inner.trim().to_string())
    };
    from_body
        .or_else(from_subject)
        .filter(|id| id.len() >= 4 && id.bytes().all(|b| b.is_ascii_hexdigit()))
}
