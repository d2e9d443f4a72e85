//! Load a commit range from the backend.

use std::fmt;
use std::str::FromStr;

use crate::backend::Backend;
use crate::commit::{CommitId, CommitRecord};
use crate::error::Error;

/// A revision range such as `main..HEAD`.
///
/// `old` is exclusive and `new` inclusive. `old..` and a bare `old` both
/// mean `old..HEAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevRange {
    pub old: String,
    pub new: String,
}

impl FromStr for RevRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains("...") {
            return Err(format!("symmetric ranges are not supported: '{s}'"));
        }
        let (old, new) = match s.split_once("..") {
            Some((old, new)) => (old.trim(), new.trim()),
            None => (s.trim(), ""),
        };
        if old.is_empty() {
            return Err(format!("range '{s}' has no lower bound"));
        }
        Ok(Self {
            old: old.to_string(),
            new: if new.is_empty() { "HEAD" } else { new }.to_string(),
        })
    }
}

impl fmt::Display for RevRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.old, self.new)
    }
}

/// Commits of a range, oldest first, with resolved boundaries.
#[derive(Debug, Clone)]
pub struct LoadedRange {
    pub base: CommitId,
    pub tip: CommitId,
    pub commits: Vec<CommitRecord>,
}

/// Read `old..new` from the backend. Read-only.
pub fn load_range(backend: &dyn Backend, old: &str, new: &str) -> Result<LoadedRange, Error> {
    let base = backend.resolve(old)?;
    let tip = backend.resolve(new)?;

    if !backend.is_ancestor(&base, &tip)? {
        return Err(Error::Range {
            old: old.to_string(),
            new: new.to_string(),
        });
    }

    let commits = backend.log(&base, &tip)?;
    if commits.is_empty() {
        return Err(Error::EmptyRange {
            old: old.to_string(),
            new: new.to_string(),
        });
    }
    tracing::debug!(
        base = %base.short(),
        tip = %tip.short(),
        commits = commits.len(),
        "loaded range"
    );
    Ok(LoadedRange { base, tip, commits })
}
