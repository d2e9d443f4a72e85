//! Version-control backends.
//!
//! The engine only talks to a repository through [`Backend`]. [`Git`] drives
//! the `git` command line; [`MemoryBackend`] is an in-process model used by
//! tests.

use std::path::PathBuf;

use crate::commit::{CommitId, CommitRecord, Signature};

mod git;
#[cfg(any(test, feature = "test-support"))]
mod memory;

pub use git::Git;
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryBackend;

/// Result of applying one commit's changes onto the current head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Changes are staged in the index and working tree.
    Clean,
    /// The changes could not be applied mechanically; these paths are left
    /// conflicted in the working tree.
    Conflicted(Vec<PathBuf>),
}

/// A commit to create from the current index.
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub parents: Vec<CommitId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

/// Operations the engine needs from a repository.
///
/// Calls are synchronous. The working tree and index are owned by the caller
/// for the duration of a rewrite.
pub trait Backend {
    /// Resolve a revision expression to a commit id.
    fn resolve(&self, rev: &str) -> Result<CommitId, Error>;

    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, Error>;

    /// Commits reachable from `tip` but not from `base`, oldest first.
    fn log(&self, base: &CommitId, tip: &CommitId) -> Result<Vec<CommitRecord>, Error>;

    fn read_commit(&self, id: &CommitId) -> Result<CommitRecord, Error>;

    fn head(&self) -> Result<CommitId, Error>;

    /// Point a detached head at `id`, discarding index and working tree
    /// changes. Branch refs are never moved.
    fn reset_hard(&mut self, id: &CommitId) -> Result<(), Error>;

    /// Apply the changes `id` introduced relative to its parent onto the
    /// current index and working tree, without committing.
    fn apply(&mut self, id: &CommitId) -> Result<ApplyOutcome, Error>;

    /// Paths with unresolved conflicts.
    fn conflicted_paths(&self) -> Result<Vec<PathBuf>, Error>;

    /// Whether the index still holds applied, uncommitted changes on top of
    /// `head`. False once the user has thrown the apply away.
    fn apply_in_progress(&self, head: &CommitId) -> Result<bool, Error>;

    /// Commit the current index and move head to the new commit.
    fn commit(&mut self, commit: &NewCommit) -> Result<CommitId, Error>;

    /// Forget an in-progress apply.
    fn abort_apply(&mut self) -> Result<(), Error>;
}

/// Errors from backend operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to execute: {0}")]
    Exec(String),

    #[error("not a git repository (searched from '{0}')")]
    NotARepo(String),

    #[error("unknown revision '{0}'")]
    UnknownRevision(String),

    #[error("`{command}` failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },
}
