//! Errors surfaced by the engine.
//!
//! Validation errors (`Range`, `EmptyRange`, `UnsupportedMerge`) are raised
//! before anything is mutated. Conflicts are not errors; they surface as
//! [`ExecutionState::Conflicted`](crate::ExecutionState::Conflicted).

use std::path::PathBuf;

use thiserror::Error;

use crate::backend;
use crate::commit::CommitId;

/// Errors that can occur while planning or executing a rewrite.
#[derive(Debug, Error)]
pub enum Error {
    #[error("'{old}' is not an ancestor of '{new}'")]
    Range { old: String, new: String },

    #[error("range {old}..{new} contains no commits")]
    EmptyRange { old: String, new: String },

    #[error("commit {id} is a merge ({parents} parents); only linear history can be rewritten")]
    UnsupportedMerge { id: CommitId, parents: usize },

    /// A plan violated its own invariant. This is a bug, not a user error.
    #[error("internal error: rewrite plan is inconsistent: {0}")]
    PlanInvariant(String),

    #[error("checkpoint storage failed for '{key}'")]
    CheckpointIo {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse checkpoint '{key}'")]
    CheckpointDecode {
        key: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize checkpoint")]
    CheckpointEncode(#[from] toml::ser::Error),

    #[error("failed to read config file '{path}'")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}'")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Backend(#[from] backend::Error),
}
