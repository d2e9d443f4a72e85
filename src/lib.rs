//! Autofixup: fold `fixup!`, `squash!` and revert pairs into a clean linear
//! history without an interactive rebase.
//!
//! # Architecture
//!
//! - **Loader**: read a commit range from the [`Backend`]
//! - **Classify**: label each commit by its subject line
//! - **Matcher**: find the commit each fixup amends and each revert undoes
//! - **Plan**: turn matches into an ordered, validated [`RewritePlan`]
//! - **Execute**: apply the plan with checkpoints, conflicts and rollback
//!
//! Planning is read-only. Only [`execute`] and [`abort`] touch the backend.

pub mod backend;
mod checkpoint;
mod classify;
mod commit;
mod config;
mod error;
mod execute;
mod loader;
mod matcher;
mod plan;

pub use backend::{ApplyOutcome, Backend, Git, NewCommit};
pub use checkpoint::{Checkpoint, CheckpointStore, FileStore, MemoryStore, Receipt};
pub use classify::{Classified, ClassifyOptions, CommitKind};
pub use commit::{CommitId, CommitRecord, Signature, Timestamp};
pub use config::{CONFIG_FILE, Config};
pub use error::Error;
pub use execute::{CancelFlag, ExecutionResult, ExecutionState, Executor};
pub use loader::{LoadedRange, RevRange, load_range};
pub use matcher::{MatchResult, Target, Unresolved, Warning};
pub use plan::{AmendMode, OperationSummary, RewriteOperation, RewritePlan};

/// A plan ready to execute, plus the references that could not be resolved.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub plan: RewritePlan,
    pub warnings: Vec<Warning>,
}

/// Load `old..new`, classify and match its commits, and build a plan.
pub fn load_and_classify(backend: &dyn Backend, old: &str, new: &str) -> Result<Prepared, Error> {
    load_and_classify_with(backend, old, new, ClassifyOptions::default())
}

/// [`load_and_classify`] with explicit classifier options.
pub fn load_and_classify_with(
    backend: &dyn Backend,
    old: &str,
    new: &str,
    options: ClassifyOptions,
) -> Result<Prepared, Error> {
    let LoadedRange { base, tip, commits } = load_range(backend, old, new)?;
    let classified = classify::classify_all(commits, options)?;
    let matches = matcher::match_commits(&classified);
    let warnings = matches.warnings().to_vec();
    let plan = RewritePlan::build(base, tip, classified, &matches)?;
    Ok(Prepared { plan, warnings })
}

/// Run or resume `plan`. Progress is stored in `store` under `key`.
pub fn execute(
    backend: &mut dyn Backend,
    plan: &RewritePlan,
    store: &mut dyn CheckpointStore,
    key: &str,
) -> Result<ExecutionResult, Error> {
    Executor::new(backend, store, key).execute(plan)
}

/// Roll back an in-progress rewrite. The result is `Aborted` and carries the
/// restored head; `None` means nothing was in progress.
pub fn abort(
    backend: &mut dyn Backend,
    store: &mut dyn CheckpointStore,
    key: &str,
) -> Result<Option<ExecutionResult>, Error> {
    Executor::new(backend, store, key).abort()
}

/// Render a plan without touching any backend.
pub fn dry_run(plan: &RewritePlan) -> Vec<OperationSummary> {
    plan.dry_run()
}
