//! Execute a rewrite plan.
//!
//! The executor applies one operation at a time and records a [`Checkpoint`]
//! after each. The checkpoint stores the position by operation index, so a
//! step that was applied but not recorded is simply replayed: every rewritten
//! commit copies its metadata from the source commits, which makes a replay
//! produce the same content.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{ApplyOutcome, Backend, NewCommit};
use crate::checkpoint::{Checkpoint, CheckpointStore, Receipt};
use crate::commit::{CommitId, join_message, split_message};
use crate::error::Error;
use crate::plan::{AmendMode, RewriteOperation, RewritePlan};

/// Where a run ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    /// Every operation was applied. Branch refs were not moved.
    Completed,
    /// An operation could not be applied mechanically. Resolve the conflicts
    /// in the working tree and execute again, or abort.
    Conflicted,
    /// Cancellation was requested; the checkpoint is up to date.
    Interrupted,
    /// The rewrite was rolled back to the original head.
    Aborted,
}

/// Outcome of [`Executor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub state: ExecutionState,
    /// Current head: the rewritten tip once completed.
    pub head: CommitId,
    /// Index of the next operation to run.
    pub next_operation: usize,
    /// Conflicted paths when `state` is `Conflicted`.
    pub conflict_paths: Vec<PathBuf>,
}

/// Requests that execution stop at the next operation boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Step {
    Applied(CommitId),
    Conflicted(Vec<PathBuf>),
}

/// Runs a [`RewritePlan`] against a backend, persisting progress under `key`.
pub struct Executor<'a> {
    backend: &'a mut dyn Backend,
    store: &'a mut dyn CheckpointStore,
    key: String,
    cancel: CancelFlag,
    squash_separator: String,
}

impl<'a> Executor<'a> {
    /// `key` identifies the repository in the checkpoint store, usually its
    /// path.
    pub fn new(
        backend: &'a mut dyn Backend,
        store: &'a mut dyn CheckpointStore,
        key: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            store,
            key: key.into(),
            cancel: CancelFlag::default(),
            squash_separator: "\n\n".to_string(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Text placed between a message and an appended squash body.
    pub fn with_squash_separator(mut self, separator: impl Into<String>) -> Self {
        self.squash_separator = separator.into();
        self
    }

    /// Run `plan`, resuming from a matching checkpoint if one exists.
    #[tracing::instrument(skip_all, fields(plan = %&plan.hash()[..12], key = %self.key))]
    pub fn execute(&mut self, plan: &RewritePlan) -> Result<ExecutionResult, Error> {
        let mut checkpoint = match Checkpoint::load(&*self.store, &self.key)? {
            Some(cp) if cp.plan_hash == plan.hash() => {
                tracing::info!(next = cp.next_operation, "resuming");
                cp
            }
            Some(stale) => {
                tracing::warn!(
                    found = %stale.plan_hash,
                    next = stale.next_operation,
                    "discarding checkpoint of a different plan"
                );
                self.start(plan, Some(stale.original_head))?
            }
            None => match self.already_completed(plan)? {
                Some(head) => {
                    tracing::info!(head = %head.short(), "plan already completed");
                    return Ok(result(ExecutionState::Completed, head, plan.len()));
                }
                None => self.start(plan, None)?,
            },
        };

        if checkpoint.conflicted {
            let paths = self.backend.conflicted_paths()?;
            if !paths.is_empty() {
                return Ok(self.conflicted(&checkpoint, paths));
            }
            if self.backend.apply_in_progress(&checkpoint.current_head)? {
                let op = operation(plan, checkpoint.next_operation)?;
                let head = self.finish(plan, op, &checkpoint.current_head)?;
                tracing::info!(index = checkpoint.next_operation, "conflict resolved");
                self.advance(&mut checkpoint, head)?;
            } else {
                tracing::warn!(
                    index = checkpoint.next_operation,
                    "conflicted apply was discarded; replaying"
                );
                checkpoint.conflicted = false;
                self.backend.reset_hard(&checkpoint.current_head)?;
            }
        } else {
            // Anything past the recorded head is an unrecorded step; drop it
            // and replay.
            self.backend.reset_hard(&checkpoint.current_head)?;
        }

        while checkpoint.next_operation < plan.len() {
            if self.cancel.is_cancelled() {
                tracing::info!(next = checkpoint.next_operation, "interrupted");
                return Ok(result(
                    ExecutionState::Interrupted,
                    checkpoint.current_head.clone(),
                    checkpoint.next_operation,
                ));
            }

            let index = checkpoint.next_operation;
            let op = operation(plan, index)?;
            tracing::debug!(index, ?op, "applying");
            match self.step(plan, op, &checkpoint.current_head)? {
                Step::Applied(head) => self.advance(&mut checkpoint, head)?,
                Step::Conflicted(paths) => {
                    tracing::warn!(index, paths = paths.len(), "conflict");
                    checkpoint.conflicted = true;
                    checkpoint.save(&mut *self.store, &self.key)?;
                    return Ok(self.conflicted(&checkpoint, paths));
                }
            }
        }

        self.complete(plan, checkpoint)
    }

    /// Roll back an in-progress rewrite to its original head. Returns `None`
    /// if nothing was in progress.
    #[tracing::instrument(skip_all, fields(key = %self.key))]
    pub fn abort(&mut self) -> Result<Option<ExecutionResult>, Error> {
        let Some(checkpoint) = Checkpoint::load(&*self.store, &self.key)? else {
            tracing::info!("no rewrite in progress");
            return Ok(None);
        };
        self.backend.abort_apply()?;
        self.backend.reset_hard(&checkpoint.original_head)?;
        Checkpoint::clear(&mut *self.store, &self.key)?;
        tracing::info!(head = %checkpoint.original_head.short(), "aborted");
        Ok(Some(result(
            ExecutionState::Aborted,
            checkpoint.original_head,
            checkpoint.next_operation,
        )))
    }

    fn already_completed(&self, plan: &RewritePlan) -> Result<Option<CommitId>, Error> {
        let Some(receipt) = Receipt::load(&*self.store, &self.key)? else {
            return Ok(None);
        };
        if receipt.plan_hash == plan.hash() && self.backend.head()? == receipt.head {
            Ok(Some(receipt.head))
        } else {
            Ok(None)
        }
    }

    /// Record the starting point. The loop then moves to the base.
    ///
    /// `original_head` carries over from a discarded checkpoint so that abort
    /// still returns to where the user was before any rewrite.
    fn start(
        &mut self,
        plan: &RewritePlan,
        original_head: Option<CommitId>,
    ) -> Result<Checkpoint, Error> {
        let original_head = match original_head {
            Some(head) => head,
            None => self.backend.head()?,
        };
        let checkpoint = Checkpoint {
            plan_hash: plan.hash().to_string(),
            next_operation: 0,
            current_head: plan.base().clone(),
            original_head,
            base: plan.base().clone(),
            tip: plan.tip().clone(),
            conflicted: false,
        };
        checkpoint.save(&mut *self.store, &self.key)?;
        tracing::info!(
            base = %plan.base().short(),
            operations = plan.len(),
            "starting rewrite"
        );
        Ok(checkpoint)
    }

    fn step(
        &mut self,
        plan: &RewritePlan,
        op: &RewriteOperation,
        head: &CommitId,
    ) -> Result<Step, Error> {
        let to_apply = match op {
            RewriteOperation::Drop { .. } => return Ok(Step::Applied(head.clone())),
            RewriteOperation::Keep { commit } => {
                let record = plan.commit(commit)?;
                if record.parent_ids.first() == Some(head) {
                    // Nothing upstream of it changed: reuse it as is.
                    self.backend.reset_hard(commit)?;
                    return Ok(Step::Applied(commit.clone()));
                }
                commit
            }
            RewriteOperation::Amend { fixup, .. } => fixup,
        };

        match self.backend.apply(to_apply)? {
            ApplyOutcome::Clean => Ok(Step::Applied(self.finish(plan, op, head)?)),
            ApplyOutcome::Conflicted(paths) => Ok(Step::Conflicted(paths)),
        }
    }

    /// Commit the applied changes of `op` on top of `head`.
    fn finish(
        &mut self,
        plan: &RewritePlan,
        op: &RewriteOperation,
        head: &CommitId,
    ) -> Result<CommitId, Error> {
        let new = match op {
            RewriteOperation::Drop { .. } => return Ok(head.clone()),
            RewriteOperation::Keep { commit } => {
                let record = plan.commit(commit)?;
                NewCommit {
                    parents: vec![head.clone()],
                    author: record.author.clone(),
                    committer: record.committer.clone(),
                    message: record.message(),
                }
            }
            RewriteOperation::Amend {
                target,
                fixup,
                mode,
            } => {
                let target = plan.commit(target)?;
                let fixup = plan.commit(fixup)?;
                let current = self.backend.read_commit(head)?;
                let message = amended_message(
                    &current.message(),
                    &fixup.body,
                    *mode,
                    &self.squash_separator,
                );
                NewCommit {
                    parents: current.parent_ids,
                    author: target.author.clone(),
                    committer: target.committer.clone(),
                    message,
                }
            }
        };
        Ok(self.backend.commit(&new)?)
    }

    fn advance(&mut self, checkpoint: &mut Checkpoint, head: CommitId) -> Result<(), Error> {
        checkpoint.next_operation += 1;
        checkpoint.current_head = head;
        checkpoint.conflicted = false;
        checkpoint.save(&mut *self.store, &self.key)
    }

    fn conflicted(&self, checkpoint: &Checkpoint, paths: Vec<PathBuf>) -> ExecutionResult {
        ExecutionResult {
            state: ExecutionState::Conflicted,
            head: checkpoint.current_head.clone(),
            next_operation: checkpoint.next_operation,
            conflict_paths: paths,
        }
    }

    fn complete(
        &mut self,
        plan: &RewritePlan,
        checkpoint: Checkpoint,
    ) -> Result<ExecutionResult, Error> {
        let head = checkpoint.current_head;
        Checkpoint::clear(&mut *self.store, &self.key)?;
        Receipt {
            plan_hash: plan.hash().to_string(),
            head: head.clone(),
        }
        .save(&mut *self.store, &self.key)?;
        tracing::info!(head = %head.short(), "rewrite complete");
        Ok(result(ExecutionState::Completed, head, plan.len()))
    }
}

fn operation(plan: &RewritePlan, index: usize) -> Result<&RewriteOperation, Error> {
    plan.operations().get(index).ok_or_else(|| {
        Error::PlanInvariant(format!(
            "checkpoint points at operation {index} of {}",
            plan.len()
        ))
    })
}

fn result(state: ExecutionState, head: CommitId, next_operation: usize) -> ExecutionResult {
    ExecutionResult {
        state,
        head,
        next_operation,
        conflict_paths: Vec::new(),
    }
}

/// The message of an amended commit, given the current message of the
/// commit being amended and the body of the amending commit.
fn amended_message(current: &str, body: &str, mode: AmendMode, separator: &str) -> String {
    let body = body.trim();
    match mode {
        AmendMode::Fixup => current.to_string(),
        AmendMode::Squash if body.is_empty() => current.to_string(),
        AmendMode::Squash => format!("{}{separator}{body}\n", current.trim_end()),
        AmendMode::Reword if body.is_empty() => current.to_string(),
        AmendMode::Reword => {
            let (subject, rest) = split_message(body);
            join_message(&subject, &rest)
        }
    }
}
