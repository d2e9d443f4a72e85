//! Rewrite plans.
//!
//! A [`RewritePlan`] fully determines the new history before anything is
//! mutated. It is built once from classified and matched commits and is the
//! only input the executor needs.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::{Classified, CommitKind};
use crate::commit::{CommitId, CommitRecord};
use crate::error::Error;
use crate::matcher::MatchResult;

/// How an amending commit's message combines with its target's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmendMode {
    /// Keep the target's message.
    Fixup,
    /// Append the squash commit's body to the target's message.
    Squash,
    /// Replace the target's message with the amending commit's body.
    Reword,
}

impl AmendMode {
    fn verb(self) -> &'static str {
        match self {
            AmendMode::Fixup => "fixup",
            AmendMode::Squash => "squash",
            AmendMode::Reword => "amend",
        }
    }
}

/// One step of a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RewriteOperation {
    /// Carry the commit forward onto the new tip.
    Keep { commit: CommitId },
    /// Fold `fixup`'s changes into the current version of `target`.
    Amend {
        target: CommitId,
        fixup: CommitId,
        mode: AmendMode,
    },
    /// Omit the commit.
    Drop { commit: CommitId },
}

impl RewriteOperation {
    /// The range commit this operation accounts for. Every commit is
    /// accounted for by exactly one operation.
    pub fn subject_commit(&self) -> &CommitId {
        match self {
            RewriteOperation::Keep { commit } | RewriteOperation::Drop { commit } => commit,
            RewriteOperation::Amend { fixup, .. } => fixup,
        }
    }
}

/// An immutable, validated sequence of rewrite operations.
#[derive(Debug, Clone)]
pub struct RewritePlan {
    base: CommitId,
    tip: CommitId,
    operations: Vec<RewriteOperation>,
    commits: HashMap<CommitId, CommitRecord>,
    hash: String,
}

impl RewritePlan {
    /// Build a plan from commits (oldest first) and their matches.
    ///
    /// `base` is the exclusive old boundary the new history grows from and
    /// `tip` the inclusive new boundary.
    pub fn build(
        base: CommitId,
        tip: CommitId,
        commits: Vec<Classified>,
        matches: &MatchResult,
    ) -> Result<Self, Error> {
        let position: HashMap<&CommitId, usize> = commits
            .iter()
            .enumerate()
            .map(|(i, c)| (&c.record.id, i))
            .collect();

        let revert_targets: HashSet<&CommitId> = commits
            .iter()
            .filter(|c| matches!(c.kind, CommitKind::Revert { .. }))
            .filter_map(|c| matches.resolved(&c.record.id))
            .collect();

        // One group per original position: the commit's own operation
        // followed by the chain of amendments folded into it.
        let mut groups: Vec<Vec<RewriteOperation>> = vec![Vec::new(); commits.len()];
        for (i, commit) in commits.iter().enumerate() {
            let id = &commit.record.id;
            let resolved = matches.resolved(id);
            let op = match (&commit.kind, resolved) {
                (CommitKind::Fixup { .. }, Some(target)) => {
                    amend(&mut groups, &position, target, id, AmendMode::Fixup)?;
                    continue;
                }
                (CommitKind::Squash { .. }, Some(target)) => {
                    amend(&mut groups, &position, target, id, AmendMode::Squash)?;
                    continue;
                }
                (CommitKind::Amend { .. }, Some(target)) => {
                    amend(&mut groups, &position, target, id, AmendMode::Reword)?;
                    continue;
                }
                (CommitKind::Revert { .. }, Some(_)) => RewriteOperation::Drop { commit: id.clone() },
                (CommitKind::Normal { .. }, _) if revert_targets.contains(id) => {
                    RewriteOperation::Drop { commit: id.clone() }
                }
                _ => RewriteOperation::Keep { commit: id.clone() },
            };
            groups[i].push(op);
        }

        let operations: Vec<RewriteOperation> = groups.into_iter().flatten().collect();
        let commits: HashMap<CommitId, CommitRecord> = commits
            .into_iter()
            .map(|c| (c.record.id.clone(), c.record))
            .collect();
        validate(&operations, &commits)?;

        let hash = plan_hash(&base, &operations)?;
        tracing::debug!(operations = operations.len(), %hash, "built rewrite plan");
        Ok(Self {
            base,
            tip,
            operations,
            commits,
            hash,
        })
    }

    /// The exclusive old boundary.
    pub fn base(&self) -> &CommitId {
        &self.base
    }

    /// The inclusive new boundary: the head before rewriting.
    pub fn tip(&self) -> &CommitId {
        &self.tip
    }

    pub fn operations(&self) -> &[RewriteOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The source record for a commit referenced by this plan.
    pub fn commit(&self, id: &CommitId) -> Result<&CommitRecord, Error> {
        self.commits
            .get(id)
            .ok_or_else(|| Error::PlanInvariant(format!("commit {id} is not part of the plan")))
    }

    /// Content hash of the base and serialized operations. Checkpoints carry
    /// it so a different plan can never resume them.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Whether executing this plan would change nothing.
    pub fn is_noop(&self) -> bool {
        self.operations
            .iter()
            .all(|op| matches!(op, RewriteOperation::Keep { .. }))
    }

    /// Render the plan for display without touching any backend.
    pub fn dry_run(&self) -> Vec<OperationSummary> {
        self.operations
            .iter()
            .enumerate()
            .map(|(index, op)| {
                let commit = op.subject_commit().clone();
                let subject = self
                    .commits
                    .get(&commit)
                    .map(|c| c.subject.clone())
                    .unwrap_or_default();
                let (action, target) = match op {
                    RewriteOperation::Keep { .. } => ("pick", None),
                    RewriteOperation::Drop { .. } => ("drop", None),
                    RewriteOperation::Amend { target, mode, .. } => {
                        (mode.verb(), Some(target.clone()))
                    }
                };
                OperationSummary {
                    index,
                    action,
                    commit,
                    target,
                    subject,
                }
            })
            .collect()
    }
}

/// Display form of a single operation, in the style of a rebase todo list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSummary {
    pub index: usize,
    pub action: &'static str,
    pub commit: CommitId,
    pub target: Option<CommitId>,
    pub subject: String,
}

impl fmt::Display for OperationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6} {} {}", self.action, self.commit.short(), self.subject)?;
        if let Some(target) = &self.target {
            write!(f, " (into {})", target.short())?;
        }
        Ok(())
    }
}

fn amend(
    groups: &mut [Vec<RewriteOperation>],
    position: &HashMap<&CommitId, usize>,
    target: &CommitId,
    fixup: &CommitId,
    mode: AmendMode,
) -> Result<(), Error> {
    let &at = position
        .get(target)
        .ok_or_else(|| Error::PlanInvariant(format!("amend target {target} is not in range")))?;
    groups[at].push(RewriteOperation::Amend {
        target: target.clone(),
        fixup: fixup.clone(),
        mode,
    });
    Ok(())
}

/// Check that every range commit is accounted for exactly once and that each
/// amendment directly follows its target's chain.
fn validate(
    operations: &[RewriteOperation],
    commits: &HashMap<CommitId, CommitRecord>,
) -> Result<(), Error> {
    let mut seen = HashSet::new();
    let mut chain: Option<&CommitId> = None;

    for (index, op) in operations.iter().enumerate() {
        let id = op.subject_commit();
        if !commits.contains_key(id) {
            return Err(Error::PlanInvariant(format!(
                "operation {index} references {id}, which is not in range"
            )));
        }
        if !seen.insert(id) {
            return Err(Error::PlanInvariant(format!(
                "commit {id} appears in more than one operation"
            )));
        }
        match op {
            RewriteOperation::Keep { commit } => chain = Some(commit),
            RewriteOperation::Drop { .. } => chain = None,
            RewriteOperation::Amend { target, .. } => {
                if chain != Some(target) {
                    return Err(Error::PlanInvariant(format!(
                        "amendment at {index} does not follow its target {target}"
                    )));
                }
            }
        }
    }

    if seen.len() != commits.len() {
        let missing = commits
            .keys()
            .find(|id| !seen.contains(id))
            .map(|id| id.to_string())
            .unwrap_or_default();
        return Err(Error::PlanInvariant(format!(
            "commit {missing} is missing from the plan"
        )));
    }
    Ok(())
}

fn plan_hash(base: &CommitId, operations: &[RewriteOperation]) -> Result<String, Error> {
    let serialized = serde_json::to_vec(&(base, operations))
        .map_err(|e| Error::PlanInvariant(format!("plan is not serializable: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    Ok(format!("{:x}", hasher.finalize()))
}
