//! Resolve autosquash commits to their targets and pair reverts with the
//! commits they undo.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::classify::{Classified, CommitKind, normalize};
use crate::commit::CommitId;

/// Why a reference could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// Nothing in range carries the referenced subject.
    NoCandidate,
    /// The reference is empty once markers are stripped.
    Ambiguous,
    /// Every candidate is already claimed by another revert, or is being
    /// amended and so no longer cancels out.
    Consumed,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Unresolved::NoCandidate => "no matching commit in range",
            Unresolved::Ambiguous => "reference is empty",
            Unresolved::Consumed => "target already consumed",
        })
    }
}

/// Outcome for one fixup, squash, amend or revert commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Resolved(CommitId),
    Unresolved(Unresolved),
}

/// A reference that degraded to an ordinary commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub commit: CommitId,
    pub subject: String,
    pub reason: Unresolved,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\": {}; keeping it as is",
            self.commit.short(),
            self.subject,
            self.reason
        )
    }
}

/// Targets for every fixup, squash, amend and revert commit in a range.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    targets: BTreeMap<CommitId, Target>,
    warnings: Vec<Warning>,
}

impl MatchResult {
    pub fn get(&self, id: &CommitId) -> Option<&Target> {
        self.targets.get(id)
    }

    /// The resolved target of `id`, if any.
    pub fn resolved(&self, id: &CommitId) -> Option<&CommitId> {
        match self.targets.get(id) {
            Some(Target::Resolved(target)) => Some(target),
            _ => None,
        }
    }

    /// Unresolved references, in commit order.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    fn insert(&mut self, commit: &Classified, target: Target) {
        if let Target::Unresolved(reason) = target {
            tracing::warn!(
                commit = %commit.record.id.short(),
                subject = %commit.record.subject,
                %reason,
                "unresolved reference"
            );
            self.warnings.push(Warning {
                commit: commit.record.id.clone(),
                subject: commit.record.subject.clone(),
                reason,
            });
        }
        self.targets.insert(commit.record.id.clone(), target);
    }
}

/// Match every marker commit in `commits` (oldest first).
pub fn match_commits(commits: &[Classified]) -> MatchResult {
    let mut result = MatchResult::default();
    let mut amended = HashSet::new();

    for (pos, commit) in commits.iter().enumerate() {
        if !commit.kind.is_autosquash() {
            continue;
        }
        let key = commit.kind.key();
        if key.is_empty() {
            result.insert(commit, Target::Unresolved(Unresolved::Ambiguous));
            continue;
        }
        let nearest = commits[..pos]
            .iter()
            .rposition(|c| !c.kind.is_autosquash() && normalize(&c.record.subject) == key);
        match nearest {
            Some(target) => {
                amended.insert(target);
                result.insert(commit, Target::Resolved(commits[target].record.id.clone()));
            }
            None => result.insert(commit, Target::Unresolved(Unresolved::NoCandidate)),
        }
    }

    // Reverts run second so they can see which commits carry amendments.
    let mut claimed = HashSet::new();
    for (pos, commit) in commits.iter().enumerate() {
        let CommitKind::Revert {
            target_key,
            reverted,
        } = &commit.kind
        else {
            continue;
        };

        let candidates = revert_candidates(commits, pos, target_key, reverted.as_deref());
        if candidates.is_empty() {
            result.insert(commit, Target::Unresolved(Unresolved::NoCandidate));
            continue;
        }
        let pick = (!amended.contains(&pos))
            .then(|| {
                candidates
                    .into_iter()
                    .find(|c| !claimed.contains(c) && !amended.contains(c))
            })
            .flatten();
        match pick {
            Some(target) => {
                claimed.insert(target);
                claimed.insert(pos);
                result.insert(commit, Target::Resolved(commits[target].record.id.clone()));
            }
            None => result.insert(commit, Target::Unresolved(Unresolved::Consumed)),
        }
    }

    result
}

/// Normal commits whose subject equals `key`, in preference order: an exact
/// id named by the revert first, then nearest earlier, then nearest later.
fn revert_candidates(
    commits: &[Classified],
    pos: usize,
    key: &str,
    reverted: Option<&str>,
) -> Vec<usize> {
    let is_candidate = |i: usize| {
        let c = &commits[i];
        i != pos && matches!(&c.kind, CommitKind::Normal { key: k } if k == key)
    };
    let mut candidates: Vec<usize> = (0..pos)
        .rev()
        .chain(pos + 1..commits.len())
        .filter(|&i| is_candidate(i))
        .collect();
    if let Some(reverted) = reverted {
        if let Some(exact) = candidates
            .iter()
            .position(|&i| commits[i].record.id.matches_prefix(reverted))
        {
            let exact = candidates.remove(exact);
            candidates.insert(0, exact);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassifyOptions, classify_all};
    use crate::commit::{CommitRecord, Signature, Timestamp};

    fn commits(subjects: &[&str]) -> Vec<Classified> {
        let messages: Vec<_> = subjects.iter().map(|s| (*s, "")).collect();
        commits_with_bodies(&messages)
    }

    fn commits_with_bodies(messages: &[(&str, &str)]) -> Vec<Classified> {
        let sig = Signature {
            name: "Dev".into(),
            email: "dev@example.com".into(),
            time: Timestamp {
                seconds: 0,
                offset_minutes: 0,
            },
        };
        let records = messages
            .iter()
            .enumerate()
            .map(|(i, (subject, body))| CommitRecord {
                id: CommitId::new(format!("{i:040x}")),
                parent_ids: vec![CommitId::new(format!("{:040x}", i + 1000))],
                author: sig.clone(),
                committer: sig.clone(),
                subject: subject.to_string(),
                body: body.to_string(),
                tree_id: format!("tree{i}"),
            })
            .collect();
        classify_all(records, ClassifyOptions::default()).unwrap()
    }

    fn id(i: usize) -> CommitId {
        CommitId::new(format!("{i:040x}"))
    }

    #[test]
    fn fixup_resolves_to_nearest_earlier_subject() {
        let c = commits(&["A", "B", "A", "fixup! A"]);
        let m = match_commits(&c);
        assert_eq!(m.resolved(&id(3)), Some(&id(2)));
        assert!(m.warnings().is_empty());
    }

    #[test]
    fn fixup_never_matches_later_commits() {
        let c = commits(&["fixup! A", "A"]);
        let m = match_commits(&c);
        assert_eq!(
            m.get(&id(0)),
            Some(&Target::Unresolved(Unresolved::NoCandidate))
        );
        assert_eq!(m.warnings().len(), 1);
    }

    #[test]
    fn empty_reference_is_ambiguous() {
        let c = commits(&["A", "fixup! fixup! "]);
        let m = match_commits(&c);
        assert_eq!(
            m.get(&id(1)),
            Some(&Target::Unresolved(Unresolved::Ambiguous))
        );
    }

    #[test]
    fn fixup_of_fixup_targets_the_original() {
        let c = commits(&["A", "fixup! A", "fixup! fixup! A"]);
        let m = match_commits(&c);
        assert_eq!(m.resolved(&id(1)), Some(&id(0)));
        assert_eq!(m.resolved(&id(2)), Some(&id(0)));
    }

    #[test]
    fn revert_pairs_with_its_target() {
        let c = commits(&["C: do X", "B", "Revert \"C: do X\""]);
        let m = match_commits(&c);
        assert_eq!(m.resolved(&id(2)), Some(&id(0)));
    }

    #[test]
    fn each_target_is_reverted_at_most_once() {
        let c = commits(&["C", "Revert \"C\"", "Revert \"C\""]);
        let m = match_commits(&c);
        assert_eq!(m.resolved(&id(1)), Some(&id(0)));
        assert_eq!(
            m.get(&id(2)),
            Some(&Target::Unresolved(Unresolved::Consumed))
        );
    }

    #[test]
    fn revert_of_out_of_range_commit_is_unresolved() {
        let c = commits(&["A", "Revert \"Z\""]);
        let m = match_commits(&c);
        assert_eq!(
            m.get(&id(1)),
            Some(&Target::Unresolved(Unresolved::NoCandidate))
        );
    }

    #[test]
    fn amended_commits_do_not_pair_with_reverts() {
        let c = commits(&["C", "fixup! C", "Revert \"C\""]);
        let m = match_commits(&c);
        assert_eq!(m.resolved(&id(1)), Some(&id(0)));
        assert_eq!(
            m.get(&id(2)),
            Some(&Target::Unresolved(Unresolved::Consumed))
        );
    }

    #[test]
    fn revert_naming_an_id_pairs_with_that_commit() {
        let body = format!("This reverts commit {}.", id(0));
        let c = commits_with_bodies(&[("C", ""), ("C", ""), ("Revert \"C\"", body.as_str())]);
        let m = match_commits(&c);
        assert_eq!(m.resolved(&id(2)), Some(&id(0)));

        let subject = format!("Revert \"C\" ({})", id(0));
        let c = commits(&["C", "C", subject.as_str()]);
        let m = match_commits(&c);
        assert_eq!(m.resolved(&id(2)), Some(&id(0)));

        // Without an id the nearest earlier commit wins.
        let c = commits(&["C", "C", "Revert \"C\""]);
        let m = match_commits(&c);
        assert_eq!(m.resolved(&id(2)), Some(&id(1)));
    }

    #[test]
    fn revert_may_precede_its_target() {
        let c = commits(&["Revert \"C\"", "C"]);
        let m = match_commits(&c);
        assert_eq!(m.resolved(&id(0)), Some(&id(1)));
    }
}
