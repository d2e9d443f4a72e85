//! In-process repository model for tests.
//!
//! Trees are flat path → content maps. Applying a commit is a per-file
//! three-way merge: a path whose current content matches neither the
//! commit's parent nor the commit itself is a conflict.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use super::{ApplyOutcome, Backend, Error, NewCommit};
use crate::commit::{CommitId, CommitRecord, Signature, Timestamp, split_message};

type Tree = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct Stored {
    record: CommitRecord,
    tree: Tree,
}

/// A repository held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    commits: HashMap<CommitId, Stored>,
    refs: HashMap<String, CommitId>,
    head: CommitId,
    index: Tree,
    conflicts: BTreeSet<String>,
    applying: Option<CommitId>,
    clock: i64,
    mutations: usize,
    fail_apply_of: Option<CommitId>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// A repository with a single empty root commit, tagged `root`.
    pub fn new() -> Self {
        let mut backend = Self {
            commits: HashMap::new(),
            refs: HashMap::new(),
            head: CommitId::new(""),
            index: Tree::new(),
            conflicts: BTreeSet::new(),
            applying: None,
            clock: 1_700_000_000,
            mutations: 0,
            fail_apply_of: None,
        };
        let root = backend.store(Vec::new(), Tree::new(), "Initial commit\n");
        backend.head = root.clone();
        backend.refs.insert("root".to_string(), root);
        backend
    }

    /// Commit `changes` on top of head. `None` deletes a path.
    pub fn commit_files(&mut self, message: &str, changes: &[(&str, Option<&str>)]) -> CommitId {
        let mut tree = self.tree(&self.head);
        for (path, content) in changes {
            match content {
                Some(content) => tree.insert(path.to_string(), content.to_string()),
                None => tree.remove(*path),
            };
        }
        let id = self.store(vec![self.head.clone()], tree.clone(), message);
        self.head = id.clone();
        self.index = tree;
        id
    }

    /// Record a merge of `other` into head without changing content.
    pub fn merge(&mut self, message: &str, other: &CommitId) -> CommitId {
        let tree = self.tree(&self.head);
        let id = self.store(vec![self.head.clone(), other.clone()], tree, message);
        self.head = id.clone();
        id
    }

    /// Name a commit so it can be passed to [`Backend::resolve`].
    pub fn tag(&mut self, name: &str, id: &CommitId) {
        self.refs.insert(name.to_string(), id.clone());
    }

    /// Content of a commit's tree.
    pub fn tree(&self, id: &CommitId) -> Tree {
        self.commits
            .get(id)
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }

    /// The current index and working tree.
    pub fn files(&self) -> &Tree {
        &self.index
    }

    /// Resolve a conflicted path by writing `content`.
    pub fn resolve_conflict(&mut self, path: &str, content: &str) {
        self.index.insert(path.to_string(), content.to_string());
        self.conflicts.remove(path);
    }

    /// Number of mutating calls made so far.
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    /// Make the next apply of `id` fail with a backend error.
    pub fn fail_apply_of(&mut self, id: Option<CommitId>) {
        self.fail_apply_of = id;
    }

    /// Messages from head back to the root, newest first, excluding the root.
    pub fn history(&self) -> Vec<String> {
        let mut messages = Vec::new();
        let mut cursor = Some(self.head.clone());
        while let Some(id) = cursor {
            let Some(stored) = self.commits.get(&id) else {
                break;
            };
            cursor = stored.record.parent_ids.first().cloned();
            if cursor.is_some() {
                messages.push(stored.record.message());
            }
        }
        messages
    }

    fn signature(&mut self) -> Signature {
        self.clock += 60;
        Signature {
            name: "Dev".to_string(),
            email: "dev@example.com".to_string(),
            time: Timestamp {
                seconds: self.clock,
                offset_minutes: 0,
            },
        }
    }

    fn store(&mut self, parents: Vec<CommitId>, tree: Tree, message: &str) -> CommitId {
        let sig = self.signature();
        self.insert(parents, tree, sig.clone(), sig, message)
    }

    fn insert(
        &mut self,
        parents: Vec<CommitId>,
        tree: Tree,
        author: Signature,
        committer: Signature,
        message: &str,
    ) -> CommitId {
        let tree_id = digest(&format!("{tree:?}"));
        let id = CommitId::new(digest(&format!(
            "{parents:?}{tree_id}{author:?}{committer:?}{message}"
        )));
        let (subject, body) = split_message(message);
        let record = CommitRecord {
            id: id.clone(),
            parent_ids: parents,
            author,
            committer,
            subject,
            body,
            tree_id,
        };
        self.commits.insert(id.clone(), Stored { record, tree });
        id
    }

    fn stored(&self, id: &CommitId) -> Result<&Stored, Error> {
        self.commits
            .get(id)
            .ok_or_else(|| Error::UnknownRevision(id.to_string()))
    }
}

impl Backend for MemoryBackend {
    fn resolve(&self, rev: &str) -> Result<CommitId, Error> {
        if rev == "HEAD" {
            return Ok(self.head.clone());
        }
        if let Some(id) = self.refs.get(rev) {
            return Ok(id.clone());
        }
        let mut found = self.commits.keys().filter(|id| id.as_str().starts_with(rev));
        match (found.next(), found.next()) {
            (Some(id), None) if !rev.is_empty() => Ok(id.clone()),
            _ => Err(Error::UnknownRevision(rev.to_string())),
        }
    }

    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, Error> {
        let mut pending = vec![descendant.clone()];
        while let Some(id) = pending.pop() {
            if &id == ancestor {
                return Ok(true);
            }
            pending.extend(self.stored(&id)?.record.parent_ids.iter().cloned());
        }
        Ok(false)
    }

    fn log(&self, base: &CommitId, tip: &CommitId) -> Result<Vec<CommitRecord>, Error> {
        let mut records = Vec::new();
        let mut cursor = tip.clone();
        while &cursor != base {
            let stored = self.stored(&cursor)?;
            records.push(stored.record.clone());
            match stored.record.parent_ids.first() {
                Some(parent) => cursor = parent.clone(),
                None => break,
            }
        }
        records.reverse();
        Ok(records)
    }

    fn read_commit(&self, id: &CommitId) -> Result<CommitRecord, Error> {
        Ok(self.stored(id)?.record.clone())
    }

    fn head(&self) -> Result<CommitId, Error> {
        Ok(self.head.clone())
    }

    fn reset_hard(&mut self, id: &CommitId) -> Result<(), Error> {
        self.index = self.stored(id)?.tree.clone();
        self.head = id.clone();
        self.conflicts.clear();
        self.applying = None;
        self.mutations += 1;
        Ok(())
    }

    fn apply(&mut self, id: &CommitId) -> Result<ApplyOutcome, Error> {
        if self.fail_apply_of.as_ref() == Some(id) {
            self.fail_apply_of = None;
            return Err(Error::Failed {
                command: format!("apply {id}"),
                stderr: "injected failure".to_string(),
            });
        }
        self.mutations += 1;
        self.applying = Some(id.clone());

        let stored = self.stored(id)?;
        let theirs = stored.tree.clone();
        let base = match stored.record.parent_ids.first() {
            Some(parent) => self.stored(parent)?.tree.clone(),
            None => Tree::new(),
        };

        let paths: BTreeSet<&String> = base.keys().chain(theirs.keys()).collect();
        for path in paths {
            let (before, after) = (base.get(path), theirs.get(path));
            if before == after {
                continue;
            }
            let ours = self.index.get(path);
            if ours == after {
                continue;
            }
            if ours == before {
                match after {
                    Some(content) => self.index.insert(path.clone(), content.clone()),
                    None => self.index.remove(path),
                };
            } else {
                let marker = format!(
                    "<<<<<<< ours\n{}=======\n{}>>>>>>> theirs\n",
                    ours.map(String::as_str).unwrap_or(""),
                    after.map(String::as_str).unwrap_or("")
                );
                self.index.insert(path.clone(), marker);
                self.conflicts.insert(path.clone());
            }
        }

        if self.conflicts.is_empty() {
            Ok(ApplyOutcome::Clean)
        } else {
            Ok(ApplyOutcome::Conflicted(self.conflicted_paths()?))
        }
    }

    fn conflicted_paths(&self) -> Result<Vec<PathBuf>, Error> {
        Ok(self.conflicts.iter().map(PathBuf::from).collect())
    }

    fn apply_in_progress(&self, head: &CommitId) -> Result<bool, Error> {
        Ok(self.applying.is_some() || self.index != self.stored(head)?.tree)
    }

    fn commit(&mut self, commit: &NewCommit) -> Result<CommitId, Error> {
        if !self.conflicts.is_empty() {
            return Err(Error::Failed {
                command: "commit".to_string(),
                stderr: "index has unmerged paths".to_string(),
            });
        }
        self.mutations += 1;
        let id = self.insert(
            commit.parents.clone(),
            self.index.clone(),
            commit.author.clone(),
            commit.committer.clone(),
            &commit.message,
        );
        self.head = id.clone();
        self.applying = None;
        Ok(id)
    }

    fn abort_apply(&mut self) -> Result<(), Error> {
        self.conflicts.clear();
        self.applying = None;
        Ok(())
    }
}

fn digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
