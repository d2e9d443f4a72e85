//! End-to-end runs against real git repositories in temporary directories.

use std::fs;
use std::path::Path;
use std::process::Command;

use autofixup::{Backend, ExecutionState, FileStore, Git};
use tempfile::TempDir;

struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    fn new() -> Self {
        let repo = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        repo.git(&["init", "-q"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo.commit("Initial commit", &[("README", "hello\n")]);
        repo.git(&["tag", "base"]);
        repo
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn commit(&self, message: &str, files: &[(&str, &str)]) {
        for (name, content) in files {
            fs::write(self.path().join(name), content).unwrap();
        }
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "--allow-empty", "-m", message]);
    }

    fn subjects(&self) -> Vec<String> {
        self.git(&["log", "--format=%s", "base..HEAD"])
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn show(&self, rev: &str, path: &str) -> String {
        self.git(&["show", &format!("{rev}:{path}")])
    }

    fn open(&self) -> (Git, FileStore) {
        let git = Git::discover(self.path(), "git").unwrap();
        let store = FileStore::new(git.git_dir().unwrap().join("autofixup"));
        (git, store)
    }
}

#[test]
fn fixup_and_revert_are_folded() {
    let repo = TestRepo::new();
    repo.commit("Add parser", &[("parser.txt", "v1\n")]);
    repo.commit("Add lexer", &[("lexer.txt", "v1\n")]);
    repo.commit("Add debug hook", &[("debug.txt", "on\n")]);
    repo.commit("fixup! Add parser", &[("parser.txt", "v2\n")]);
    repo.git(&["rm", "-q", "debug.txt"]);
    repo.git(&["commit", "-q", "-m", "Revert \"Add debug hook\""]);
    let original_tree = repo.git(&["rev-parse", "HEAD^{tree}"]);

    let (mut git, mut store) = repo.open();
    let prepared = autofixup::load_and_classify(&git, "base", "HEAD").unwrap();
    assert!(prepared.warnings.is_empty());

    let result = autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();
    assert_eq!(result.state, ExecutionState::Completed);
    assert_eq!(git.head().unwrap(), result.head);

    assert_eq!(repo.subjects(), vec!["Add lexer", "Add parser"]);
    assert_eq!(repo.show("HEAD~1", "parser.txt"), "v2\n");
    assert_eq!(repo.git(&["rev-parse", "HEAD^{tree}"]), original_tree);
}

#[test]
fn rewritten_commits_keep_their_authorship() {
    let repo = TestRepo::new();
    repo.git(&[
        "commit",
        "-q",
        "--allow-empty",
        "--author",
        "Someone Else <else@example.com>",
        "-m",
        "Theirs",
    ]);
    repo.commit("Mine", &[("mine.txt", "1\n")]);
    repo.commit("fixup! Theirs", &[("theirs.txt", "1\n")]);

    let (mut git, mut store) = repo.open();
    let prepared = autofixup::load_and_classify(&git, "base", "HEAD").unwrap();
    autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();

    assert_eq!(
        repo.git(&["log", "-1", "--format=%an <%ae>", "HEAD~1"]).trim(),
        "Someone Else <else@example.com>"
    );
    assert_eq!(repo.show("HEAD~1", "theirs.txt"), "1\n");
}

#[test]
fn conflict_then_continue() {
    let repo = TestRepo::new();
    repo.commit("A", &[("f.txt", "1\n")]);
    repo.commit("B", &[("f.txt", "2\n")]);
    repo.commit("fixup! A", &[("f.txt", "3\n")]);

    let (mut git, mut store) = repo.open();
    let prepared = autofixup::load_and_classify(&git, "base", "HEAD").unwrap();

    let result = autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();
    assert_eq!(result.state, ExecutionState::Conflicted);
    assert_eq!(result.conflict_paths, vec![Path::new("f.txt").to_path_buf()]);

    fs::write(repo.path().join("f.txt"), "1 fixed\n").unwrap();
    repo.git(&["add", "f.txt"]);
    let result = autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();
    assert_eq!(result.state, ExecutionState::Conflicted);
    assert_eq!(result.next_operation, 2);

    fs::write(repo.path().join("f.txt"), "2 fixed\n").unwrap();
    repo.git(&["add", "f.txt"]);
    let result = autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();
    assert_eq!(result.state, ExecutionState::Completed);

    assert_eq!(repo.subjects(), vec!["B", "A"]);
    assert_eq!(repo.show("HEAD~1", "f.txt"), "1 fixed\n");
    assert_eq!(repo.show("HEAD", "f.txt"), "2 fixed\n");
}

#[test]
fn abort_after_conflict_restores_everything() {
    let repo = TestRepo::new();
    repo.commit("A", &[("f.txt", "1\n")]);
    repo.commit("B", &[("f.txt", "2\n")]);
    repo.commit("fixup! A", &[("f.txt", "3\n")]);
    let tip = repo.git(&["rev-parse", "HEAD"]).trim().to_string();

    let (mut git, mut store) = repo.open();
    let prepared = autofixup::load_and_classify(&git, "base", "HEAD").unwrap();
    let result = autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();
    assert_eq!(result.state, ExecutionState::Conflicted);

    let aborted = autofixup::abort(&mut git, &mut store, "repo").unwrap().unwrap();
    assert_eq!(aborted.state, ExecutionState::Aborted);
    assert_eq!(aborted.head.as_str(), tip);
    assert_eq!(repo.git(&["rev-parse", "HEAD"]).trim(), tip);
    assert!(repo.git(&["status", "--porcelain"]).trim().is_empty());
    assert!(!repo.path().join(".git/CHERRY_PICK_HEAD").exists());
}

#[test]
fn rerunning_a_finished_plan_changes_nothing() {
    let repo = TestRepo::new();
    repo.commit("A", &[("a.txt", "1\n")]);
    repo.commit("squash! A\n\nMore about A.", &[("a.txt", "2\n")]);

    let (mut git, mut store) = repo.open();
    let prepared = autofixup::load_and_classify(&git, "base", "HEAD").unwrap();
    let first = autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();
    let second = autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();
    assert_eq!(first.head, second.head);

    let message = repo.git(&["log", "-1", "--format=%B"]);
    assert!(message.starts_with("A\n\nMore about A."));
    assert_eq!(repo.subjects(), vec!["A"]);
}

#[test]
fn discarding_a_conflicted_apply_replays_it() {
    let repo = TestRepo::new();
    repo.commit("A", &[("f.txt", "1\n")]);
    repo.commit("B", &[("f.txt", "2\n")]);
    repo.commit("fixup! A", &[("f.txt", "3\n")]);

    let (mut git, mut store) = repo.open();
    let prepared = autofixup::load_and_classify(&git, "base", "HEAD").unwrap();
    let stopped = autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();
    assert_eq!(stopped.state, ExecutionState::Conflicted);

    repo.git(&["reset", "-q", "--hard"]);
    let result = autofixup::execute(&mut git, &prepared.plan, &mut store, "repo").unwrap();
    assert_eq!(result.state, ExecutionState::Conflicted);
    assert_eq!(result.next_operation, stopped.next_operation);
    assert_eq!(result.head, stopped.head);
    assert_eq!(result.conflict_paths, vec![Path::new("f.txt").to_path_buf()]);
}
