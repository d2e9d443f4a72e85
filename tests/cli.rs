//! Runs the `autofixup` binary against a repository with a feature branch.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn autofixup(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autofixup"))
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .unwrap()
}

fn commit(dir: &Path, message: &str, content: &str) {
    fs::write(dir.join("f"), content).unwrap();
    git(dir, &["add", "f"]);
    git(dir, &["commit", "-q", "-m", message]);
}

/// `main` with one commit, checked out; `feature` on top of it with A, B and a
/// fixup of A that conflicts when moved next to A.
fn feature_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();
    git(path, &["init", "-q"]);
    git(path, &["config", "user.name", "Test User"]);
    git(path, &["config", "user.email", "test@example.com"]);
    git(path, &["config", "commit.gpgsign", "false"]);
    commit(path, "Initial commit", "0\n");
    git(path, &["branch", "-M", "main"]);
    git(path, &["checkout", "-q", "-b", "feature"]);
    commit(path, "A", "1\n");
    commit(path, "B", "2\n");
    commit(path, "fixup! A", "3\n");
    git(path, &["checkout", "-q", "main"]);
    dir
}

fn resolve(dir: &Path, content: &str) {
    fs::write(dir.join("f"), content).unwrap();
    git(dir, &["add", "f"]);
}

#[test]
fn continue_rewrites_the_named_branch() {
    let dir = feature_repo();
    let path = dir.path();
    let main = git(path, &["rev-parse", "main"]);

    let out = autofixup(path, &["run", "main..feature"]);
    assert_eq!(out.status.code(), Some(1), "{}", String::from_utf8_lossy(&out.stderr));

    resolve(path, "3\n");
    let out = autofixup(path, &["continue"]);
    assert_eq!(out.status.code(), Some(1), "{}", String::from_utf8_lossy(&out.stderr));

    resolve(path, "3 then 2\n");
    let out = autofixup(path, &["continue"]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));

    assert_eq!(git(path, &["rev-parse", "main"]), main);
    assert_eq!(git(path, &["log", "--format=%s", "main..feature"]), "B\nA");
    assert_eq!(git(path, &["symbolic-ref", "--short", "HEAD"]), "feature");
    assert_eq!(git(path, &["show", "feature~1:f"]), "3");
    assert_eq!(git(path, &["show", "feature:f"]), "3 then 2");
}

#[test]
fn abort_returns_to_the_original_branch() {
    let dir = feature_repo();
    let path = dir.path();
    let main = git(path, &["rev-parse", "main"]);
    let feature = git(path, &["rev-parse", "feature"]);

    let out = autofixup(path, &["run", "main..feature"]);
    assert_eq!(out.status.code(), Some(1));

    let out = autofixup(path, &["abort"]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(git(path, &["symbolic-ref", "--short", "HEAD"]), "main");
    assert_eq!(git(path, &["rev-parse", "main"]), main);
    assert_eq!(git(path, &["rev-parse", "feature"]), feature);
    assert!(git(path, &["status", "--porcelain"]).is_empty());
}

#[test]
fn plan_lists_operations_without_touching_the_repository() {
    let dir = feature_repo();
    let path = dir.path();
    let head = git(path, &["rev-parse", "HEAD"]);

    let out = autofixup(path, &["plan", "main..feature"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    let actions: Vec<_> = stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    assert_eq!(actions, vec!["pick", "fixup", "pick"]);
    assert_eq!(git(path, &["rev-parse", "HEAD"]), head);
}
