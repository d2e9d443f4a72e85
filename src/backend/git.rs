//! Git repository operations via the `git` command line.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use super::{ApplyOutcome, Backend, Error, NewCommit};
use crate::commit::{CommitId, CommitRecord, Signature, Timestamp, split_message};

/// Fields requested from `git log`, NUL separated, one record per RS.
const LOG_FORMAT: &str = "%H%x00%P%x00%T%x00%an%x00%ae%x00%ad%x00%cn%x00%ce%x00%cd%x00%B%x1e";

/// A git repository handle that provides the operations the engine needs.
pub struct Git {
    root: PathBuf,
    program: String,
}

impl Git {
    /// Find the git repository root starting from the given directory.
    pub fn discover(start: &Path, program: &str) -> Result<Self, Error> {
        let output = Command::new(program)
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(start)
            .output()
            .map_err(|e| Error::Exec(format!("{program} rev-parse: {e}")))?;

        if !output.status.success() {
            return Err(Error::NotARepo(start.display().to_string()));
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Self {
            root: PathBuf::from(root),
            program: program.to_string(),
        })
    }

    /// Get the repository root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The absolute path of the `.git` directory.
    pub fn git_dir(&self) -> Result<PathBuf, Error> {
        let dir = self.run_output(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(dir.trim()))
    }

    /// The branch HEAD is attached to, if any.
    pub fn current_branch(&self) -> Result<Option<String>, Error> {
        let output = self.command(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Whether `name` is a local branch.
    pub fn branch_exists(&self, name: &str) -> Result<bool, Error> {
        self.ref_exists(&format!("refs/heads/{name}"))
    }

    /// Attach HEAD to `branch` without moving it.
    pub fn checkout(&self, branch: &str) -> Result<(), Error> {
        self.run(&["checkout", "--quiet", branch])
    }

    /// Point `branch` at `id` and check it out.
    pub fn update_branch(&self, branch: &str, id: &CommitId) -> Result<(), Error> {
        self.run(&["branch", "--force", branch, id.as_str()])?;
        self.run(&["checkout", "--quiet", branch])
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    fn command(&self, args: &[&str]) -> Result<Output, Error> {
        tracing::trace!(args = ?args, "git");
        Command::new(&self.program)
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| Error::Exec(format!("git {}: {e}", args.first().unwrap_or(&""))))
    }

    /// Run a git command that produces no output we care about.
    fn run(&self, args: &[&str]) -> Result<(), Error> {
        self.run_output(args).map(|_| ())
    }

    /// Run a git command and capture its stdout.
    fn run_output(&self, args: &[&str]) -> Result<String, Error> {
        let output = self.command(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(failed(args, &output))
        }
    }

    /// Run a git command with `input` on stdin and extra environment.
    fn run_with_input(
        &self,
        args: &[&str],
        env: &[(&str, String)],
        input: &str,
    ) -> Result<String, Error> {
        tracing::trace!(args = ?args, "git");
        let mut child = Command::new(&self.program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Exec(format!("git {}: {e}", args.first().unwrap_or(&""))))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .map_err(|e| Error::Exec(format!("git {}: {e}", args.join(" "))))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| Error::Exec(format!("git {}: {e}", args.join(" "))))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(failed(args, &output))
        }
    }

    fn ref_exists(&self, refname: &str) -> Result<bool, Error> {
        Ok(self
            .command(&["rev-parse", "--quiet", "--verify", refname])?
            .status
            .success())
    }

    fn clear_pick_state(&self) -> Result<(), Error> {
        if self.ref_exists("CHERRY_PICK_HEAD")? {
            self.run(&["update-ref", "-d", "CHERRY_PICK_HEAD"])?;
        }
        Ok(())
    }

    fn read_log(&self, args: &[&str]) -> Result<Vec<CommitRecord>, Error> {
        let format = format!("--format={LOG_FORMAT}");
        let mut full = vec!["log", "--date=raw", format.as_str()];
        full.extend_from_slice(args);
        let output = self.run_output(&full)?;
        output
            .split('\x1e')
            .map(|chunk| chunk.trim_start_matches('\n'))
            .filter(|chunk| !chunk.is_empty())
            .map(parse_log_record)
            .collect()
    }
}

impl Backend for Git {
    fn resolve(&self, rev: &str) -> Result<CommitId, Error> {
        let spec = format!("{rev}^{{commit}}");
        let output = self.command(&["rev-parse", "--quiet", "--verify", &spec])?;
        if !output.status.success() {
            return Err(Error::UnknownRevision(rev.to_string()));
        }
        Ok(CommitId::new(String::from_utf8_lossy(&output.stdout).trim()))
    }

    fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool, Error> {
        let args = [
            "merge-base",
            "--is-ancestor",
            ancestor.as_str(),
            descendant.as_str(),
        ];
        let output = self.command(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failed(&args, &output)),
        }
    }

    fn log(&self, base: &CommitId, tip: &CommitId) -> Result<Vec<CommitRecord>, Error> {
        let range = format!("{base}..{tip}");
        self.read_log(&["--reverse", range.as_str()])
    }

    fn read_commit(&self, id: &CommitId) -> Result<CommitRecord, Error> {
        self.read_log(&["-1", id.as_str()])?
            .pop()
            .ok_or_else(|| Error::UnknownRevision(id.to_string()))
    }

    fn head(&self) -> Result<CommitId, Error> {
        self.resolve("HEAD")
    }

    fn reset_hard(&mut self, id: &CommitId) -> Result<(), Error> {
        tracing::debug!(commit = %id.short(), "reset");
        self.clear_pick_state()?;
        self.run(&["checkout", "--quiet", "--force", "--detach", id.as_str()])?;
        self.run(&["reset", "--quiet", "--hard"])
    }

    fn apply(&mut self, id: &CommitId) -> Result<ApplyOutcome, Error> {
        tracing::debug!(commit = %id.short(), "cherry-pick");
        let args = ["cherry-pick", "--no-commit", id.as_str()];
        let output = self.command(&args)?;
        if output.status.success() {
            return Ok(ApplyOutcome::Clean);
        }
        let paths = self.conflicted_paths()?;
        if paths.is_empty() {
            Err(failed(&args, &output))
        } else {
            Ok(ApplyOutcome::Conflicted(paths))
        }
    }

    fn conflicted_paths(&self) -> Result<Vec<PathBuf>, Error> {
        let output = self.run_output(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(output.lines().map(PathBuf::from).collect())
    }

    fn apply_in_progress(&self, head: &CommitId) -> Result<bool, Error> {
        if self.ref_exists("CHERRY_PICK_HEAD")? {
            return Ok(true);
        }
        let args = ["diff", "--cached", "--quiet", head.as_str(), "--"];
        let output = self.command(&args)?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(failed(&args, &output)),
        }
    }

    fn commit(&mut self, commit: &NewCommit) -> Result<CommitId, Error> {
        let tree = self.run_output(&["write-tree"])?;
        let tree = tree.trim();

        let mut args = vec!["commit-tree", tree];
        for parent in &commit.parents {
            args.push("-p");
            args.push(parent.as_str());
        }
        args.extend(["-F", "-"]);

        let env = signature_env(&commit.author, &commit.committer);
        let id = self.run_with_input(&args, &env, &commit.message)?;
        let id = CommitId::new(id.trim());

        self.run(&["update-ref", "--no-deref", "HEAD", id.as_str()])?;
        self.clear_pick_state()?;
        tracing::debug!(commit = %id.short(), "created commit");
        Ok(id)
    }

    fn abort_apply(&mut self) -> Result<(), Error> {
        self.clear_pick_state()
    }
}

fn signature_env(author: &Signature, committer: &Signature) -> Vec<(&'static str, String)> {
    vec![
        ("GIT_AUTHOR_NAME", author.name.clone()),
        ("GIT_AUTHOR_EMAIL", author.email.clone()),
        ("GIT_AUTHOR_DATE", author.time.to_raw()),
        ("GIT_COMMITTER_NAME", committer.name.clone()),
        ("GIT_COMMITTER_EMAIL", committer.email.clone()),
        ("GIT_COMMITTER_DATE", committer.time.to_raw()),
    ]
}

fn failed(args: &[&str], output: &Output) -> Error {
    Error::Failed {
        command: format!("git {}", args.join(" ")),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn parse_log_record(chunk: &str) -> Result<CommitRecord, Error> {
    let bad = |detail: &str| Error::Parse {
        command: "git log".to_string(),
        detail: detail.to_string(),
    };
    let fields: Vec<&str> = chunk.splitn(10, '\0').collect();
    let &[id, parents, tree, an, ae, ad, cn, ce, cd, message] = fields.as_slice() else {
        return Err(bad(&format!("expected 10 fields, got {}", fields.len())));
    };
    let time = |raw: &str| Timestamp::parse_raw(raw).ok_or_else(|| bad(&format!("bad date '{raw}'")));
    let (subject, body) = split_message(message);

    Ok(CommitRecord {
        id: CommitId::new(id),
        parent_ids: parents.split_whitespace().map(CommitId::new).collect(),
        author: Signature {
            name: an.to_string(),
            email: ae.to_string(),
            time: time(ad)?,
        },
        committer: Signature {
            name: cn.to_string(),
            email: ce.to_string(),
            time: time(cd)?,
        },
        subject,
        body,
        tree_id: tree.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_records() {
        let chunk = "aaaa\0bbbb cccc\0tttt\0Ann\0ann@example.com\01700000000 +0100\0\
                     Cat\0cat@example.com\01700000060 +0000\0Add parser\n\nWith body.\n";
        let record = parse_log_record(chunk).unwrap();
        assert_eq!(record.id.as_str(), "aaaa");
        assert_eq!(record.parent_ids.len(), 2);
        assert_eq!(record.author.time.offset_minutes, 60);
        assert_eq!(record.committer.name, "Cat");
        assert_eq!(record.subject, "Add parser");
        assert_eq!(record.body, "With body.");
        assert_eq!(record.tree_id, "tttt");
    }

    #[test]
    fn rejects_truncated_records() {
        assert!(matches!(
            parse_log_record("aaaa\0bbbb"),
            Err(Error::Parse { .. })
        ));
    }
}
