use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use autofixup::{
    CancelFlag, Checkpoint, CheckpointStore, Config, ExecutionResult, ExecutionState, Executor,
    FileStore, Git, Prepared, RevRange,
};
use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::Level;

#[derive(Parser)]
#[command(name = "autofixup")]
#[command(about = "Fold fixup!, squash! and revert pairs into a clean linear history")]
struct Cli {
    /// Run as if started in this directory
    #[arg(short = 'C', global = true, value_name = "PATH")]
    directory: Option<PathBuf>,

    /// Config file (default: .autofixup.toml at the repository root)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show what a rewrite of RANGE would do
    Plan {
        /// Commits to rewrite, e.g. `main..HEAD`
        range: RevRange,
    },

    /// Rewrite RANGE
    Run {
        /// Commits to rewrite, e.g. `main..HEAD`
        range: RevRange,

        /// Only print the plan
        #[arg(long)]
        dry_run: bool,

        /// Branch to point at the result (default: RANGE's upper bound when it
        /// is a branch, else the current branch)
        #[arg(long, conflicts_with = "detach")]
        branch: Option<String>,

        /// Leave HEAD detached at the result
        #[arg(long)]
        detach: bool,
    },

    /// Resume after resolving conflicts or an interruption
    Continue,

    /// Roll back an in-progress rewrite
    Abort,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(unix)]
static CANCEL: std::sync::OnceLock<CancelFlag> = std::sync::OnceLock::new();

#[cfg(unix)]
extern "C" fn cancel_on_signal(_sig: libc::c_int) {
    if let Some(flag) = CANCEL.get() {
        flag.cancel();
    }
}

/// A flag raised by SIGINT or SIGTERM. The rewrite stops at the next
/// operation boundary with its checkpoint saved.
#[cfg(unix)]
fn install_cancel_handler() -> CancelFlag {
    let flag = CANCEL.get_or_init(CancelFlag::new).clone();
    let handler = cancel_on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        let _ = libc::signal(libc::SIGINT, handler);
        let _ = libc::signal(libc::SIGTERM, handler);
    }
    flag
}

#[cfg(not(unix))]
fn install_cancel_handler() -> CancelFlag {
    CancelFlag::new()
}

/// Branches to move or re-attach once the rewrite ends. Stored next to the
/// checkpoint.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Branches {
    /// Pointed at the rewritten tip on completion.
    target: Option<String>,
    /// Checked out before the rewrite; re-attached on abort.
    original: Option<String>,
}

/// Everything the subcommands share.
struct Session {
    git: Git,
    config: Config,
    store: FileStore,
    key: String,
}

impl Session {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let start = cli.directory.clone().unwrap_or_else(|| PathBuf::from("."));
        let config = match &cli.config {
            Some(path) => Config::load(path)?,
            None => Config::locate(&start)?,
        };
        let git = Git::discover(&start, &config.git).context("locating repository")?;
        let git_dir = git.git_dir()?;
        let store = FileStore::new(config.checkpoint_dir(git.root(), &git_dir));
        let key = git.root().display().to_string();
        Ok(Self {
            git,
            config,
            store,
            key,
        })
    }

    fn prepare(&self, old: &str, new: &str) -> anyhow::Result<Prepared> {
        let prepared = autofixup::load_and_classify_with(
            &self.git,
            old,
            new,
            self.config.classify_options(),
        )
        .with_context(|| format!("planning {old}..{new}"))?;
        for warning in &prepared.warnings {
            println!("warning: {warning}");
        }
        Ok(prepared)
    }

    fn execute(
        &mut self,
        prepared: &Prepared,
        cancel: CancelFlag,
    ) -> anyhow::Result<ExecutionResult> {
        let result = Executor::new(&mut self.git, &mut self.store, self.key.as_str())
            .with_squash_separator(self.config.squash_separator.clone())
            .with_cancel(cancel)
            .execute(&prepared.plan)?;
        Ok(result)
    }

    fn checkpoint(&self) -> anyhow::Result<Option<Checkpoint>> {
        Ok(Checkpoint::load(&self.store, &self.key)?)
    }

    fn branches_key(&self) -> String {
        format!("{}.branch", self.key)
    }

    fn branches(&self) -> anyhow::Result<Branches> {
        match self.store.read(&self.branches_key())? {
            Some(bytes) => Ok(toml::from_str(&String::from_utf8_lossy(&bytes))?),
            None => Ok(Branches::default()),
        }
    }

    fn save_branches(&mut self, branches: &Branches) -> anyhow::Result<()> {
        let key = self.branches_key();
        self.store.write(&key, toml::to_string(branches)?.as_bytes())?;
        Ok(())
    }

    fn clear_branches(&mut self) -> anyhow::Result<()> {
        let key = self.branches_key();
        self.store.remove(&key)?;
        Ok(())
    }

    /// The branch a completed rewrite of `range` should move.
    fn target_branch(&self, range: &RevRange) -> anyhow::Result<Option<String>> {
        if self.git.branch_exists(&range.new)? {
            Ok(Some(range.new.clone()))
        } else if range.new == "HEAD" {
            Ok(self.git.current_branch()?)
        } else {
            Ok(None)
        }
    }

    fn report(&mut self, result: &ExecutionResult) -> anyhow::Result<ExitCode> {
        match result.state {
            ExecutionState::Completed => {
                match self.branches()?.target {
                    Some(branch) => {
                        self.git.update_branch(&branch, &result.head)?;
                        println!("{branch} is now at {}", result.head.short());
                    }
                    None => println!("HEAD is now at {}", result.head.short()),
                }
                self.clear_branches()?;
                Ok(ExitCode::SUCCESS)
            }
            ExecutionState::Conflicted => {
                println!(
                    "Conflict applying operation {}. Resolve and stage these paths, then run `autofixup continue`:",
                    result.next_operation + 1
                );
                for path in &result.conflict_paths {
                    println!("  {}", path.display());
                }
                println!("Or run `autofixup abort` to restore the original history.");
                Ok(ExitCode::FAILURE)
            }
            ExecutionState::Interrupted => {
                println!("Interrupted; run `autofixup continue` to resume.");
                Ok(ExitCode::FAILURE)
            }
            ExecutionState::Aborted => {
                match self.branches()?.original {
                    Some(branch) => {
                        self.git.checkout(&branch)?;
                        println!("Restored {branch} at {}", result.head.short());
                    }
                    None => println!("Restored HEAD at {}", result.head.short()),
                }
                self.clear_branches()?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut session = Session::open(&cli)?;

    match cli.command {
        Command::Plan { range } => {
            let prepared = session.prepare(&range.old, &range.new)?;
            print_plan(&prepared);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            range,
            dry_run,
            branch,
            detach,
        } => {
            let prepared = session.prepare(&range.old, &range.new)?;
            if dry_run {
                print_plan(&prepared);
                return Ok(ExitCode::SUCCESS);
            }
            if prepared.plan.is_noop() {
                println!("Nothing to rewrite.");
                return Ok(ExitCode::SUCCESS);
            }
            let target = match (branch, detach) {
                (_, true) => None,
                (Some(branch), false) => Some(branch),
                (None, false) => session.target_branch(&range)?,
            };
            // A run replacing an unfinished one keeps the branch it started on.
            let original = match session.checkpoint()? {
                Some(_) => session.branches()?.original,
                None => session.git.current_branch()?,
            };
            session.save_branches(&Branches { target, original })?;
            let result = session.execute(&prepared, install_cancel_handler())?;
            session.report(&result)
        }
        Command::Continue => {
            let checkpoint = session.checkpoint()?.context("no rewrite in progress")?;
            let prepared = session.prepare(checkpoint.base.as_str(), checkpoint.tip.as_str())?;
            let result = session.execute(&prepared, install_cancel_handler())?;
            session.report(&result)
        }
        Command::Abort => {
            let key = session.key.clone();
            match autofixup::abort(&mut session.git, &mut session.store, &key)? {
                Some(result) => session.report(&result),
                None => {
                    println!("No rewrite in progress.");
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
    }
}

fn print_plan(prepared: &Prepared) {
    for summary in autofixup::dry_run(&prepared.plan) {
        println!("{summary}");
    }
}
