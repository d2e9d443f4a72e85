//! Configuration file support.
//!
//! Settings live in `.autofixup.toml` at the repository root. Every field is
//! optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classify::ClassifyOptions;
use crate::error::Error;

/// File name looked up at the repository root.
pub const CONFIG_FILE: &str = ".autofixup.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Program used to run git.
    pub git: String,

    /// Where checkpoints are kept. Defaults to `<git-dir>/autofixup`.
    pub checkpoint_dir: Option<PathBuf>,

    /// Treat `amend! ` subjects as message-replacing fixups.
    pub amend_markers: bool,

    /// Inserted between a message and an appended squash body.
    pub squash_separator: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            checkpoint_dir: None,
            amend_markers: true,
            squash_separator: "\n\n".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load an explicit config file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `.autofixup.toml` from `root`, or defaults if there is none.
    pub fn discover(root: &Path) -> Result<Self, Error> {
        let path = root.join(CONFIG_FILE);
        if path.is_file() {
            tracing::debug!(path = %path.display(), "loading config");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the config of the worktree containing `start` without running
    /// git: the nearest ancestor holding a `.git` entry is taken as the root.
    pub fn locate(start: &Path) -> Result<Self, Error> {
        let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
        match start.ancestors().find(|dir| dir.join(".git").exists()) {
            Some(root) => Self::discover(root),
            None => Ok(Self::default()),
        }
    }

    pub fn classify_options(&self) -> ClassifyOptions {
        ClassifyOptions {
            amend_markers: self.amend_markers,
        }
    }

    /// Checkpoint directory, resolved against `git_dir` by default and
    /// against `root` when relative.
    pub fn checkpoint_dir(&self, root: &Path, git_dir: &Path) -> PathBuf {
        match &self.checkpoint_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => git_dir.join("autofixup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = Config::from_toml(
            r#"
            git = "/usr/local/bin/git"
            amend_markers = false
            checkpoint_dir = "tmp/state"
            "#,
        )
        .unwrap();
        assert_eq!(config.git, "/usr/local/bin/git");
        assert!(!config.classify_options().amend_markers);
        assert_eq!(config.squash_separator, "\n\n");
        assert_eq!(
            config.checkpoint_dir(Path::new("/repo"), Path::new("/repo/.git")),
            PathBuf::from("/repo/tmp/state")
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("gti = \"git\"").is_err());
    }

    #[test]
    fn discover_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::discover(dir.path()).unwrap(), Config::default());

        std::fs::write(dir.path().join(CONFIG_FILE), "squash_separator = \"\\n---\\n\"").unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.squash_separator, "\n---\n");
        assert_eq!(
            config.checkpoint_dir(dir.path(), Path::new("/g")),
            PathBuf::from("/g/autofixup")
        );
    }

    #[test]
    fn locate_reads_config_from_the_worktree_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "git = \"/opt/git/bin/git\"").unwrap();

        assert_eq!(Config::locate(&nested).unwrap().git, "/opt/git/bin/git");
        assert_eq!(Config::locate(dir.path()).unwrap().git, "/opt/git/bin/git");
    }
}
