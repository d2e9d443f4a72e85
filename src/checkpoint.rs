//! Durable rewrite progress.
//!
//! A [`Checkpoint`] is written before the first operation and after every
//! operation that completes, so an interrupted rewrite resumes at the first
//! operation that has not been recorded. Stores only need atomic whole-value
//! writes and deletes.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::commit::CommitId;
use crate::error::Error;

/// A small key-value byte store with atomic writes.
pub trait CheckpointStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace the value for `key`. Readers observe either the old or the new
    /// value, never a partial write.
    fn write(&mut self, key: &str, value: &[u8]) -> io::Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> io::Result<()>;
}

/// Progress of an in-flight rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Hash of the plan being executed.
    pub plan_hash: String,
    /// Index of the first operation not yet applied.
    pub next_operation: usize,
    /// Head after the last applied operation.
    pub current_head: CommitId,
    /// Head before the rewrite started; abort restores it.
    pub original_head: CommitId,
    /// Old boundary of the rewritten range.
    pub base: CommitId,
    /// New boundary of the rewritten range.
    pub tip: CommitId,
    /// The operation at `next_operation` stopped on a conflict and the
    /// working tree holds its partial result.
    #[serde(default)]
    pub conflicted: bool,
}

impl Checkpoint {
    pub fn load(store: &dyn CheckpointStore, key: &str) -> Result<Option<Self>, Error> {
        read_toml(store, key)
    }

    pub fn save(&self, store: &mut dyn CheckpointStore, key: &str) -> Result<(), Error> {
        write_toml(store, key, self)
    }

    pub fn clear(store: &mut dyn CheckpointStore, key: &str) -> Result<(), Error> {
        store.remove(key).map_err(|source| Error::CheckpointIo {
            key: key.to_string(),
            source,
        })
    }
}

/// Record of the last plan that ran to completion, so running it again is a
/// no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub plan_hash: String,
    pub head: CommitId,
}

impl Receipt {
    pub fn load(store: &dyn CheckpointStore, key: &str) -> Result<Option<Self>, Error> {
        read_toml(store, &receipt_key(key))
    }

    pub fn save(&self, store: &mut dyn CheckpointStore, key: &str) -> Result<(), Error> {
        write_toml(store, &receipt_key(key), self)
    }
}

fn receipt_key(key: &str) -> String {
    format!("{key}.done")
}

fn read_toml<T: for<'de> Deserialize<'de>>(
    store: &dyn CheckpointStore,
    key: &str,
) -> Result<Option<T>, Error> {
    let Some(bytes) = store.read(key).map_err(|source| Error::CheckpointIo {
        key: key.to_string(),
        source,
    })?
    else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&bytes);
    toml::from_str(&text)
        .map(Some)
        .map_err(|source| Error::CheckpointDecode {
            key: key.to_string(),
            source,
        })
}

fn write_toml<T: Serialize>(
    store: &mut dyn CheckpointStore,
    key: &str,
    value: &T,
) -> Result<(), Error> {
    let content = toml::to_string_pretty(value)?;
    store
        .write(key, content.as_bytes())
        .map_err(|source| Error::CheckpointIo {
            key: key.to_string(),
            source,
        })
}

/// A directory of files, one per key, written with write-temp-then-rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys are repository paths, so they are hashed into file names.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.dir.join(format!("{}.toml", &digest[..16]))
    }
}

impl CheckpointStore for FileStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, key: &str, value: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(key);
        let tmp = target.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Volatile store, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl CheckpointStore for MemoryStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &[u8]) -> io::Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
