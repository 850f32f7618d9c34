//! Persistent Store
//!
//! Small JSON documents in the agent's config directory. Writes go to a
//! temporary file that is renamed over the target, so a crash mid-write
//! leaves the previous document intact.

pub mod paths;

pub use paths::{DesktopPaths, FixedPaths, PlatformPaths};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AgentError, AgentResult};

const PROBE_FILE: &str = ".write-probe";

/// Config directory backed document store
#[derive(Debug, Clone)]
pub struct PersistentStore {
    dir: PathBuf,
}

impl PersistentStore {
    /// Open the first candidate directory that exists (or can be created) and is writable
    pub fn open_first(candidates: &[PathBuf]) -> AgentResult<Self> {
        for dir in candidates {
            match Self::open(dir) {
                Ok(store) => {
                    log::info!("Using config directory: {:?}", store.dir);
                    return Ok(store);
                }
                Err(e) => {
                    log::warn!("Config directory {:?} is not usable: {}", dir, e);
                }
            }
        }

        Err(AgentError::StorageUnavailable(format!(
            "none of {} candidate directories is writable",
            candidates.len()
        )))
    }

    /// Open a specific directory, creating it if absent
    pub fn open(dir: &Path) -> AgentResult<Self> {
        fs::create_dir_all(dir)?;

        // Probe writability
        let probe = dir.join(PROBE_FILE);
        fs::write(&probe, b"ok")?;
        fs::remove_file(&probe)?;

        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    /// Load a document; absent or unparsable files yield `None`
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.path_of(name);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Could not read {:?}: {}", path, e);
                return None;
            }
        };

        match serde_json::from_slice(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring corrupt file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Save a document (write to temp file, then rename)
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> AgentResult<()> {
        let path = self.path_of(name);
        let tmp = self.path_of(&format!("{}.tmp", name));

        let content = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        log::debug!("Saved {:?}", path);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> AgentResult<()> {
        let path = self.path_of(name);
        if path.exists() {
            fs::remove_file(&path)?;
            log::info!("Removed {:?}", path);
        }
        Ok(())
    }
}
