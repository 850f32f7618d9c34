//! Config directory discovery

use std::path::{Path, PathBuf};

use crate::constants::CONFIG_SUBDIR;

/// Where the agent may keep its config directory, most preferred first
pub trait PlatformPaths: Send + Sync {
    fn candidate_dirs(&self, configured: Option<&Path>) -> Vec<PathBuf>;
}

/// Desktop/server layout: configured dir, then working dir, home dir and temp dir
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopPaths;

impl PlatformPaths for DesktopPaths {
    fn candidate_dirs(&self, configured: Option<&Path>) -> Vec<PathBuf> {
        if configured.is_none() {
            log::warn!("Config dir not defined, falling back to working/home/temp directories");
        }

        let fallbacks = [
            std::env::current_dir().ok(),
            dirs::home_dir(),
            Some(std::env::temp_dir()),
        ];

        configured
            .map(Path::to_path_buf)
            .into_iter()
            .chain(fallbacks.into_iter().flatten().map(|dir| dir.join(CONFIG_SUBDIR)))
            .collect()
    }
}

/// Single directory handed over by the host platform (sandboxed or embedded hosts)
#[derive(Debug, Clone)]
pub struct FixedPaths {
    dir: PathBuf,
}

impl FixedPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl PlatformPaths for FixedPaths {
    fn candidate_dirs(&self, configured: Option<&Path>) -> Vec<PathBuf> {
        match configured {
            Some(dir) => vec![dir.to_path_buf(), self.dir.join(CONFIG_SUBDIR)],
            None => vec![self.dir.join(CONFIG_SUBDIR)],
        }
    }
}
