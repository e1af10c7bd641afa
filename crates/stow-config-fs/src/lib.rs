// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem-backed `ConfigStore` for Stow tools (uses platform config dir).

use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use stow_app_core::config::{validate_key, ConfigError, ConfigStore};

/// Store configs as `<key>.json` files under one directory.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Create a store rooted at the user config directory (e.g., `~/.config/Stow`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj = ProjectDirs::from("dev", "flyingrobots", "Stow")
            .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))?;
        Self::with_root(proj.config_dir())
    }

    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base = root.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Directory holding the config files.
    pub fn root(&self) -> &Path {
        &self.base
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, ConfigError> {
        validate_key(key)?;
        Ok(self.base.join(format!("{key}.json")))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let path = self.path_for(key)?;
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.base)?;
        fs::write(path, data)?;
        Ok(())
    }
}
