// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config service and storage port for Stow tools.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Where settings bytes live. Keys are logical names, see [`validate_key`].
pub trait ConfigStore {
    /// Bytes stored under `key`; [`ConfigError::NotFound`] if absent.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replaces the bytes stored under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Failure loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key.
    #[error("not found")]
    NotFound,
    /// Key is empty or contains characters stores cannot map to a name.
    #[error("invalid config key {0:?}")]
    InvalidKey(String),
    /// A stored value parsed but is not acceptable.
    #[error("invalid config value: {0}")]
    Invalid(String),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes are not valid JSON for the requested type.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Store-specific failure.
    #[error("other: {0}")]
    Other(String),
}

/// Keys are restricted to `[A-Za-z0-9_-]+` so every store can use them as
/// file names.
pub fn validate_key(key: &str) -> Result<(), ConfigError> {
    let ok = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidKey(key.to_owned()))
    }
}

/// Thin service that serializes config values as JSON and delegates storage
/// to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Unwraps the backing store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)` if
    /// missing or empty.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        validate_key(key)?;
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Like [`load`](Self::load), falling back to `T::default()` when missing.
    pub fn load_or_default<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        Ok(self.load(key)?.unwrap_or_default())
    }

    /// Writes `value` under `key` as pretty JSON.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        validate_key(key)?;
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_must_be_file_safe() {
        assert!(validate_key("checkpoint").is_ok());
        assert!(validate_key("notebook-1_a").is_ok());
        for bad in ["", "../etc", "a/b", "a.json", "sp ace"] {
            assert!(matches!(validate_key(bad), Err(ConfigError::InvalidKey(_))), "{bad}");
        }
    }
}
