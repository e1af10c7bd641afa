// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config store double backed by a map instead of the filesystem.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use stow_app_core::config::{validate_key, ConfigError, ConfigStore};

/// [`ConfigStore`] kept in a shared map, with attempt counters and failure
/// switches.
///
/// Clones share state, so a test can hand one clone to a
/// [`ConfigService`](stow_app_core::config::ConfigService) and inspect the
/// other. Keys are validated exactly as the filesystem store validates them.
///
/// # Example
///
/// ```
/// use stow_dry_tests::InMemoryConfigStore;
/// use stow_app_core::config::ConfigService;
/// use stow_app_core::CheckpointSettings;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
///
/// CheckpointSettings::default().save(&service).unwrap();
/// assert_eq!(store.save_count(), 1);
/// assert!(store.contains_key("checkpoint"));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    data: BTreeMap<String, Vec<u8>>,
    loads: usize,
    saves: usize,
    fail_load: bool,
    fail_save: bool,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `key -> raw bytes`; seeding counts as no save.
    pub fn with_data(data: BTreeMap<String, Vec<u8>>) -> Self {
        let store = Self::new();
        store.with_state(|s| s.data = data);
        store
    }

    // A test that panicked while holding the lock must not wedge the others.
    fn with_state<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    /// Makes every later `load_raw` fail with [`ConfigError::Other`].
    pub fn set_fail_on_load(&self, fail: bool) {
        self.with_state(|s| s.fail_load = fail);
    }

    /// Makes every later `save_raw` fail with [`ConfigError::Other`].
    pub fn set_fail_on_save(&self, fail: bool) {
        self.with_state(|s| s.fail_save = fail);
    }

    /// `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.with_state(|s| s.loads)
    }

    /// `save_raw` attempts, failed ones included.
    pub fn save_count(&self) -> usize {
        self.with_state(|s| s.saves)
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.with_state(|s| s.data.keys().cloned().collect())
    }

    /// Whether anything is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.with_state(|s| s.data.contains_key(key))
    }

    /// Raw bytes under `key`, without counting a load.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.with_state(|s| s.data.get(key).cloned())
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        self.with_state(|s| {
            s.loads += 1;
            validate_key(key)?;
            if s.fail_load {
                return Err(ConfigError::Other("injected load failure".into()));
            }
            s.data.get(key).cloned().ok_or(ConfigError::NotFound)
        })
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        self.with_state(|s| {
            s.saves += 1;
            validate_key(key)?;
            if s.fail_save {
                return Err(ConfigError::Other("injected save failure".into()));
            }
            s.data.insert(key.to_owned(), data.to_vec());
            Ok(())
        })
    }
}
