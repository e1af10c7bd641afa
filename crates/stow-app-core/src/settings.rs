// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted checkpoint settings.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigService, ConfigStore};

/// Config key the settings live under.
pub const SETTINGS_KEY: &str = "checkpoint";

/// 100 MiB/s.
pub const DEFAULT_BANDWIDTH_BYTES_PER_SEC: u64 = 100 * 1024 * 1024;

/// User-tunable checkpoint behaviour.
///
/// Missing fields take their defaults, so partial files are valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    /// Registered optimizer strategy name.
    pub optimizer: String,
    /// Migration bandwidth used by the cost model.
    pub bandwidth_bytes_per_sec: u64,
    /// Type-tag substrings whose values are never migrated.
    pub type_denylist: Vec<String>,
    /// Directory for the plain-text stage log; `None` disables it.
    pub diagnostics_dir: Option<PathBuf>,
    /// Label used in diagnostics file names.
    pub session_label: String,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            optimizer: "mincut".to_owned(),
            bandwidth_bytes_per_sec: DEFAULT_BANDWIDTH_BYTES_PER_SEC,
            type_denylist: vec!["dataprep.eda".to_owned(), "bokeh".to_owned()],
            diagnostics_dir: None,
            session_label: "session".to_owned(),
        }
    }
}

impl CheckpointSettings {
    /// Rejects values no checkpoint can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.optimizer.trim().is_empty() {
            return Err(ConfigError::Invalid("optimizer must not be empty".into()));
        }
        if self.bandwidth_bytes_per_sec == 0 {
            return Err(ConfigError::Invalid(
                "bandwidth_bytes_per_sec must be positive".into(),
            ));
        }
        let label_ok = !self.session_label.is_empty()
            && !self
                .session_label
                .contains(|c: char| c == '/' || c == '\\' || c.is_control());
        if !label_ok {
            return Err(ConfigError::Invalid(format!(
                "session_label {:?} cannot be used in a file name",
                self.session_label
            )));
        }
        Ok(())
    }

    /// Loads settings from `service`, defaulting when absent, and validates
    /// them.
    pub fn load<S: ConfigStore>(service: &ConfigService<S>) -> Result<Self, ConfigError> {
        let settings: Self = service.load_or_default(SETTINGS_KEY)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates and persists settings through `service`.
    pub fn save<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        self.validate()?;
        service.save(SETTINGS_KEY, self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let parsed: CheckpointSettings =
            serde_json::from_str(r#"{ "optimizer": "greedy" }"#).unwrap();
        assert_eq!(parsed.optimizer, "greedy");
        assert_eq!(parsed.bandwidth_bytes_per_sec, DEFAULT_BANDWIDTH_BYTES_PER_SEC);
        assert_eq!(parsed.type_denylist, vec!["dataprep.eda", "bokeh"]);
        assert_eq!(parsed.session_label, "session");
    }

    #[test]
    fn validation_rejects_unusable_values() {
        assert!(CheckpointSettings::default().validate().is_ok());
        let zero = CheckpointSettings {
            bandwidth_bytes_per_sec: 0,
            ..CheckpointSettings::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));
        let label = CheckpointSettings {
            session_label: "a/b".into(),
            ..CheckpointSettings::default()
        };
        assert!(label.validate().is_err());
        let blank = CheckpointSettings {
            optimizer: "  ".into(),
            ..CheckpointSettings::default()
        };
        assert!(blank.validate().is_err());
    }
}
