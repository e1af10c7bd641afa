// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Checkpoint settings through the config service, backed by the in-memory
//! store fake.
use std::collections::BTreeMap;

use stow_app_core::config::{ConfigError, ConfigService};
use stow_app_core::settings::SETTINGS_KEY;
use stow_app_core::CheckpointSettings;
use stow_dry_tests::InMemoryConfigStore;

#[test]
fn missing_settings_load_as_defaults_without_saving() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    assert_eq!(
        CheckpointSettings::load(&service).unwrap(),
        CheckpointSettings::default()
    );
    assert_eq!(store.load_count(), 1);
    assert_eq!(store.save_count(), 0);
}

#[test]
fn saved_settings_round_trip_as_pretty_json() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    let settings = CheckpointSettings {
        optimizer: "exhaustive".into(),
        bandwidth_bytes_per_sec: 1 << 20,
        type_denylist: vec!["matplotlib".into()],
        diagnostics_dir: Some("/tmp/stow-logs".into()),
        session_label: "eda".into(),
    };
    settings.save(&service).unwrap();

    let raw = String::from_utf8(store.peek(SETTINGS_KEY).unwrap()).unwrap();
    assert!(raw.contains("\n  \"optimizer\": \"exhaustive\""));
    assert_eq!(CheckpointSettings::load(&service).unwrap(), settings);
}

#[test]
fn invalid_settings_are_neither_saved_nor_loaded() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    let zero = CheckpointSettings {
        bandwidth_bytes_per_sec: 0,
        ..CheckpointSettings::default()
    };
    assert!(matches!(zero.save(&service), Err(ConfigError::Invalid(_))));
    assert_eq!(store.save_count(), 0);

    let seeded = InMemoryConfigStore::with_data(BTreeMap::from([(
        SETTINGS_KEY.to_owned(),
        br#"{ "bandwidth_bytes_per_sec": 0 }"#.to_vec(),
    )]));
    let service = ConfigService::new(seeded);
    assert!(matches!(
        CheckpointSettings::load(&service),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn store_failures_propagate() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    store.set_fail_on_load(true);
    assert!(matches!(
        CheckpointSettings::load(&service),
        Err(ConfigError::Other(_))
    ));
    store.set_fail_on_save(true);
    assert!(CheckpointSettings::default().save(&service).is_err());
    assert!(!store.contains_key(SETTINGS_KEY));
}
