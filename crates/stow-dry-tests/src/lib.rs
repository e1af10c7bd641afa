// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Stow crates.
#![forbid(unsafe_code)]
//!
//! This crate provides a scripted host session so the checkpoint engine can
//! be exercised end to end without a real interpreter.
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`value`] - Host values with real storage sharing and opaque handles
//! - [`codec`] - Group codec that preserves sharing across a round trip
//! - [`script`] - Tiny cell language and its interpreter
//! - [`builder`] - Runs cells and records them in a snapshot graph

pub mod builder;
pub mod codec;
pub mod config;
pub mod script;
pub mod value;

// Re-export commonly used items at crate root for convenience
pub use builder::{LenProfiler, SessionBuilder, BUFFER_TAG, HANDLE_TAG};
pub use codec::SharedValueCodec;
pub use config::InMemoryConfigStore;
pub use script::{Effects, ScriptError, ScriptedEnv};
pub use value::SharedValue;
