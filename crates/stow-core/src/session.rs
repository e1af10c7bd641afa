// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port trait for the host execution environment that owns live values.

/// Read access to the live variables of a session at checkpoint time.
///
/// Implementations must reflect the exact live value of each name while a
/// checkpoint runs; the checkpoint holds exclusive access for its duration, so
/// no code executes concurrently.
pub trait SessionState {
    /// Host value type.
    type Value;

    /// Live value bound to `name`, if any.
    fn get_variable_value(&self, name: &str) -> Option<&Self::Value>;
}
