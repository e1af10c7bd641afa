// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host value double with real storage sharing.

use std::sync::{Arc, Mutex};

/// A session value: either a mutable integer buffer that several names may
/// share, or an opaque handle that cannot be serialized.
///
/// Cloning a buffer clones the handle, not the storage, so clones alias.
///
/// # Example
///
/// ```
/// use stow_dry_tests::SharedValue;
///
/// let a = SharedValue::buffer(1, vec![1, 2]);
/// let view = a.clone();
/// view.push(3);
/// assert_eq!(a.contents(), Some(vec![1, 2, 3]));
/// assert!(a.shares_storage(&view));
/// ```
#[derive(Clone, Debug)]
pub enum SharedValue {
    /// Integer buffer tagged with the storage region it lives in.
    Buffer {
        /// Region id reported to the fingerprint tracker.
        region: u64,
        /// Shared contents.
        data: Arc<Mutex<Vec<i64>>>,
    },
    /// Unserializable resource (socket, plot, ...).
    Handle {
        /// Region id used as the fingerprint identity.
        region: u64,
        /// What the handle refers to.
        label: String,
    },
}

impl SharedValue {
    /// Fresh buffer in `region`.
    pub fn buffer(region: u64, data: Vec<i64>) -> Self {
        Self::Buffer {
            region,
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Opaque handle.
    pub fn handle(region: u64, label: &str) -> Self {
        Self::Handle {
            region,
            label: label.to_string(),
        }
    }

    /// Region id.
    pub fn region(&self) -> u64 {
        match self {
            Self::Buffer { region, .. } | Self::Handle { region, .. } => *region,
        }
    }

    /// Returns `true` for handles.
    pub fn is_handle(&self) -> bool {
        matches!(self, Self::Handle { .. })
    }

    /// Copy of the buffer contents; `None` for handles.
    pub fn contents(&self) -> Option<Vec<i64>> {
        match self {
            Self::Buffer { data, .. } => Some(data.lock().unwrap_or_else(|e| e.into_inner()).clone()),
            Self::Handle { .. } => None,
        }
    }

    /// Element count; zero for handles.
    pub fn len(&self) -> usize {
        match self {
            Self::Buffer { data, .. } => data.lock().unwrap_or_else(|e| e.into_inner()).len(),
            Self::Handle { .. } => 0,
        }
    }

    /// Returns `true` for empty buffers and handles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `value` in place, visible through every alias. Returns `false`
    /// for handles.
    pub fn push(&self, value: i64) -> bool {
        match self {
            Self::Buffer { data, .. } => {
                data.lock().unwrap_or_else(|e| e.into_inner()).push(value);
                true
            }
            Self::Handle { .. } => false,
        }
    }

    /// Returns `true` if both values are buffers backed by the same storage.
    pub fn shares_storage(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Buffer { data: a, .. }, Self::Buffer { data: b, .. }) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Buffers compare by contents, handles by label.
impl PartialEq for SharedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Handle { label: a, .. }, Self::Handle { label: b, .. }) => a == b,
            (Self::Buffer { .. }, Self::Buffer { .. }) => self.contents() == other.contents(),
            _ => false,
        }
    }
}
