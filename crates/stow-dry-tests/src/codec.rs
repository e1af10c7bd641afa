// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON group codec for [`SharedValue`] that preserves storage sharing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use stow_checkpoint::{CodecError, ValueCodec};

use crate::value::SharedValue;

#[derive(Serialize, Deserialize)]
struct GroupPayload {
    buffers: Vec<BufferRecord>,
    members: Vec<MemberRecord>,
}

#[derive(Serialize, Deserialize)]
struct BufferRecord {
    region: u64,
    data: Vec<i64>,
}

#[derive(Serialize, Deserialize)]
struct MemberRecord {
    name: String,
    buffer: usize,
}

/// Encodes a group as JSON, writing each distinct buffer once.
///
/// Members that alias come back aliased; handles are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedValueCodec;

impl ValueCodec for SharedValueCodec {
    type Value = SharedValue;

    fn encode_group(&self, members: &[(&str, &SharedValue)]) -> Result<Vec<u8>, CodecError> {
        let mut payload = GroupPayload {
            buffers: Vec::new(),
            members: Vec::new(),
        };
        let mut seen: Vec<&SharedValue> = Vec::new();
        for &(name, value) in members {
            if value.is_handle() {
                return Err(CodecError::Unencodable {
                    name: name.to_string(),
                    reason: "opaque handle".to_string(),
                });
            }
            let buffer = if let Some(i) = seen.iter().position(|v| v.shares_storage(value)) {
                i
            } else {
                seen.push(value);
                payload.buffers.push(BufferRecord {
                    region: value.region(),
                    data: value.contents().unwrap_or_default(),
                });
                seen.len() - 1
            };
            payload.members.push(MemberRecord {
                name: name.to_string(),
                buffer,
            });
        }
        serde_json::to_vec(&payload).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn decode_group(&self, bytes: &[u8]) -> Result<Vec<(String, SharedValue)>, CodecError> {
        let payload: GroupPayload =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let storage: BTreeMap<usize, SharedValue> = payload
            .buffers
            .into_iter()
            .enumerate()
            .map(|(i, b)| {
                let value = SharedValue::Buffer {
                    region: b.region,
                    data: Arc::new(Mutex::new(b.data)),
                };
                (i, value)
            })
            .collect();
        payload
            .members
            .into_iter()
            .map(|m| {
                storage
                    .get(&m.buffer)
                    .cloned()
                    .map(|v| (m.name, v))
                    .ok_or_else(|| CodecError::Malformed(format!("buffer {} out of range", m.buffer)))
            })
            .collect()
    }
}
