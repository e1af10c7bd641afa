// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Value codec port.
use thiserror::Error;

/// Errors raised by a [`ValueCodec`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A value cannot be serialized.
    #[error("cannot encode {name}: {reason}")]
    Unencodable {
        /// Variable name.
        name: String,
        /// Codec-specific reason.
        reason: String,
    },
    /// A payload is not a valid encoded group.
    #[error("malformed group payload: {0}")]
    Malformed(String),
}

/// Host serializer for groups of possibly aliased values.
///
/// A group is encoded as one payload so storage shared between members is
/// written once; decoding must rebuild that sharing.
pub trait ValueCodec {
    /// Host value type.
    type Value;

    /// Serializes every member of one alias group.
    fn encode_group(&self, members: &[(&str, &Self::Value)]) -> Result<Vec<u8>, CodecError>;

    /// Inverse of [`encode_group`](Self::encode_group): names and fresh values
    /// in encoding order.
    fn decode_group(&self, bytes: &[u8]) -> Result<Vec<(String, Self::Value)>, CodecError>;
}
