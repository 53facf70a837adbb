// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Wire formats for talking to the PON firmware mailbox.
//!
//! Every frame exchanged with the mailbox driver starts with a fixed
//! [`frame::Header`], followed by a sequence of attributes. Attributes carry
//! the direction of the access, the command identifier, the acknowledgement
//! code, optional flags, an opaque payload and, for some commands, nested
//! groups of typed fields. See [`frame`] and [`attr`] for details.

pub mod attr;
pub mod command;
pub mod control;
pub mod frame;

use hubpack::SerializedSize;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// The default name of the protocol family the mailbox driver registers.
pub const FAMILY_NAME: &str = "pon_mbox";

/// The default name of the multicast group carrying firmware events.
pub const EVENT_GROUP_NAME: &str = "pon_events";

/// The largest frame either side will send or accept.
pub const MAX_FRAME_SIZE: usize = 8192;

/// The largest opaque payload carried in a single frame.
///
/// The attribute length field is 16 bits wide, and includes the attribute
/// header itself.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - attr::ATTR_HEADER_LEN;

/// An error encoding or decoding a mailbox frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("frame is shorter than the header ({0} bytes)")]
    Truncated(usize),

    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),

    #[error("mandatory attribute {0} is missing")]
    MissingAttribute(u16),

    #[error("attribute {id} has invalid length {len}")]
    BadAttributeLength { id: u16, len: usize },

    #[error("attribute {id} is too large to encode ({len} bytes)")]
    AttributeTooLarge { id: u16, len: usize },

    #[error("invalid direction value {0}")]
    InvalidDirection(u8),

    #[error("command {command:#06x} does not carry attribute group {group}")]
    UnexpectedGroup { command: u16, group: u16 },

    #[error("attribute group {group} has no field {field}")]
    UnexpectedField { group: u16, field: u16 },

    #[error("name is too long ({0} bytes)")]
    NameTooLong(usize),

    #[error("payload serialization failed")]
    Serialization,

    #[error("frame of {0} bytes exceeds the mailbox limit")]
    FrameTooLarge(usize),
}

/// Serialize a fixed-layout payload type into an owned buffer.
pub fn serialize_payload<T>(value: &T) -> Result<Vec<u8>, Error>
where
    T: Serialize + SerializedSize,
{
    let mut buf = vec![0u8; T::MAX_SIZE];
    let n = hubpack::serialize(&mut buf, value).map_err(|_| Error::Serialization)?;
    buf.truncate(n);
    Ok(buf)
}

/// Deserialize a fixed-layout payload type, ignoring any trailing bytes.
pub fn deserialize_payload<T>(buf: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned + SerializedSize,
{
    hubpack::deserialize::<T>(buf)
        .map(|(value, _rest)| value)
        .map_err(|_| Error::Serialization)
}

#[cfg(test)]
mod tests {
    use super::deserialize_payload;
    use super::serialize_payload;
    use super::Error;
    use crate::control::FamilyInfo;

    #[test]
    fn test_payload_helpers() {
        let info = FamilyInfo {
            family_id: 0x1d,
            group_id: 3,
            version: 1,
        };
        let buf = serialize_payload(&info).unwrap();
        assert_eq!(buf.len(), 7);
        assert_eq!(deserialize_payload::<FamilyInfo>(&buf).unwrap(), info);
        assert_eq!(
            deserialize_payload::<FamilyInfo>(&buf[..3]),
            Err(Error::Serialization)
        );
    }
}
