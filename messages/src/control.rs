// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Payloads of the control messages used to open a session.

use crate::Error;
use hubpack::SerializedSize;
use serde::Deserialize;
use serde::Serialize;

/// The size of a name field in a [`ResolveFamily`] request.
pub const NAME_LEN: usize = 16;

/// The family ID used before the family has been resolved.
pub const CONTROL_FAMILY: u16 = 0;

/// Request to resolve a family and one of its event groups by name.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, SerializedSize)]
pub struct ResolveFamily {
    pub family: [u8; NAME_LEN],
    pub group: [u8; NAME_LEN],
}

impl ResolveFamily {
    pub fn new(family: &str, group: &str) -> Result<Self, Error> {
        Ok(Self {
            family: encode_name(family)?,
            group: encode_name(group)?,
        })
    }

    /// Return the requested family name.
    pub fn family_name(&self) -> &str {
        decode_name(&self.family)
    }

    /// Return the requested group name.
    pub fn group_name(&self) -> &str {
        decode_name(&self.group)
    }
}

/// The reply to a [`ResolveFamily`] request.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, SerializedSize)]
pub struct FamilyInfo {
    pub family_id: u16,
    pub group_id: u32,
    /// The protocol version spoken by the mailbox driver.
    pub version: u8,
}

/// Request to join or leave an event group.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, SerializedSize)]
pub struct GroupMembership {
    pub group_id: u32,
}

/// Encode a name into a fixed-size, NUL-padded field.
///
/// The name must leave room for at least one trailing NUL.
pub fn encode_name(name: &str) -> Result<[u8; NAME_LEN], Error> {
    let bytes = name.as_bytes();
    if bytes.len() >= NAME_LEN {
        return Err(Error::NameTooLong(bytes.len()));
    }
    let mut out = [0u8; NAME_LEN];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Decode a NUL-padded name field.
///
/// Invalid UTF-8 decodes to an empty name, which never matches a real
/// family.
pub fn decode_name(field: &[u8; NAME_LEN]) -> &str {
    let end = field.iter().position(|b| *b == 0).unwrap_or(NAME_LEN);
    core::str::from_utf8(&field[..end]).unwrap_or("")
}
