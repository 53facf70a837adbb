// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Attribute encoding used in the body of every frame.
//!
//! Attributes are type-length-value records:
//!
//! ```text
//! +--------+--------+----------------+---------+
//! | len:16 | id:16  | value          | padding |
//! +--------+--------+----------------+---------+
//! ```
//!
//! All integers are little-endian. `len` covers the 4-byte attribute header
//! and the value, but not the padding, which aligns the next attribute to a
//! 4-byte boundary. If the top bit of `id` is set, the value is itself a
//! sequence of attributes, a nested group. Nested groups are validated
//! against a per-command [`GroupSchema`].

use crate::command::Command;
use crate::command::CommandId;
use crate::command::Event;
use crate::Error;

/// The size of an attribute header.
pub const ATTR_HEADER_LEN: usize = 4;

/// The alignment of each attribute.
pub const ATTR_ALIGN: usize = 4;

/// Flag in the attribute ID marking a nested group.
pub const NESTED: u16 = 0x8000;

/// Top-level attribute IDs.
pub mod ids {
    pub const DIRECTION: u16 = 1;
    pub const COMMAND: u16 = 2;
    pub const ACK: u16 = 3;
    pub const FLAGS: u16 = 4;
    pub const PAYLOAD: u16 = 5;
}

/// The type of a single field within a nested group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttrType {
    U8,
    U16,
    U32,
    U64,
    Bytes,
}

impl AttrType {
    /// The exact encoded size of the type, or `None` for variable length.
    pub const fn size(&self) -> Option<usize> {
        match self {
            AttrType::U8 => Some(1),
            AttrType::U16 => Some(2),
            AttrType::U32 => Some(4),
            AttrType::U64 => Some(8),
            AttrType::Bytes => None,
        }
    }
}

/// A typed attribute value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttrValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
}

impl AttrValue {
    pub fn kind(&self) -> AttrType {
        match self {
            AttrValue::U8(_) => AttrType::U8,
            AttrValue::U16(_) => AttrType::U16,
            AttrValue::U32(_) => AttrType::U32,
            AttrValue::U64(_) => AttrType::U64,
            AttrValue::Bytes(_) => AttrType::Bytes,
        }
    }

    /// Return the value widened to a `u64`, if it is an integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::U8(x) => Some(u64::from(*x)),
            AttrValue::U16(x) => Some(u64::from(*x)),
            AttrValue::U32(x) => Some(u64::from(*x)),
            AttrValue::U64(x) => Some(*x),
            AttrValue::Bytes(_) => None,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            AttrValue::U8(x) => vec![*x],
            AttrValue::U16(x) => x.to_le_bytes().to_vec(),
            AttrValue::U32(x) => x.to_le_bytes().to_vec(),
            AttrValue::U64(x) => x.to_le_bytes().to_vec(),
            AttrValue::Bytes(x) => x.clone(),
        }
    }

    pub(crate) fn parse(id: u16, kind: AttrType, raw: &[u8]) -> Result<Self, Error> {
        if let Some(size) = kind.size() {
            if raw.len() != size {
                return Err(Error::BadAttributeLength { id, len: raw.len() });
            }
        }
        Ok(match kind {
            AttrType::U8 => AttrValue::U8(raw[0]),
            AttrType::U16 => AttrValue::U16(u16::from_le_bytes([raw[0], raw[1]])),
            AttrType::U32 => AttrValue::U32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            AttrType::U64 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(raw);
                AttrValue::U64(u64::from_le_bytes(word))
            }
            AttrType::Bytes => AttrValue::Bytes(raw.to_vec()),
        })
    }
}

/// A single field of a nested group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attribute {
    pub id: u16,
    pub value: AttrValue,
}

/// A nested group of typed attributes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttrGroup {
    pub id: u16,
    pub attrs: Vec<Attribute>,
}

impl AttrGroup {
    pub fn new(id: u16) -> Self {
        Self { id, attrs: vec![] }
    }

    /// Append a field, builder-style.
    pub fn with(mut self, id: u16, value: AttrValue) -> Self {
        self.attrs.push(Attribute { id, value });
        self
    }

    /// Return the value of the field with `id`, if present.
    pub fn get(&self, id: u16) -> Option<&AttrValue> {
        self.attrs.iter().find(|a| a.id == id).map(|a| &a.value)
    }

    /// Return the field with `id` widened to a `u64`, if present.
    pub fn get_u64(&self, id: u16) -> Option<u64> {
        self.get(id).and_then(AttrValue::as_u64)
    }
}

/// Description of one field in a group.
#[derive(Clone, Copy, Debug)]
pub struct FieldSchema {
    pub id: u16,
    pub kind: AttrType,
    pub name: &'static str,
}

impl FieldSchema {
    pub const fn new(id: u16, kind: AttrType, name: &'static str) -> Self {
        Self { id, kind, name }
    }
}

/// Description of a nested group a command may carry.
#[derive(Clone, Copy, Debug)]
pub struct GroupSchema {
    pub id: u16,
    pub fields: &'static [FieldSchema],
}

impl GroupSchema {
    fn field(&self, id: u16) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.id == id)
    }
}

macro_rules! counter_fields {
    ($($id:literal => $name:literal),+ $(,)?) => {
        &[$(FieldSchema::new($id, AttrType::U64, $name)),+]
    };
}

/// Group ID used by all counter commands.
pub const COUNTERS_GROUP: u16 = 1;

/// Group ID for the alarm status snapshot.
pub const ALARM_STATUS_GROUP: u16 = 2;

/// Group ID for the PLOAM message log events.
pub const PLOAM_LOG_GROUP: u16 = 3;

pub const GTC_COUNTERS: GroupSchema = GroupSchema {
    id: COUNTERS_GROUP,
    fields: counter_fields! {
        1 => "bip_errors",
        2 => "discarded_frames",
        3 => "fec_corrected_codewords",
        4 => "fec_uncorrectable_codewords",
        5 => "fec_total_codewords",
        6 => "lods_events",
    },
};

pub const XGTC_COUNTERS: GroupSchema = GroupSchema {
    id: COUNTERS_GROUP,
    fields: counter_fields! {
        1 => "psbd_hec_corrected",
        2 => "psbd_hec_uncorrectable",
        3 => "fs_hec_corrected",
        4 => "fs_hec_uncorrectable",
        5 => "lost_words",
        6 => "ploam_mic_errors",
    },
};

pub const GEM_COUNTERS: GroupSchema = GroupSchema {
    id: COUNTERS_GROUP,
    fields: counter_fields! {
        1 => "tx_frames",
        2 => "tx_fragments",
        3 => "tx_bytes",
        4 => "rx_frames",
        5 => "rx_fragments",
        6 => "rx_bytes",
        7 => "key_errors",
        8 => "hec_errors",
    },
};

pub const ETH_COUNTERS: GroupSchema = GroupSchema {
    id: COUNTERS_GROUP,
    fields: counter_fields! {
        1 => "bytes",
        2 => "frames",
        3 => "undersized_frames",
        4 => "oversized_frames",
        5 => "fcs_errors",
        6 => "dropped_frames",
    },
};

pub const PLOAM_COUNTERS: GroupSchema = GroupSchema {
    id: COUNTERS_GROUP,
    fields: counter_fields! {
        1 => "ds_messages",
        2 => "ds_mic_errors",
        3 => "us_messages",
        4 => "us_acks",
    },
};

pub const TWDM_COUNTERS: GroupSchema = GroupSchema {
    id: COUNTERS_GROUP,
    fields: counter_fields! {
        1 => "tuning_requests",
        2 => "tuning_rejected",
        3 => "tuning_completed",
        4 => "channel_profile_changes",
    },
};

pub const ALARM_STATUS: GroupSchema = GroupSchema {
    id: ALARM_STATUS_GROUP,
    fields: &[
        FieldSchema::new(1, AttrType::U16, "alarm_id"),
        FieldSchema::new(2, AttrType::U8, "active"),
        FieldSchema::new(3, AttrType::U32, "timestamp"),
    ],
};

pub const PLOAM_LOG: GroupSchema = GroupSchema {
    id: PLOAM_LOG_GROUP,
    fields: &[
        FieldSchema::new(1, AttrType::U8, "direction"),
        FieldSchema::new(2, AttrType::U8, "message_id"),
        FieldSchema::new(3, AttrType::U32, "timestamp"),
        FieldSchema::new(4, AttrType::Bytes, "message"),
    ],
};

/// Return the nested groups a command is allowed to carry.
pub fn schemas_for(command: CommandId) -> &'static [GroupSchema] {
    match command {
        CommandId::Command(Command::GtcCounters) => &[GTC_COUNTERS],
        CommandId::Command(Command::XgtcCounters) => &[XGTC_COUNTERS],
        CommandId::Command(Command::GemCounters) => &[GEM_COUNTERS],
        CommandId::Command(Command::EthCounters) => &[ETH_COUNTERS],
        CommandId::Command(Command::PloamCounters) => &[PLOAM_COUNTERS],
        CommandId::Command(Command::TwdmCounters) => &[TWDM_COUNTERS],
        CommandId::Command(Command::AlarmStatus) => &[ALARM_STATUS],
        CommandId::Event(Event::AlarmRaised | Event::AlarmCleared) => &[ALARM_STATUS],
        CommandId::Event(Event::GtcPloamLog | Event::XgtcPloamLog) => &[PLOAM_LOG],
        _ => &[],
    }
}

/// Append a single TLV to `out`, including padding.
pub(crate) fn put(out: &mut Vec<u8>, id: u16, value: &[u8]) -> Result<(), Error> {
    let len = u16::try_from(ATTR_HEADER_LEN + value.len()).map_err(|_| Error::AttributeTooLarge {
        id,
        len: value.len(),
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(value);
    out.resize(out.len() + padding(usize::from(len)), 0);
    Ok(())
}

/// Encode a nested group, including its header.
pub(crate) fn put_group(out: &mut Vec<u8>, group: &AttrGroup) -> Result<(), Error> {
    let mut inner = Vec::new();
    for attr in group.attrs.iter() {
        put(&mut inner, attr.id, &attr.value.to_bytes())?;
    }
    put(out, group.id | NESTED, &inner)
}

const fn padding(len: usize) -> usize {
    (ATTR_ALIGN - (len % ATTR_ALIGN)) % ATTR_ALIGN
}

/// An iterator over the raw TLVs in a buffer.
pub(crate) struct RawAttrs<'a> {
    buf: &'a [u8],
}

impl<'a> RawAttrs<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for RawAttrs<'a> {
    type Item = Result<(u16, &'a [u8]), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        if self.buf.len() < ATTR_HEADER_LEN {
            let len = self.buf.len();
            self.buf = &[];
            return Some(Err(Error::BadAttributeLength { id: 0, len }));
        }
        let len = usize::from(u16::from_le_bytes([self.buf[0], self.buf[1]]));
        let id = u16::from_le_bytes([self.buf[2], self.buf[3]]);
        if len < ATTR_HEADER_LEN || len > self.buf.len() {
            self.buf = &[];
            return Some(Err(Error::BadAttributeLength { id, len }));
        }
        let value = &self.buf[ATTR_HEADER_LEN..len];

        // The trailing padding of the final attribute may be omitted.
        let advance = (len + padding(len)).min(self.buf.len());
        self.buf = &self.buf[advance..];
        Some(Ok((id, value)))
    }
}

/// Parse and validate the body of a nested group against `schema`.
pub(crate) fn parse_group(schema: &GroupSchema, raw: &[u8]) -> Result<AttrGroup, Error> {
    let mut group = AttrGroup::new(schema.id);
    for item in RawAttrs::new(raw) {
        let (id, value) = item?;
        let field = schema.field(id).ok_or(Error::UnexpectedField {
            group: schema.id,
            field: id,
        })?;
        group.attrs.push(Attribute {
            id,
            value: AttrValue::parse(id, field.kind, value)?,
        });
    }
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::parse_group;
    use super::put;
    use super::put_group;
    use super::AttrGroup;
    use super::AttrValue;
    use super::RawAttrs;
    use super::ALARM_STATUS;
    use super::GEM_COUNTERS;
    use super::NESTED;
    use crate::Error;

    #[test]
    fn test_put_pads_to_alignment() {
        let mut out = vec![];
        put(&mut out, 7, &[1, 2, 3]).unwrap();
        assert_eq!(out, [7, 0, 7, 0, 1, 2, 3, 0]);
        put(&mut out, 8, &[]).unwrap();
        assert_eq!(out.len(), 12);
    }

    #[test]
    fn test_raw_attrs_rejects_overlong_length() {
        let buf = [0x20, 0, 1, 0, 0xff];
        let mut it = RawAttrs::new(&buf);
        assert_eq!(
            it.next(),
            Some(Err(Error::BadAttributeLength { id: 1, len: 0x20 }))
        );
        assert!(it.next().is_none());
    }

    #[test]
    fn test_raw_attrs_unpadded_final_attribute() {
        let buf = [5, 0, 9, 0, 0xaa];
        let items: Vec<_> = RawAttrs::new(&buf).collect();
        assert_eq!(items, vec![Ok((9, &buf[4..5]))]);
    }

    #[test]
    fn test_group_roundtrip_against_schema() {
        let group = AttrGroup::new(GEM_COUNTERS.id)
            .with(1, AttrValue::U64(10))
            .with(6, AttrValue::U64(12_345));
        let mut out = vec![];
        put_group(&mut out, &group).unwrap();
        let (id, body) = RawAttrs::new(&out).next().unwrap().unwrap();
        assert_eq!(id, GEM_COUNTERS.id | NESTED);
        let parsed = parse_group(&GEM_COUNTERS, body).unwrap();
        assert_eq!(parsed, group);
        assert_eq!(parsed.get_u64(6), Some(12_345));
        assert_eq!(parsed.get_u64(2), None);
    }

    #[test]
    fn test_group_wrong_field_width_is_rejected() {
        // `active` is a u8, send it as a u32.
        let group = AttrGroup::new(ALARM_STATUS.id).with(2, AttrValue::U32(1));
        let mut out = vec![];
        put_group(&mut out, &group).unwrap();
        let (_, body) = RawAttrs::new(&out).next().unwrap().unwrap();
        assert_eq!(
            parse_group(&ALARM_STATUS, body),
            Err(Error::BadAttributeLength { id: 2, len: 4 })
        );
    }

    #[test]
    fn test_group_unknown_field_is_rejected() {
        let group = AttrGroup::new(ALARM_STATUS.id).with(42, AttrValue::U8(1));
        let mut out = vec![];
        put_group(&mut out, &group).unwrap();
        let (_, body) = RawAttrs::new(&out).next().unwrap().unwrap();
        assert_eq!(
            parse_group(&ALARM_STATUS, body),
            Err(Error::UnexpectedField {
                group: ALARM_STATUS.id,
                field: 42
            })
        );
    }
}
