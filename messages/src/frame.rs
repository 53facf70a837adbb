// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The frame envelope shared by commands, replies and events.

use crate::attr;
use crate::attr::ids;
use crate::attr::AttrGroup;
use crate::attr::RawAttrs;
use crate::attr::NESTED;
use crate::command::CommandId;
use crate::Error;
use crate::MAX_FRAME_SIZE;
use hubpack::SerializedSize;
use serde::Deserialize;
use serde::Serialize;

pub mod version {
    pub const V1: u8 = 1;
    pub const CURRENT: u8 = V1;
}

/// The fixed header at the start of every frame.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, SerializedSize)]
pub struct Header {
    version: u8,
    /// The resolved protocol family.
    pub family: u16,
    /// The sequence number, shared between a request and its reply.
    pub seq: u32,
    /// The port ID of the sender.
    pub port: u32,
}

impl Header {
    pub const fn new(family: u16, seq: u32, port: u32) -> Self {
        Self {
            version: version::CURRENT,
            family,
            seq,
            port,
        }
    }

    pub const fn version(&self) -> u8 {
        self.version
    }
}

/// Whether a command reads or writes a firmware object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Get,
    Set,
}

impl From<Direction> for u8 {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Get => 0,
            Direction::Set => 1,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = Error;

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Direction::Get),
            1 => Ok(Direction::Set),
            _ => Err(Error::InvalidDirection(x)),
        }
    }
}

/// The acknowledgement code of a frame.
///
/// Requests and events carry [`AckCode::Command`]. Replies carry either an
/// acknowledgement or one of several negative acknowledgements.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AckCode {
    Command,
    Ack,
    Nack,
    NackDuplicate,
    NackDebugDisabled,
    NackWrongState,
    NackMalformed,
    Unknown(u8),
}

impl AckCode {
    /// Return `true` if this is any kind of negative acknowledgement.
    pub const fn is_nack(&self) -> bool {
        matches!(
            self,
            AckCode::Nack
                | AckCode::NackDuplicate
                | AckCode::NackDebugDisabled
                | AckCode::NackWrongState
                | AckCode::NackMalformed
        )
    }
}

impl From<u8> for AckCode {
    fn from(x: u8) -> Self {
        match x {
            0 => AckCode::Command,
            1 => AckCode::Ack,
            2 => AckCode::Nack,
            3 => AckCode::NackDuplicate,
            4 => AckCode::NackDebugDisabled,
            5 => AckCode::NackWrongState,
            6 => AckCode::NackMalformed,
            x => AckCode::Unknown(x),
        }
    }
}

impl From<AckCode> for u8 {
    fn from(a: AckCode) -> Self {
        match a {
            AckCode::Command => 0,
            AckCode::Ack => 1,
            AckCode::Nack => 2,
            AckCode::NackDuplicate => 3,
            AckCode::NackDebugDisabled => 4,
            AckCode::NackWrongState => 5,
            AckCode::NackMalformed => 6,
            AckCode::Unknown(x) => x,
        }
    }
}

bitflags::bitflags! {
    /// Optional per-frame flags.
    ///
    /// Unknown bits are preserved when decoding.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Flags: u32 {
        /// The sender wants an acknowledgement even for a log-only event.
        const ACK_REQUESTED = 1 << 0;
        /// Return every instance of the object, not just the first.
        const DUMP = 1 << 1;
        /// More frames belonging to the same reply follow.
        const MULTI = 1 << 2;
    }
}

/// A decoded frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub header: Header,
    pub direction: Direction,
    pub command: CommandId,
    pub ack: AckCode,
    pub flags: Flags,
    pub payload: Option<Vec<u8>>,
    pub groups: Vec<AttrGroup>,
}

impl Frame {
    pub fn new(
        header: Header,
        direction: Direction,
        command: impl Into<CommandId>,
        ack: AckCode,
    ) -> Self {
        Self {
            header,
            direction,
            command: command.into(),
            ack,
            flags: Flags::empty(),
            payload: None,
            groups: vec![],
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_group(mut self, group: AttrGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Build the answer to this frame.
    ///
    /// The answer shares the sequence number, direction and command of
    /// `self`, so that the peer can correlate it with its own request.
    pub fn answer(&self, port: u32, ack: AckCode, payload: Option<Vec<u8>>) -> Self {
        Self {
            header: Header::new(self.header.family, self.header.seq, port),
            direction: self.direction,
            command: self.command,
            ack,
            flags: self.flags & !Flags::MULTI,
            payload,
            groups: vec![],
        }
    }

    /// Return the payload, or an empty slice if there is none.
    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or(&[])
    }

    /// Return the nested group with the provided ID, if any.
    pub fn group(&self, id: u16) -> Option<&AttrGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Serialize the frame.
    ///
    /// This fails if a single attribute exceeds the 16-bit attribute length,
    /// or the whole frame exceeds [`MAX_FRAME_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut out = vec![0u8; Header::MAX_SIZE];
        let n = hubpack::serialize(&mut out, &self.header).map_err(|_| Error::Serialization)?;
        out.truncate(n);
        attr::put(&mut out, ids::DIRECTION, &[u8::from(self.direction)])?;
        attr::put(&mut out, ids::COMMAND, &u16::from(self.command).to_le_bytes())?;
        attr::put(&mut out, ids::ACK, &[u8::from(self.ack)])?;
        if !self.flags.is_empty() {
            attr::put(&mut out, ids::FLAGS, &self.flags.bits().to_le_bytes())?;
        }
        if let Some(payload) = &self.payload {
            attr::put(&mut out, ids::PAYLOAD, payload)?;
        }
        for group in self.groups.iter() {
            attr::put_group(&mut out, group)?;
        }
        if out.len() > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(out.len()));
        }
        Ok(out)
    }

    /// Deserialize and validate a frame.
    ///
    /// The direction, command ID and acknowledgement code are mandatory.
    /// Nested groups must appear in the schema of the command. Unknown
    /// top-level attributes are skipped.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let (header, body) =
            hubpack::deserialize::<Header>(buf).map_err(|_| Error::Truncated(buf.len()))?;
        if header.version != version::CURRENT {
            return Err(Error::UnsupportedVersion(header.version));
        }

        let mut direction = None;
        let mut command = None;
        let mut ack = None;
        let mut flags = Flags::empty();
        let mut payload = None;
        let mut raw_groups = vec![];

        for item in RawAttrs::new(body) {
            let (id, value) = item?;
            if id & NESTED != 0 {
                raw_groups.push((id & !NESTED, value));
                continue;
            }
            match id {
                ids::DIRECTION => {
                    let raw = scalar::<1>(id, value)?[0];
                    direction = Some(Direction::try_from(raw)?)
                }
                ids::COMMAND => {
                    command = Some(CommandId::from(u16::from_le_bytes(scalar(id, value)?)))
                }
                ids::ACK => ack = Some(AckCode::from(scalar::<1>(id, value)?[0])),
                ids::FLAGS => {
                    flags = Flags::from_bits_retain(u32::from_le_bytes(scalar(id, value)?))
                }
                ids::PAYLOAD => payload = Some(value.to_vec()),
                _ => {}
            }
        }

        let direction = direction.ok_or(Error::MissingAttribute(ids::DIRECTION))?;
        let command = command.ok_or(Error::MissingAttribute(ids::COMMAND))?;
        let ack = ack.ok_or(Error::MissingAttribute(ids::ACK))?;

        // Groups can only be validated once the command is known, which may
        // come after them in the frame.
        let schemas = attr::schemas_for(command);
        let groups = raw_groups
            .into_iter()
            .map(|(group_id, value)| {
                let schema = schemas
                    .iter()
                    .find(|s| s.id == group_id)
                    .ok_or(Error::UnexpectedGroup {
                        command: u16::from(command),
                        group: group_id,
                    })?;
                attr::parse_group(schema, value)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            header,
            direction,
            command,
            ack,
            flags,
            payload,
            groups,
        })
    }
}

// Extract a fixed-width top-level value.
fn scalar<const N: usize>(id: u16, raw: &[u8]) -> Result<[u8; N], Error> {
    raw.try_into()
        .map_err(|_| Error::BadAttributeLength { id, len: raw.len() })
}

#[cfg(test)]
mod tests {
    use super::AckCode;
    use super::Direction;
    use super::Flags;
    use super::Frame;
    use super::Header;
    use crate::attr;
    use crate::attr::ids;
    use crate::attr::AttrGroup;
    use crate::attr::AttrValue;
    use crate::attr::COUNTERS_GROUP;
    use crate::command::Command;
    use crate::command::CommandId;
    use crate::command::Event;
    use crate::Error;
    use crate::MAX_FRAME_SIZE;
    use hubpack::SerializedSize;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(
            Header::new(0x1d, 42, 1000),
            Direction::Set,
            Command::OpticConfig,
            AckCode::Command,
        )
        .with_flags(Flags::ACK_REQUESTED | Flags::from_bits_retain(1 << 20))
        .with_payload(vec![1, 2, 3, 4, 5]);
        let buf = frame.encode().unwrap();
        let decoded = Frame::decode(&buf).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.payload(), &[1, 2, 3, 4, 5]);
        assert!(decoded.flags.contains(Flags::ACK_REQUESTED));
        assert_eq!(decoded.flags.bits(), 1 | (1 << 20));
    }

    #[test]
    fn test_frame_roundtrip_with_counters() {
        let group = AttrGroup::new(COUNTERS_GROUP)
            .with(1, AttrValue::U64(7))
            .with(3, AttrValue::U64(u64::MAX));
        let frame = Frame::new(
            Header::new(1, 2, 3),
            Direction::Get,
            Command::GemCounters,
            AckCode::Ack,
        )
        .with_group(group.clone());
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.group(COUNTERS_GROUP), Some(&group));
        assert!(decoded.payload.is_none());
    }

    #[test]
    fn test_decode_missing_command() {
        let mut buf = vec![0u8; Header::MAX_SIZE];
        hubpack::serialize(&mut buf, &Header::new(1, 1, 1)).unwrap();
        attr::put(&mut buf, ids::DIRECTION, &[0]).unwrap();
        attr::put(&mut buf, ids::ACK, &[1]).unwrap();
        assert_eq!(
            Frame::decode(&buf),
            Err(Error::MissingAttribute(ids::COMMAND))
        );
    }

    #[test]
    fn test_decode_unexpected_group() {
        // Capabilities does not carry any nested groups.
        let frame = Frame::new(
            Header::new(1, 2, 3),
            Direction::Get,
            Command::Capabilities,
            AckCode::Ack,
        )
        .with_group(AttrGroup::new(COUNTERS_GROUP).with(1, AttrValue::U64(0)));
        assert_eq!(
            Frame::decode(&frame.encode().unwrap()),
            Err(Error::UnexpectedGroup {
                command: Command::Capabilities.id(),
                group: COUNTERS_GROUP,
            })
        );
    }

    #[test]
    fn test_decode_truncated_and_bad_version() {
        assert_eq!(Frame::decode(&[1, 2]), Err(Error::Truncated(2)));
        let frame = Frame::new(
            Header::new(1, 2, 3),
            Direction::Get,
            Event::FirmwareInit,
            AckCode::Command,
        );
        let mut buf = frame.encode().unwrap();
        buf[0] = 9;
        assert_eq!(Frame::decode(&buf), Err(Error::UnsupportedVersion(9)));
    }

    #[test]
    fn test_decode_unknown_command_and_ack() {
        let frame = Frame::new(
            Header::new(1, 2, 3),
            Direction::Get,
            CommandId::Unknown(0x7777),
            AckCode::Unknown(0xee),
        );
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.command, CommandId::Unknown(0x7777));
        assert_eq!(decoded.ack, AckCode::Unknown(0xee));
    }

    #[test]
    fn test_answer_keeps_sequence() {
        let event = Frame::new(
            Header::new(5, 77, 0),
            Direction::Set,
            Event::TwdmWavelengthCheck,
            AckCode::Command,
        )
        .with_flags(Flags::MULTI | Flags::ACK_REQUESTED);
        let answer = event.answer(1234, AckCode::NackWrongState, None);
        assert_eq!(answer.header.seq, 77);
        assert_eq!(answer.header.port, 1234);
        assert_eq!(answer.command, event.command);
        assert_eq!(answer.flags, Flags::ACK_REQUESTED);
        assert!(answer.ack.is_nack());
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let request = |len: usize| {
            Frame::new(
                Header::new(5, 1, 0),
                Direction::Set,
                Command::Mode,
                AckCode::Command,
            )
            .with_payload(vec![0xa5; len])
        };
        assert!(matches!(
            request(9000).encode(),
            Err(Error::FrameTooLarge(len)) if len > 9000
        ));
        let buf = request(MAX_FRAME_SIZE / 2).encode().unwrap();
        assert!(buf.len() <= MAX_FRAME_SIZE);
    }
}
