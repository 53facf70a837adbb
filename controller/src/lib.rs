// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A host-side control interface to the PON firmware mailbox.
//!
//! The [`Controller`] owns a session with the mailbox driver: a command
//! channel for synchronous requests, an event channel on which the firmware
//! pushes unsolicited events, and the background tasks that serve them.

mod alarm;
mod cache;
mod config;
mod controller;
mod eeprom;
mod events;
mod handlers;
mod ioloop;
mod messages;
mod socket;
mod twdm;

#[cfg(test)]
mod test_utils;

pub use alarm::AlarmReport;
pub use config::*;
pub use controller::*;
pub use eeprom::*;
pub use handlers::*;
pub use twdm::*;

use pon_messages::frame::AckCode;
use std::time::Duration;

// The maximum number of requests queued on the command channel.
pub(crate) const NUM_OUTSTANDING_REQUESTS: usize = 16;

#[usdt::provider(provider = "pon_controller")]
mod probes {
    fn frame__sent(channel: &str, seq: u32, command: u16, n_bytes: u64) {}
    fn frame__received(channel: &str, seq: u32, command: u16, n_bytes: u64) {}
    fn bad__frame(channel: &str, reason: &str) {}
}

/// The kind of negative acknowledgement returned by the firmware.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(
    any(feature = "api-traits", test),
    derive(schemars::JsonSchema, serde::Deserialize, serde::Serialize)
)]
pub enum NackKind {
    /// The command failed for an unspecified reason.
    Generic,
    /// The entry being created already exists.
    Duplicate,
    /// The command requires debug mode, which is disabled.
    DebugDisabled,
    /// The firmware is in a state that does not permit the command.
    WrongState,
    /// The command was malformed.
    Malformed,
}

impl NackKind {
    /// Map an acknowledgement code onto a NACK kind.
    ///
    /// Returns `None` for positive or unrecognized codes.
    pub const fn from_ack(ack: AckCode) -> Option<Self> {
        match ack {
            AckCode::Nack => Some(NackKind::Generic),
            AckCode::NackDuplicate => Some(NackKind::Duplicate),
            AckCode::NackDebugDisabled => Some(NackKind::DebugDisabled),
            AckCode::NackWrongState => Some(NackKind::WrongState),
            AckCode::NackMalformed => Some(NackKind::Malformed),
            AckCode::Command | AckCode::Ack | AckCode::Unknown(_) => None,
        }
    }

    /// The acknowledgement code carrying this NACK on the wire.
    pub const fn ack_code(&self) -> AckCode {
        match self {
            NackKind::Generic => AckCode::Nack,
            NackKind::Duplicate => AckCode::NackDuplicate,
            NackKind::DebugDisabled => AckCode::NackDebugDisabled,
            NackKind::WrongState => AckCode::NackWrongState,
            NackKind::Malformed => AckCode::NackMalformed,
        }
    }
}

/// The broad category of an error, reported at API boundaries.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(
    any(feature = "api-traits", test),
    derive(schemars::JsonSchema, serde::Deserialize, serde::Serialize)
)]
pub enum ErrorKind {
    /// An argument or payload was outside the accepted range.
    OutOfRange,
    /// The firmware ran out of a resource, or the entry already exists.
    ResourceExhausted,
    /// The firmware failed to allocate memory.
    Memory,
    /// The operation is not supported in the current state or build.
    Unsupported,
    /// Any other driver or transport failure.
    Driver,
}

/// Classify a firmware status code.
///
/// Zero and positive values indicate success. Unrecognized negative values
/// are driver errors.
pub const fn classify_status(status: i32) -> Option<ErrorKind> {
    match status {
        0.. => None,
        -2 => Some(ErrorKind::OutOfRange),
        -3 => Some(ErrorKind::ResourceExhausted),
        -4 => Some(ErrorKind::Memory),
        -5 => Some(ErrorKind::Unsupported),
        _ => Some(ErrorKind::Driver),
    }
}

/// An error talking to the firmware mailbox.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("protocol family '{0}' could not be resolved")]
    FamilyNotFound(String),

    #[error("event group '{0}' could not be resolved")]
    GroupNotFound(String),

    #[error("malformed frame")]
    Frame(#[from] pon_messages::Error),

    #[error("failed to decode payload")]
    Decode(#[from] pon_decode::Error),

    #[error("firmware rejected the request: {0:?}")]
    Nack(NackKind),

    #[error("unknown acknowledgement code {0}")]
    UnknownAck(u8),

    #[error("firmware returned status {0}")]
    Status(i32),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel closed")]
    ChannelClosed,

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("task '{0}' did not stop in time and was aborted")]
    ShutdownTimeout(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Return the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Nack(NackKind::Malformed)
            | Error::OutOfRange(_)
            | Error::Frame(pon_messages::Error::FrameTooLarge(_)) => ErrorKind::OutOfRange,
            Error::Nack(NackKind::Duplicate) | Error::ResourceExhausted(_) => {
                ErrorKind::ResourceExhausted
            }
            Error::Nack(NackKind::DebugDisabled | NackKind::WrongState) | Error::Unsupported(_) => {
                ErrorKind::Unsupported
            }
            Error::Status(s) => classify_status(*s).unwrap_or(ErrorKind::Driver),
            _ => ErrorKind::Driver,
        }
    }

    /// The acknowledgement code used when this error answers an event.
    pub fn nack_code(&self) -> AckCode {
        match self {
            Error::Nack(kind) => kind.ack_code(),
            Error::OutOfRange(_) | Error::Decode(_) | Error::Frame(_) => AckCode::NackMalformed,
            _ => AckCode::Nack,
        }
    }
}

/// Convert a non-positive acknowledgement into an error.
pub(crate) fn map_ack(ack: AckCode) -> Error {
    match NackKind::from_ack(ack) {
        Some(kind) => Error::Nack(kind),
        None => Error::UnknownAck(u8::from(ack)),
    }
}

#[cfg(test)]
mod tests {
    use super::classify_status;
    use super::map_ack;
    use super::Error;
    use super::ErrorKind;
    use super::NackKind;
    use pon_messages::frame::AckCode;
    use std::collections::HashSet;

    #[test]
    fn test_nack_codes_map_to_distinct_kinds() {
        let codes = [
            AckCode::Nack,
            AckCode::NackDuplicate,
            AckCode::NackDebugDisabled,
            AckCode::NackWrongState,
            AckCode::NackMalformed,
        ];
        let mut seen = HashSet::new();
        for code in codes {
            let kind = NackKind::from_ack(code).unwrap();
            assert_eq!(kind.ack_code(), code);
            assert!(seen.insert(kind));
            assert!(matches!(map_ack(code), Error::Nack(k) if k == kind));
        }
    }

    #[test]
    fn test_unknown_ack_is_driver_error() {
        let err = map_ack(AckCode::Unknown(0x42));
        assert!(matches!(err, Error::UnknownAck(0x42)));
        assert_eq!(err.kind(), ErrorKind::Driver);
        assert_eq!(map_ack(AckCode::Ack).kind(), ErrorKind::Driver);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::Nack(NackKind::Generic).kind(), ErrorKind::Driver);
        assert_eq!(
            Error::Nack(NackKind::Malformed).kind(),
            ErrorKind::OutOfRange
        );
        assert_eq!(
            Error::Nack(NackKind::Duplicate).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            Error::Nack(NackKind::WrongState).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(Error::Status(-4).kind(), ErrorKind::Memory);
        assert_eq!(Error::Status(-99).kind(), ErrorKind::Driver);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(0), None);
        assert_eq!(classify_status(7), None);
        assert_eq!(classify_status(-1), Some(ErrorKind::Driver));
        assert_eq!(classify_status(-2), Some(ErrorKind::OutOfRange));
        assert_eq!(classify_status(-3), Some(ErrorKind::ResourceExhausted));
        assert_eq!(classify_status(-5), Some(ErrorKind::Unsupported));
        assert_eq!(classify_status(i32::MIN), Some(ErrorKind::Driver));
    }

    #[test]
    fn test_nack_code_for_handler_errors() {
        assert_eq!(
            Error::OutOfRange(String::from("x")).nack_code(),
            AckCode::NackMalformed
        );
        assert_eq!(
            Error::Nack(NackKind::WrongState).nack_code(),
            AckCode::NackWrongState
        );
        assert_eq!(Error::ChannelClosed.nack_code(), AckCode::Nack);
    }

    #[test]
    fn test_error_kind_serializes() {
        let json = serde_json::to_string(&ErrorKind::ResourceExhausted).unwrap();
        assert_eq!(json, r#""ResourceExhausted""#);
    }
}
