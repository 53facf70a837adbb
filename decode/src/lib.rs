// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Decode the payloads exchanged with the PON firmware mailbox.

use hubpack::SerializedSize;
use pon_messages::attr::AttrGroup;
use pon_messages::Error as MessageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

mod counters;
mod firmware;
mod optic;
mod ploam;
mod twdm;
pub mod utils;

pub use counters::*;
pub use firmware::*;
pub use optic::*;
pub use ploam::*;
pub use twdm::*;

/// An error related to decoding a payload.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("payload too short: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid value {value} for field '{field}'")]
    InvalidValue { field: &'static str, value: u32 },

    #[error("attribute group {0} is missing")]
    MissingGroup(u16),

    #[error("Management or messaging error")]
    Message(#[from] MessageError),
}

/// A trait used to parse the opaque payload of a reply or event.
pub trait ParseFromPayload: Sized {
    /// Parse `Self` from the payload bytes.
    ///
    /// Trailing bytes are ignored, so that newer firmware may extend a
    /// payload without breaking older hosts.
    fn parse(buf: &[u8]) -> Result<Self, Error>;
}

/// A trait used to parse the nested attribute groups of a reply or event.
pub trait ParseFromAttributes: Sized {
    fn parse_attributes(groups: &[AttrGroup]) -> Result<Self, Error>;
}

/// A trait used to encode a value into the payload of a request.
pub trait EncodePayload {
    fn encode(&self) -> Result<Vec<u8>, Error>;
}

// Implement the payload traits for types with a fixed hubpack layout.
macro_rules! hubpack_payload {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::ParseFromPayload for $ty {
                fn parse(buf: &[u8]) -> Result<Self, $crate::Error> {
                    $crate::parse_fixed(buf)
                }
            }

            impl $crate::EncodePayload for $ty {
                fn encode(&self) -> Result<Vec<u8>, $crate::Error> {
                    pon_messages::serialize_payload(self).map_err($crate::Error::from)
                }
            }
        )+
    };
}
pub(crate) use hubpack_payload;

pub(crate) fn parse_fixed<T>(buf: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned + Serialize + SerializedSize,
{
    utils::check_len(buf, T::MAX_SIZE)?;
    pon_messages::deserialize_payload(buf).map_err(Error::from)
}

impl ParseFromPayload for () {
    fn parse(_: &[u8]) -> Result<Self, Error> {
        Ok(())
    }
}

impl ParseFromPayload for Vec<u8> {
    fn parse(buf: &[u8]) -> Result<Self, Error> {
        Ok(buf.to_vec())
    }
}

impl EncodePayload for [u8] {
    fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(self.to_vec())
    }
}
