// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! TWDM wavelength requests.

use crate::utils::check_len;
use crate::EncodePayload;
use crate::Error;
use crate::ParseFromPayload;
use std::fmt;

/// The highest TWDM channel ID.
pub const MAX_CHANNEL_ID: u8 = 7;

/// The kind of wavelength operation firmware asks for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(
    any(feature = "api-traits", test),
    derive(schemars::JsonSchema, serde::Deserialize, serde::Serialize)
)]
#[cfg_attr(any(feature = "api-traits", test), serde(rename_all = "snake_case"))]
pub enum TwdmOperation {
    DownstreamConfig,
    UpstreamConfig,
    UpstreamTuning,
}

impl TwdmOperation {
    /// Return `true` if the operation changes the downstream wavelength.
    pub const fn is_downstream(&self) -> bool {
        matches!(self, TwdmOperation::DownstreamConfig)
    }
}

impl TryFrom<u8> for TwdmOperation {
    type Error = Error;

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(TwdmOperation::DownstreamConfig),
            1 => Ok(TwdmOperation::UpstreamConfig),
            2 => Ok(TwdmOperation::UpstreamTuning),
            _ => Err(Error::InvalidValue {
                field: "operation",
                value: u32::from(x),
            }),
        }
    }
}

impl From<TwdmOperation> for u8 {
    fn from(op: TwdmOperation) -> Self {
        match op {
            TwdmOperation::DownstreamConfig => 0,
            TwdmOperation::UpstreamConfig => 1,
            TwdmOperation::UpstreamTuning => 2,
        }
    }
}

impl fmt::Display for TwdmOperation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TwdmOperation::DownstreamConfig => "downstream config",
            TwdmOperation::UpstreamConfig => "upstream config",
            TwdmOperation::UpstreamTuning => "upstream tuning",
        };
        write!(f, "{s}")
    }
}

/// A wavelength check, configure or tuning request from firmware.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(
    any(feature = "api-traits", test),
    derive(schemars::JsonSchema, serde::Deserialize, serde::Serialize)
)]
pub struct TwdmRequest {
    pub operation: TwdmOperation,
    pub channel_id: u8,
}

impl ParseFromPayload for TwdmRequest {
    fn parse(buf: &[u8]) -> Result<Self, Error> {
        check_len(buf, 2)?;
        let operation = TwdmOperation::try_from(buf[0])?;
        let channel_id = buf[1];
        if channel_id > MAX_CHANNEL_ID {
            return Err(Error::InvalidValue {
                field: "channel_id",
                value: u32::from(channel_id),
            });
        }
        Ok(Self {
            operation,
            channel_id,
        })
    }
}

impl EncodePayload for TwdmRequest {
    fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(vec![u8::from(self.operation), self.channel_id])
    }
}

#[cfg(test)]
mod tests {
    use super::TwdmOperation;
    use super::TwdmRequest;
    use crate::EncodePayload;
    use crate::Error;
    use crate::ParseFromPayload;

    #[test]
    fn test_parse_request() {
        let req = TwdmRequest::parse(&[1, 3]).unwrap();
        assert_eq!(req.operation, TwdmOperation::UpstreamConfig);
        assert_eq!(req.channel_id, 3);
        assert_eq!(req.encode().unwrap(), [1, 3]);
    }

    #[test]
    fn test_parse_request_rejects_bad_values() {
        assert_eq!(
            TwdmRequest::parse(&[3, 0]),
            Err(Error::InvalidValue {
                field: "operation",
                value: 3
            })
        );
        assert_eq!(
            TwdmRequest::parse(&[0, 8]),
            Err(Error::InvalidValue {
                field: "channel_id",
                value: 8
            })
        );
    }

    #[test]
    fn test_request_serializes_snake_case() {
        let req = TwdmRequest {
            operation: TwdmOperation::UpstreamTuning,
            channel_id: 2,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"operation":"upstream_tuning","channel_id":2}"#);
    }
}
