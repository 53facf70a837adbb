// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Read-mostly facts reported by the firmware, and register access.

use crate::hubpack_payload;
use crate::utils::check_len;
use crate::EncodePayload;
use crate::Error;
use crate::ParseFromAttributes;
use crate::ParseFromPayload;
use hubpack::SerializedSize;
use pon_messages::attr::AttrGroup;
use pon_messages::attr::AttrValue;
use pon_messages::attr::ALARM_STATUS_GROUP;
use serde::Deserialize;
use serde::Serialize;
use static_assertions::const_assert_eq;
use std::fmt;

bitflags::bitflags! {
    /// The features supported by the firmware.
    ///
    /// Unknown bits are retained, so that a capability added by newer
    /// firmware round-trips through the host unchanged.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Capabilities: u32 {
        const GPON = 1 << 0;
        const XGPON = 1 << 1;
        const XGSPON = 1 << 2;
        const NGPON2 = 1 << 3;
        const TWDM = 1 << 4;
        const PSM = 1 << 5;
        const DEBUG = 1 << 6;
        const SYNC_ETHERNET = 1 << 7;
        const TIME_OF_DAY = 1 << 8;
        const EXTERNAL_CALIBRATION = 1 << 9;
    }
}

impl ParseFromPayload for Capabilities {
    fn parse(buf: &[u8]) -> Result<Self, Error> {
        check_len(buf, 4)?;
        let bits = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        Ok(Self::from_bits_retain(bits))
    }
}

impl EncodePayload for Capabilities {
    fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(self.bits().to_le_bytes().to_vec())
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "{name}")?;
            first = false;
        }
        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "{unknown:#x}")?;
        }
        Ok(())
    }
}

/// The firmware version descriptor.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, SerializedSize)]
#[cfg_attr(any(feature = "api-traits", test), derive(schemars::JsonSchema))]
pub struct VersionInfo {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
    /// The PON standard the image was built for.
    pub standard: u8,
    pub platform: u8,
    pub hw_revision: u16,
    /// Build time, seconds since the UNIX epoch.
    pub build_time: u32,
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{} (standard {}, platform {}, hw rev {})",
            self.major, self.minor, self.patch, self.standard, self.platform, self.hw_revision
        )
    }
}

/// The ranges of identifiers the firmware accepts.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, SerializedSize)]
#[cfg_attr(any(feature = "api-traits", test), derive(schemars::JsonSchema))]
pub struct Limits {
    pub gem_port_id_max: u16,
    pub alloc_id_max: u16,
    pub tcont_max: u16,
    pub gem_ports_per_tcont: u16,
    pub twdm_channels: u8,
    pub max_frame_size: u16,
}

crate::byte_enum! {
    name = OperatingMode,
    description = "The PON mode the firmware is running in.",
    variants = {
        1, Gpon, "GPON",
        2, Xgpon, "XG-PON",
        3, Xgspon, "XGS-PON",
        4, Ngpon2TenG, "NG-PON2 10G",
        5, Ngpon2TwoPointFiveG, "NG-PON2 2.5G",
        6, Aon, "Active Ethernet",
    },
    other_variants = { Unknown: 0 | 7.. },
}

impl OperatingMode {
    /// Return `true` if the mode uses TWDM wavelength tuning.
    pub const fn is_twdm(&self) -> bool {
        matches!(self, Self::Ngpon2TenG | Self::Ngpon2TwoPointFiveG)
    }
}

impl ParseFromPayload for OperatingMode {
    fn parse(buf: &[u8]) -> Result<Self, Error> {
        check_len(buf, 1)?;
        Ok(Self::from(buf[0]))
    }
}

impl EncodePayload for OperatingMode {
    fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(vec![u8::from(*self)])
    }
}

/// The optical interface configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, SerializedSize)]
#[cfg_attr(any(feature = "api-traits", test), derive(schemars::JsonSchema))]
pub struct OpticConfig {
    /// Laser setup time, in bit clocks.
    pub laser_setup_time: u16,
    /// Laser hold time, in bit clocks.
    pub laser_hold_time: u16,
    /// Delay between SerDes enable and transmit, in bit clocks.
    pub serdes_delay: u16,
    /// Bias current threshold, in 2 uA units.
    pub bias_threshold: u16,
    pub burst_idle_pattern: u32,
    /// Diagnostics are externally calibrated, see SFF-8472 section 9.
    pub external_calibration: bool,
    pub tx_disable_inverted: bool,
}

/// A single register access.
///
/// For a read, only `addr` is meaningful in the request. The reply carries
/// the value read.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, SerializedSize)]
#[cfg_attr(any(feature = "api-traits", test), derive(schemars::JsonSchema))]
pub struct RegisterAccess {
    pub addr: u32,
    pub value: u32,
}

/// One entry of the firmware alarm table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(
    any(feature = "api-traits", test),
    derive(schemars::JsonSchema, serde::Deserialize, serde::Serialize)
)]
pub struct FirmwareAlarm {
    pub alarm_id: u16,
    pub active: bool,
    /// Firmware timestamp of the last change, in milliseconds.
    pub timestamp: u32,
}

impl FirmwareAlarm {
    pub fn to_group(&self) -> AttrGroup {
        AttrGroup::new(ALARM_STATUS_GROUP)
            .with(1, AttrValue::U16(self.alarm_id))
            .with(2, AttrValue::U8(u8::from(self.active)))
            .with(3, AttrValue::U32(self.timestamp))
    }
}

// Alarm status replies and alarm events carry one group per alarm.
impl ParseFromAttributes for Vec<FirmwareAlarm> {
    fn parse_attributes(groups: &[AttrGroup]) -> Result<Self, Error> {
        groups
            .iter()
            .filter(|g| g.id == ALARM_STATUS_GROUP)
            .map(|g| {
                let Some(AttrValue::U16(alarm_id)) = g.get(1) else {
                    return Err(Error::InvalidValue {
                        field: "alarm_id",
                        value: 0,
                    });
                };
                let timestamp = match g.get(3) {
                    Some(AttrValue::U32(t)) => *t,
                    _ => 0,
                };
                Ok(FirmwareAlarm {
                    alarm_id: *alarm_id,
                    active: g.get_u64(2).unwrap_or(0) != 0,
                    timestamp,
                })
            })
            .collect()
    }
}

const_assert_eq!(VersionInfo::MAX_SIZE, 12);
const_assert_eq!(Limits::MAX_SIZE, 11);
const_assert_eq!(OpticConfig::MAX_SIZE, 14);
const_assert_eq!(RegisterAccess::MAX_SIZE, 8);

hubpack_payload!(VersionInfo, Limits, OpticConfig, RegisterAccess);
