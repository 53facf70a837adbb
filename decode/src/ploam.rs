// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! PLOAM state machine reporting.

use crate::hubpack_payload;
use hubpack::SerializedSize;
use serde::Deserialize;
use serde::Serialize;

crate::byte_enum! {
    name = MainState,
    description = "The main state of the ONU activation state machine.",
    variants = {
        1, Initial, "O1 initial",
        2, Standby, "O2 standby",
        3, SerialNumber, "O3 serial number",
        4, Ranging, "O4 ranging",
        5, Operation, "O5 operation",
        6, IntermittentLods, "O6 intermittent LODS",
        7, EmergencyStop, "O7 emergency stop",
        8, DownstreamTuning, "O8 downstream tuning",
        9, UpstreamTuning, "O9 upstream tuning",
    },
    other_variants = { Unknown: 0 | 10.. },
}

impl MainState {
    /// Return the main state of a raw PLOAM state.
    ///
    /// Firmware reports sub-states as `main * 10 + sub`, e.g. 51 is the
    /// second sub-state of O5.
    pub fn from_raw(raw: u16) -> Self {
        Self::from(u8::try_from(raw / 10).unwrap_or(u8::MAX))
    }

    /// Return `true` if this is the operational band.
    ///
    /// Alarm evaluation is only meaningful while the link is in this band.
    pub const fn is_operational(&self) -> bool {
        matches!(self, Self::Operation)
    }
}

/// A PLOAM state change reported by firmware.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, SerializedSize)]
#[cfg_attr(any(feature = "api-traits", test), derive(schemars::JsonSchema))]
pub struct PloamStateChange {
    /// The raw state before the change.
    pub previous: u16,
    /// The raw state after the change.
    pub current: u16,
    /// Firmware timestamp of the change, in milliseconds.
    pub timestamp: u32,
}

impl PloamStateChange {
    pub fn previous_main(&self) -> MainState {
        MainState::from_raw(self.previous)
    }

    pub fn current_main(&self) -> MainState {
        MainState::from_raw(self.current)
    }

    /// Return `true` if the change enters the operational band from outside
    /// of it.
    pub fn enters_operation(&self) -> bool {
        !self.previous_main().is_operational() && self.current_main().is_operational()
    }
}

hubpack_payload!(PloamStateChange);
