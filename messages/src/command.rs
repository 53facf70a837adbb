// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Command and event identifiers.
//!
//! The command ID is a 16-bit value. The ID space is partitioned so that
//! synchronous commands, unsolicited firmware events and the control messages
//! used to set up a session never alias one another:
//!
//! - `0x0001..=0x00ff`: control messages.
//! - `0x0100..=0x07ff`: synchronous commands issued by the host.
//! - `0x0800..=0x0fff`: events pushed by the firmware.

use core::fmt;
use core::str::FromStr;

macro_rules! id_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $id:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        #[cfg_attr(
            any(feature = "api-traits", test),
            derive(schemars::JsonSchema, serde::Deserialize, serde::Serialize)
        )]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant, in ID order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The wire value of this identifier.
            pub const fn id(self) -> u16 {
                match self {
                    $( $name::$variant => $id ),+
                }
            }

            /// Look up the identifier with the provided wire value.
            pub const fn from_id(id: u16) -> Option<Self> {
                match id {
                    $( $id => Some($name::$variant), )+
                    _ => None,
                }
            }

            /// A stable, human-readable name.
            pub const fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => stringify!($variant) ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = UnknownName;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted: String = s.chars().filter(|c| *c != '-' && *c != '_').collect();
                $name::ALL
                    .iter()
                    .find(|x| x.name().eq_ignore_ascii_case(&wanted))
                    .copied()
                    .ok_or_else(|| UnknownName(s.to_string()))
            }
        }
    };
}

/// A name that matches no command or event.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown command name '{0}'")]
pub struct UnknownName(pub String);

id_enum! {
    /// Messages used to establish a session with the mailbox driver.
    pub enum Control {
        /// Resolve the family and event group names to numeric IDs.
        ResolveFamily = 0x0001,
        /// Subscribe the sending endpoint to an event group.
        JoinGroup = 0x0002,
        /// Remove the sending endpoint from an event group.
        LeaveGroup = 0x0003,
    }
}

id_enum! {
    /// Synchronous commands issued by the host.
    ///
    /// Each command addresses a firmware object. Whether it is read or
    /// written is given by the direction attribute of the frame.
    pub enum Command {
        Capabilities = 0x0100,
        Version = 0x0101,
        Limits = 0x0102,
        Mode = 0x0103,
        OpticConfig = 0x0110,
        SerdesConfig = 0x0111,
        GponConfig = 0x0120,
        XgsponConfig = 0x0121,
        Ngpon2Config = 0x0122,
        Credentials = 0x0123,
        EncryptionConfig = 0x0124,
        TwdmOpticConfig = 0x0130,
        TwdmChannelProfile = 0x0131,
        PsmConfig = 0x0140,
        GtcCounters = 0x0150,
        XgtcCounters = 0x0151,
        GemCounters = 0x0152,
        EthCounters = 0x0153,
        PloamCounters = 0x0154,
        TwdmCounters = 0x0155,
        AlarmConfig = 0x0160,
        AlarmStatus = 0x0161,
        DebugConfig = 0x0170,
        TraceConfig = 0x0171,
        TestPattern = 0x0172,
        Register = 0x0180,
    }
}

id_enum! {
    /// Unsolicited events pushed by the firmware.
    pub enum Event {
        FirmwareInit = 0x0800,
        PloamState = 0x0801,
        GtcPloamLog = 0x0802,
        XgtcPloamLog = 0x0803,
        AlarmRaised = 0x0810,
        AlarmCleared = 0x0811,
        TxPowerLevel = 0x0820,
        TimeOfDaySync = 0x0821,
        TwdmWavelengthCheck = 0x0830,
        TwdmWavelengthConfig = 0x0831,
        TwdmWavelengthTuning = 0x0832,
        CalibrationRecord = 0x0840,
        SyncEthernetStatus = 0x0841,
        RandomChallengeTable = 0x0850,
        AuthResultTable = 0x0851,
        MibUnlinkAll = 0x0860,
    }
}

impl Event {
    /// Return `true` if the firmware expects an answer to this event.
    ///
    /// All other events are log-only, and any reply from a handler is
    /// discarded.
    pub const fn expects_answer(self) -> bool {
        matches!(
            self,
            Event::TwdmWavelengthCheck
                | Event::TwdmWavelengthConfig
                | Event::TwdmWavelengthTuning
                | Event::CalibrationRecord
                | Event::RandomChallengeTable
                | Event::AuthResultTable
                | Event::MibUnlinkAll
        )
    }
}

/// Any command ID that may appear on the wire.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CommandId {
    Control(Control),
    Command(Command),
    Event(Event),
    Unknown(u16),
}

impl From<u16> for CommandId {
    fn from(id: u16) -> Self {
        if let Some(c) = Control::from_id(id) {
            CommandId::Control(c)
        } else if let Some(c) = Command::from_id(id) {
            CommandId::Command(c)
        } else if let Some(e) = Event::from_id(id) {
            CommandId::Event(e)
        } else {
            CommandId::Unknown(id)
        }
    }
}

impl From<CommandId> for u16 {
    fn from(id: CommandId) -> Self {
        match id {
            CommandId::Control(c) => c.id(),
            CommandId::Command(c) => c.id(),
            CommandId::Event(e) => e.id(),
            CommandId::Unknown(x) => x,
        }
    }
}

impl From<Control> for CommandId {
    fn from(c: Control) -> Self {
        CommandId::Control(c)
    }
}

impl From<Command> for CommandId {
    fn from(c: Command) -> Self {
        CommandId::Command(c)
    }
}

impl From<Event> for CommandId {
    fn from(e: Event) -> Self {
        CommandId::Event(e)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandId::Control(c) => write!(f, "{c}"),
            CommandId::Command(c) => write!(f, "{c}"),
            CommandId::Event(e) => write!(f, "{e}"),
            CommandId::Unknown(x) => write!(f, "Unknown({x:#06x})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Command;
    use super::CommandId;
    use super::Control;
    use super::Event;
    use std::collections::BTreeSet;

    #[test]
    fn test_ids_never_alias() {
        let mut seen = BTreeSet::new();
        let ids = Control::ALL
            .iter()
            .map(|c| c.id())
            .chain(Command::ALL.iter().map(|c| c.id()))
            .chain(Event::ALL.iter().map(|e| e.id()));
        for id in ids {
            assert!(seen.insert(id), "duplicate command ID {id:#06x}");
        }
    }

    #[test]
    fn test_command_id_conversion() {
        for c in Command::ALL {
            assert_eq!(CommandId::from(c.id()), CommandId::Command(*c));
            assert_eq!(u16::from(CommandId::Command(*c)), c.id());
        }
        for e in Event::ALL {
            assert_eq!(CommandId::from(e.id()), CommandId::Event(*e));
        }
        assert_eq!(CommandId::from(0x7fff), CommandId::Unknown(0x7fff));
        assert_eq!(u16::from(CommandId::Unknown(0x7fff)), 0x7fff);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("gem-counters".parse::<Command>(), Ok(Command::GemCounters));
        assert_eq!("Capabilities".parse::<Command>(), Ok(Command::Capabilities));
        assert_eq!("ploam_state".parse::<Event>(), Ok(Event::PloamState));
        assert!("nope".parse::<Command>().is_err());
    }

    #[test]
    fn test_serialize_names() {
        let json = serde_json::to_string(&Event::TwdmWavelengthCheck).unwrap();
        assert_eq!(json, r#""TwdmWavelengthCheck""#);
        let schema = schemars::schema_for!(Command);
        let json = serde_json::to_value(&schema).unwrap();
        assert!(json["enum"].as_array().unwrap().len() >= Command::ALL.len());
    }
}
