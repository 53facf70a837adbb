// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Configuration of the PON controller.

use crate::twdm::TuningStrategyId;
use crate::Error;
use pon_messages::control::encode_name;
use pon_messages::EVENT_GROUP_NAME;
use pon_messages::FAMILY_NAME;
use std::path::PathBuf;
use std::time::Duration;

/// Return the default time to wait for a reply to a request.
pub const fn default_response_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Return the default time to wait for background tasks at shutdown.
pub const fn default_join_timeout() -> Duration {
    Duration::from_secs(3)
}

/// Return the default optical alarm sampling interval.
pub const fn default_alarm_interval() -> Duration {
    Duration::from_secs(1)
}

/// Return the default directory in which the mailbox driver listens.
pub fn default_mailbox_dir() -> PathBuf {
    PathBuf::from("/run/pon-mbox")
}

/// Return the default directory for the controller's own endpoints.
pub fn default_socket_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Paths to the files exposing the two SFF-8472 EEPROM pages.
#[derive(Clone, Debug)]
pub struct EepromPaths {
    /// Serial ID page, at address A0h.
    pub a0: PathBuf,
    /// Diagnostics page, at address A2h.
    pub a2: PathBuf,
}

/// Configuration for a [`crate::Controller`].
///
/// The [`ConfigBuilder`] can be used to construct this with defaults that
/// match a production ONU.
#[derive(Clone, Debug)]
pub struct Config {
    /// The directory holding the mailbox driver's endpoint.
    pub mailbox_dir: PathBuf,

    /// The name of the protocol family.
    ///
    /// The driver's endpoint is named after the family, in `mailbox_dir`.
    pub family: String,

    /// The name of the event group carrying firmware events.
    pub event_group: String,

    /// The directory in which the controller binds its own endpoints.
    pub socket_dir: PathBuf,

    /// The time to wait for a reply to any one request.
    pub response_timeout: Duration,

    /// The time to wait for each background task to stop on shutdown.
    pub join_timeout: Duration,

    /// The interval between optical alarm samples.
    pub alarm_interval: Duration,

    /// Whether to join the event group and dispatch firmware events.
    pub subscribe_events: bool,

    /// The transceiver-specific sequence used to commit TWDM channels.
    pub tuning_strategy: TuningStrategyId,

    /// The TWDM channels this ONU may use, one bit per channel ID.
    pub channel_mask: u8,

    /// Files backing the transceiver EEPROM.
    ///
    /// If `None`, an in-memory EEPROM is used.
    pub eeprom: Option<EepromPaths>,
}

impl Config {
    /// Return the path of the mailbox driver's endpoint.
    pub fn peer_path(&self) -> PathBuf {
        self.mailbox_dir.join(format!("{}.sock", self.family))
    }
}

/// A builder interface for generating controller configuration.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    mailbox_dir: Option<PathBuf>,
    family: Option<String>,
    event_group: Option<String>,
    socket_dir: Option<PathBuf>,
    response_timeout: Option<Duration>,
    join_timeout: Option<Duration>,
    alarm_interval: Option<Duration>,
    subscribe_events: Option<bool>,
    tuning_strategy: Option<TuningStrategyId>,
    channel_mask: Option<u8>,
    eeprom: Option<EepromPaths>,
}

impl ConfigBuilder {
    /// Create a new builder, with all settings at their defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory holding the mailbox driver's endpoint.
    pub fn mailbox_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mailbox_dir = Some(dir.into());
        self
    }

    /// Set the protocol family name.
    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// Set the event group name.
    pub fn event_group(mut self, group: impl Into<String>) -> Self {
        self.event_group = Some(group.into());
        self
    }

    /// Set the directory in which local endpoints are bound.
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = Some(timeout);
        self
    }

    pub fn alarm_interval(mut self, interval: Duration) -> Self {
        self.alarm_interval = Some(interval);
        self
    }

    /// Set whether to subscribe to firmware events.
    pub fn subscribe_events(mut self, subscribe: bool) -> Self {
        self.subscribe_events = Some(subscribe);
        self
    }

    pub fn tuning_strategy(mut self, strategy: TuningStrategyId) -> Self {
        self.tuning_strategy = Some(strategy);
        self
    }

    pub fn channel_mask(mut self, mask: u8) -> Self {
        self.channel_mask = Some(mask);
        self
    }

    /// Use files for the two EEPROM pages.
    pub fn eeprom(mut self, a0: impl Into<PathBuf>, a2: impl Into<PathBuf>) -> Self {
        self.eeprom = Some(EepromPaths {
            a0: a0.into(),
            a2: a2.into(),
        });
        self
    }

    /// Build a `Config` from `self`.
    pub fn build(self) -> Result<Config, Error> {
        let family = self.family.unwrap_or_else(|| String::from(FAMILY_NAME));
        let event_group = self
            .event_group
            .unwrap_or_else(|| String::from(EVENT_GROUP_NAME));
        for name in [&family, &event_group] {
            if name.is_empty() {
                return Err(Error::Config(String::from("names must not be empty")));
            }
            encode_name(name).map_err(|e| Error::Config(format!("'{name}': {e}")))?;
        }

        let mailbox_dir = self.mailbox_dir.unwrap_or_else(default_mailbox_dir);
        if !mailbox_dir.is_dir() {
            return Err(Error::Config(format!(
                "mailbox directory '{}' does not exist",
                mailbox_dir.display()
            )));
        }

        let response_timeout = self
            .response_timeout
            .unwrap_or_else(default_response_timeout);
        let join_timeout = self.join_timeout.unwrap_or_else(default_join_timeout);
        let alarm_interval = self.alarm_interval.unwrap_or_else(default_alarm_interval);
        for (what, value) in [
            ("response timeout", response_timeout),
            ("join timeout", join_timeout),
            ("alarm interval", alarm_interval),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{what} must be non-zero")));
            }
        }

        Ok(Config {
            mailbox_dir,
            family,
            event_group,
            socket_dir: self.socket_dir.unwrap_or_else(default_socket_dir),
            response_timeout,
            join_timeout,
            alarm_interval,
            subscribe_events: self.subscribe_events.unwrap_or(true),
            tuning_strategy: self.tuning_strategy.unwrap_or_default(),
            channel_mask: self.channel_mask.unwrap_or(u8::MAX),
            eeprom: self.eeprom,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigBuilder;
    use crate::twdm::TuningStrategyId;
    use std::time::Duration;

    #[test]
    fn test_config_builder() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigBuilder::new()
            .mailbox_dir(dir.path())
            .build()
            .unwrap();
        assert_eq!(config.family, "pon_mbox");
        assert_eq!(config.event_group, "pon_events");
        assert_eq!(config.peer_path(), dir.path().join("pon_mbox.sock"));
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert_eq!(config.join_timeout, Duration::from_secs(3));
        assert_eq!(config.tuning_strategy, TuningStrategyId::Simulated);
        assert_eq!(config.channel_mask, 0xff);
        assert!(config.subscribe_events);
        assert!(config.eeprom.is_none());
    }

    #[test]
    fn test_config_builder_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigBuilder::new()
            .mailbox_dir(dir.path().join("missing"))
            .build()
            .is_err());
        assert!(ConfigBuilder::new()
            .mailbox_dir(dir.path())
            .family("a-family-name-that-is-too-long")
            .build()
            .is_err());
        assert!(ConfigBuilder::new()
            .mailbox_dir(dir.path())
            .event_group("")
            .build()
            .is_err());
        assert!(ConfigBuilder::new()
            .mailbox_dir(dir.path())
            .response_timeout(Duration::ZERO)
            .build()
            .is_err());
    }
}
