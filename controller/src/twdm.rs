// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! TWDM wavelength selection.
//!
//! Firmware negotiates a wavelength change with a "check" event, asking
//! whether a channel is usable, followed by a "config" or "tuning" event
//! asking the host to move the transceiver to it. The transceiver-specific
//! part of the move is delegated to a [`TuningStrategy`].

use crate::eeprom::Eeprom;
use crate::eeprom::Page;
use crate::handlers::InboundEvent;
use crate::handlers::Reply;
use crate::Error;
use pon_decode::TwdmOperation;
use pon_decode::TwdmRequest;
use pon_decode::MAX_CHANNEL_ID;
use pon_messages::command::Event;
use slog::debug;
use slog::info;
use slog::Logger;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

/// Identifies one of the built-in tuning strategies.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(
    any(feature = "api-traits", test),
    derive(schemars::JsonSchema, serde::Deserialize, serde::Serialize)
)]
#[cfg_attr(any(feature = "api-traits", test), serde(rename_all = "kebab-case"))]
pub enum TuningStrategyId {
    /// Record the requested channels without touching hardware.
    #[default]
    Simulated,
    /// Password-protected EEPROM tables, first vendor layout.
    PasswordEepromA,
    /// Password-protected EEPROM tables, second vendor layout.
    PasswordEepromB,
    /// One channel register, shared by both directions.
    SingleRegister,
}

impl TuningStrategyId {
    pub const ALL: [TuningStrategyId; 4] = [
        TuningStrategyId::Simulated,
        TuningStrategyId::PasswordEepromA,
        TuningStrategyId::PasswordEepromB,
        TuningStrategyId::SingleRegister,
    ];

    /// Construct the strategy.
    pub fn build(&self, log: &Logger) -> Box<dyn TuningStrategy> {
        match self {
            TuningStrategyId::Simulated => Box::new(Simulated::new(log.clone())),
            TuningStrategyId::PasswordEepromA => Box::new(PasswordEeprom::LAYOUT_A),
            TuningStrategyId::PasswordEepromB => Box::new(PasswordEeprom::LAYOUT_B),
            TuningStrategyId::SingleRegister => Box::new(SingleRegister),
        }
    }
}

impl TryFrom<u8> for TuningStrategyId {
    type Error = Error;

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(x))
            .copied()
            .ok_or_else(|| Error::OutOfRange(format!("tuning strategy {x}")))
    }
}

impl fmt::Display for TuningStrategyId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TuningStrategyId::Simulated => "simulated",
            TuningStrategyId::PasswordEepromA => "password-eeprom-a",
            TuningStrategyId::PasswordEepromB => "password-eeprom-b",
            TuningStrategyId::SingleRegister => "single-register",
        };
        write!(f, "{s}")
    }
}

/// A transceiver-specific sequence for moving to a TWDM channel.
pub trait TuningStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// The wavelength code the transceiver uses for a channel.
    fn wavelength_code(&self, channel_id: u8) -> u8;

    fn commit_downstream(&self, eeprom: &dyn Eeprom, channel_id: u8) -> Result<(), Error>;

    fn commit_upstream(&self, eeprom: &dyn Eeprom, channel_id: u8) -> Result<(), Error>;

    /// Return `true` if the upstream channel must equal the last committed
    /// downstream channel.
    fn locks_upstream_to_downstream(&self) -> bool {
        false
    }
}

/// A strategy that only records what it was asked to do.
pub struct Simulated {
    log: Logger,
    last: Mutex<(Option<u8>, Option<u8>)>,
}

impl Simulated {
    pub fn new(log: Logger) -> Self {
        Self {
            log,
            last: Mutex::new((None, None)),
        }
    }

    /// The last committed downstream and upstream channels.
    pub fn last_committed(&self) -> (Option<u8>, Option<u8>) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TuningStrategy for Simulated {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn wavelength_code(&self, channel_id: u8) -> u8 {
        channel_id
    }

    fn commit_downstream(&self, _: &dyn Eeprom, channel_id: u8) -> Result<(), Error> {
        info!(self.log, "simulated downstream commit"; "channel_id" => channel_id);
        self.last.lock().unwrap_or_else(PoisonError::into_inner).0 = Some(channel_id);
        Ok(())
    }

    fn commit_upstream(&self, _: &dyn Eeprom, channel_id: u8) -> Result<(), Error> {
        info!(self.log, "simulated upstream commit"; "channel_id" => channel_id);
        self.last.lock().unwrap_or_else(PoisonError::into_inner).1 = Some(channel_id);
        Ok(())
    }
}

/// A strategy writing password-protected channel tables in A2h.
///
/// The vendor password unlocks the user area, a table select byte picks the
/// channel table, then the channel registers are written.
#[derive(Clone, Copy, Debug)]
pub struct PasswordEeprom {
    name: &'static str,
    password: [u8; 4],
    table: u8,
    downstream: u8,
    upstream: u8,
    // Written with 1 to latch the new values, for layouts that need it.
    commit: Option<u8>,
    // The downstream register is a big-endian 16-bit word.
    wide_downstream: bool,
    code: fn(u8) -> u8,
}

impl PasswordEeprom {
    const PASSWORD_OFFSET: u8 = 123;
    const TABLE_SELECT_OFFSET: u8 = 127;

    pub const LAYOUT_A: Self = Self {
        name: "password-eeprom-a",
        password: [0x00, 0x00, 0x10, 0x11],
        table: 0x02,
        downstream: 144,
        upstream: 146,
        commit: None,
        wide_downstream: true,
        code: |ch| ch.wrapping_add(1),
    };

    pub const LAYOUT_B: Self = Self {
        name: "password-eeprom-b",
        password: [0x80, 0x81, 0x82, 0x83],
        table: 0x90,
        downstream: 0xc0,
        upstream: 0xc1,
        commit: Some(0xc2),
        wide_downstream: false,
        code: |ch| 0x80 | ch,
    };

    fn unlock(&self, eeprom: &dyn Eeprom) -> Result<(), Error> {
        eeprom.write(Page::A2, Self::PASSWORD_OFFSET, &self.password)?;
        eeprom.write(Page::A2, Self::TABLE_SELECT_OFFSET, &[self.table])
    }

    fn latch(&self, eeprom: &dyn Eeprom) -> Result<(), Error> {
        match self.commit {
            Some(offset) => eeprom.write(Page::A2, offset, &[1]),
            None => Ok(()),
        }
    }
}

impl TuningStrategy for PasswordEeprom {
    fn name(&self) -> &'static str {
        self.name
    }

    fn wavelength_code(&self, channel_id: u8) -> u8 {
        (self.code)(channel_id)
    }

    fn commit_downstream(&self, eeprom: &dyn Eeprom, channel_id: u8) -> Result<(), Error> {
        self.unlock(eeprom)?;
        if self.wide_downstream {
            eeprom.write(
                Page::A2,
                self.downstream,
                &u16::from(channel_id).to_be_bytes(),
            )?;
        } else {
            eeprom.write(Page::A2, self.downstream, &[channel_id])?;
        }
        self.latch(eeprom)
    }

    fn commit_upstream(&self, eeprom: &dyn Eeprom, channel_id: u8) -> Result<(), Error> {
        self.unlock(eeprom)?;
        eeprom.write(Page::A2, self.upstream, &[self.wavelength_code(channel_id)])?;
        self.latch(eeprom)
    }
}

/// A strategy with a single channel register used for both directions.
#[derive(Clone, Copy, Debug)]
pub struct SingleRegister;

impl SingleRegister {
    const CHANNEL_OFFSET: u8 = 0xf0;
}

impl TuningStrategy for SingleRegister {
    fn name(&self) -> &'static str {
        "single-register"
    }

    fn wavelength_code(&self, channel_id: u8) -> u8 {
        channel_id
    }

    fn commit_downstream(&self, eeprom: &dyn Eeprom, channel_id: u8) -> Result<(), Error> {
        eeprom.write(Page::A2, Self::CHANNEL_OFFSET, &[channel_id])
    }

    // The downstream commit already moved both directions.
    fn commit_upstream(&self, _: &dyn Eeprom, _: u8) -> Result<(), Error> {
        Ok(())
    }

    fn locks_upstream_to_downstream(&self) -> bool {
        true
    }
}

/// Mediates TWDM wavelength requests from firmware.
pub struct Coordinator {
    log: Logger,
    channel_mask: u8,
    strategy: Box<dyn TuningStrategy>,
    eeprom: Arc<dyn Eeprom>,
    last_downstream: Mutex<Option<u8>>,
}

impl Coordinator {
    pub fn new(
        log: Logger,
        channel_mask: u8,
        strategy: Box<dyn TuningStrategy>,
        eeprom: Arc<dyn Eeprom>,
    ) -> Self {
        Self {
            log,
            channel_mask,
            strategy,
            eeprom,
            last_downstream: Mutex::new(None),
        }
    }

    pub fn strategy(&self) -> &dyn TuningStrategy {
        self.strategy.as_ref()
    }

    /// The last successfully committed downstream channel.
    pub fn last_downstream(&self) -> Option<u8> {
        *self
            .last_downstream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Check whether a channel may be used for an operation.
    ///
    /// This never changes any state.
    pub fn check(&self, operation: TwdmOperation, channel_id: u8) -> Result<(), Error> {
        if channel_id > MAX_CHANNEL_ID || self.channel_mask & (1u8 << channel_id) == 0 {
            return Err(Error::Unsupported(format!(
                "channel {channel_id} is not in mask {:#04x}",
                self.channel_mask
            )));
        }
        if !operation.is_downstream() && self.strategy.locks_upstream_to_downstream() {
            let last = self.last_downstream();
            if last != Some(channel_id) {
                return Err(Error::Unsupported(format!(
                    "upstream channel {channel_id} differs from downstream channel {last:?}"
                )));
            }
        }
        Ok(())
    }

    /// Move the transceiver to a channel.
    ///
    /// Callers must have passed [`Coordinator::check`] first.
    pub fn commit(&self, operation: TwdmOperation, channel_id: u8) -> Result<(), Error> {
        let eeprom = self.eeprom.as_ref();
        if operation.is_downstream() {
            self.strategy.commit_downstream(eeprom, channel_id)?;
            *self
                .last_downstream
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(channel_id);
        } else {
            self.strategy.commit_upstream(eeprom, channel_id)?;
        }
        info!(
            self.log,
            "committed TWDM channel";
            "operation" => %operation,
            "channel_id" => channel_id,
            "strategy" => self.strategy.name(),
        );
        Ok(())
    }

    /// Handle a wavelength check event.
    pub fn handle_check(&self, event: &InboundEvent) -> Result<Reply, Error> {
        let request: TwdmRequest = event.parse()?;
        let result = self.check(request.operation, request.channel_id);
        debug!(
            self.log,
            "TWDM check";
            "operation" => %request.operation,
            "channel_id" => request.channel_id,
            "result" => ?result,
        );
        result.map(|_| Reply::Ack(None))
    }

    /// Handle a wavelength config or tuning event.
    ///
    /// The request is checked again before anything is written.
    pub fn handle_execute(&self, event: &InboundEvent) -> Result<Reply, Error> {
        let request: TwdmRequest = event.parse()?;
        let tuning = request.operation == TwdmOperation::UpstreamTuning;
        if tuning != (event.event == Event::TwdmWavelengthTuning) {
            return Err(Error::OutOfRange(format!(
                "{} is not valid for {}",
                request.operation, event.event
            )));
        }
        self.check(request.operation, request.channel_id)?;
        self.commit(request.operation, request.channel_id)?;
        let code = self.strategy.wavelength_code(request.channel_id);
        Ok(Reply::Ack(Some(vec![code])))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::Coordinator;
    use super::PasswordEeprom;
    use super::SingleRegister;
    use super::TuningStrategy;
    use super::TuningStrategyId;
    use crate::eeprom::Eeprom;
    use crate::eeprom::MemoryEeprom;
    use crate::eeprom::Page;
    use crate::test_utils::test_logger;
    use crate::Error;
    use crate::ErrorKind;
    use pon_decode::TwdmOperation;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    /// A strategy counting its commits.
    #[derive(Default)]
    pub(crate) struct Counting {
        pub(crate) commits: Arc<AtomicUsize>,
    }

    impl TuningStrategy for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn wavelength_code(&self, channel_id: u8) -> u8 {
            channel_id
        }

        fn commit_downstream(&self, _: &dyn Eeprom, _: u8) -> Result<(), Error> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn commit_upstream(&self, _: &dyn Eeprom, _: u8) -> Result<(), Error> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn coordinator(mask: u8, strategy: Box<dyn TuningStrategy>) -> Coordinator {
        let log = test_logger();
        let eeprom = Arc::new(MemoryEeprom::new(log.clone()));
        Coordinator::new(log, mask, strategy, eeprom)
    }

    #[test]
    fn test_check_respects_mask() {
        let commits = Arc::new(AtomicUsize::new(0));
        let c = coordinator(
            0b1111_0111,
            Box::new(Counting {
                commits: commits.clone(),
            }),
        );
        let err = c.check(TwdmOperation::UpstreamConfig, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(c.check(TwdmOperation::UpstreamConfig, 2).is_ok());
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert_eq!(c.last_downstream(), None);
    }

    #[test]
    fn test_downstream_commit_updates_last_channel() {
        let c = coordinator(0xff, Box::new(Counting::default()));
        c.check(TwdmOperation::DownstreamConfig, 5).unwrap();
        assert_eq!(c.last_downstream(), None);
        c.commit(TwdmOperation::DownstreamConfig, 5).unwrap();
        assert_eq!(c.last_downstream(), Some(5));
        c.commit(TwdmOperation::UpstreamConfig, 2).unwrap();
        assert_eq!(c.last_downstream(), Some(5));
    }

    #[test]
    fn test_locked_upstream_must_match_downstream() {
        let c = coordinator(0xff, Box::new(SingleRegister));
        assert!(c.check(TwdmOperation::UpstreamTuning, 1).is_err());
        c.commit(TwdmOperation::DownstreamConfig, 1).unwrap();
        assert!(c.check(TwdmOperation::UpstreamTuning, 1).is_ok());
        let err = c.check(TwdmOperation::UpstreamConfig, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_password_eeprom_sequence() {
        let log = test_logger();
        let eeprom = MemoryEeprom::new(log);
        let strategy = PasswordEeprom::LAYOUT_A;
        strategy.commit_downstream(&eeprom, 3).unwrap();
        strategy.commit_upstream(&eeprom, 3).unwrap();
        let mut buf = [0u8; 4];
        eeprom.read(Page::A2, 123, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x00, 0x10, 0x11]);
        let mut buf = [0u8; 4];
        eeprom.read(Page::A2, 144, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x03, 0x04, 0x00]);

        let strategy = PasswordEeprom::LAYOUT_B;
        strategy.commit_upstream(&eeprom, 2).unwrap();
        let mut buf = [0u8; 3];
        eeprom.read(Page::A2, 0xc0, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x82, 0x01]);
    }

    #[test]
    fn test_strategy_ids() {
        let log = test_logger();
        for (i, id) in TuningStrategyId::ALL.iter().enumerate() {
            assert_eq!(TuningStrategyId::try_from(i as u8).unwrap(), *id);
            assert_eq!(id.build(&log).name(), id.to_string());
        }
        assert!(TuningStrategyId::try_from(4).is_err());
        let json = serde_json::to_string(&TuningStrategyId::PasswordEepromB).unwrap();
        assert_eq!(json, r#""password-eeprom-b""#);
    }
}
