// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Optical alarm evaluation, driven by PLOAM state.

use crate::eeprom::Eeprom;
use crate::eeprom::Page;
use crate::handlers::Slot;
use crate::Error;
use pon_decode::AlarmThresholds;
use pon_decode::OpticAlarms;
use pon_decode::OpticalLevels;
use pon_decode::PloamStateChange;
use slog::debug;
use slog::trace;
use slog::warn;
use slog::Logger;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// The result of one optical alarm evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlarmReport {
    pub levels: OpticalLevels,
    /// Every alarm currently asserted.
    pub active: OpticAlarms,
    /// Alarms asserted by this evaluation.
    ///
    /// For a forced evaluation this is every active alarm.
    pub raised: OpticAlarms,
    /// Alarms deasserted by this evaluation.
    pub cleared: OpticAlarms,
    /// `true` if the evaluation was forced by entering the operational band.
    pub forced: bool,
}

#[derive(Debug, Default)]
struct AlarmRecord {
    thresholds: Option<AlarmThresholds>,
    active: OpticAlarms,
}

/// Alarm state shared between the event listener and the sampler.
#[derive(Default)]
pub(crate) struct AlarmState {
    record: Mutex<AlarmRecord>,
    operational: AtomicBool,
    rechecks: AtomicU64,
    recheck: Notify,
    pub(crate) callback: Slot<dyn Fn(&AlarmReport) + Send + Sync>,
}

impl AlarmState {
    /// Track a PLOAM state change.
    ///
    /// Returns `true` if the change entered the operational band, in which
    /// case a forced re-evaluation has been requested.
    pub(crate) fn observe_ploam(&self, change: &PloamStateChange) -> bool {
        self.operational
            .store(change.current_main().is_operational(), Ordering::SeqCst);
        if change.enters_operation() {
            self.rechecks.fetch_add(1, Ordering::SeqCst);
            self.recheck.notify_one();
            true
        } else {
            false
        }
    }

    /// The number of forced re-evaluations requested so far.
    pub(crate) fn rechecks(&self) -> u64 {
        self.rechecks.load(Ordering::SeqCst)
    }

    pub(crate) fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    pub(crate) fn set_thresholds(&self, thresholds: AlarmThresholds) {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .thresholds = Some(thresholds);
    }

    pub(crate) fn thresholds(&self) -> Option<AlarmThresholds> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .thresholds
    }

    // Store thresholds read from the transceiver, unless some were set in
    // the meantime.
    fn load_thresholds(&self, thresholds: AlarmThresholds) {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .thresholds
            .get_or_insert(thresholds);
    }

    /// Compare `levels` against the thresholds and update the active set.
    ///
    /// Returns a report if anything changed, or if `forced`.
    pub(crate) fn evaluate(&self, levels: OpticalLevels, forced: bool) -> Option<AlarmReport> {
        let (active, previous) = {
            let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
            let active = record.thresholds?.evaluate(&levels);
            (active, std::mem::replace(&mut record.active, active))
        };
        let raised = if forced { active } else { active - previous };
        let cleared = previous - active;
        if forced || !raised.is_empty() || !cleared.is_empty() {
            Some(AlarmReport {
                levels,
                active,
                raised,
                cleared,
                forced,
            })
        } else {
            None
        }
    }
}

/// Periodically samples optical levels from the transceiver EEPROM.
pub(crate) struct AlarmSampler {
    log: Logger,
    state: Arc<AlarmState>,
    eeprom: Arc<dyn Eeprom>,
    interval: Duration,
    cancel: CancellationToken,
}

impl AlarmSampler {
    pub(crate) fn new(
        log: Logger,
        state: Arc<AlarmState>,
        eeprom: Arc<dyn Eeprom>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            log,
            state,
            eeprom,
            interval,
            cancel,
        }
    }

    // EEPROM access may block on the bus, so it runs off the async workers.
    fn read_levels(
        eeprom: &dyn Eeprom,
        load_thresholds: bool,
    ) -> Result<(Option<AlarmThresholds>, OpticalLevels), Error> {
        let thresholds = if load_thresholds {
            let mut buf = [0u8; AlarmThresholds::SIZE];
            eeprom.read(Page::A2, AlarmThresholds::OFFSET, &mut buf)?;
            Some(AlarmThresholds::parse(&buf)?)
        } else {
            None
        };
        let mut buf = [0u8; OpticalLevels::SIZE];
        eeprom.read(Page::A2, OpticalLevels::OFFSET, &mut buf)?;
        Ok((thresholds, OpticalLevels::parse(&buf)?))
    }

    async fn sample(&self, forced: bool) -> Result<(), Error> {
        let eeprom = self.eeprom.clone();
        let load_thresholds = self.state.thresholds().is_none();
        let (thresholds, levels) =
            tokio::task::spawn_blocking(move || Self::read_levels(&*eeprom, load_thresholds))
                .await
                .map_err(std::io::Error::from)??;
        if let Some(thresholds) = thresholds {
            self.state.load_thresholds(thresholds);
        }
        trace!(self.log, "sampled optical levels"; "levels" => ?levels);

        let Some(report) = self.state.evaluate(levels, forced) else {
            return Ok(());
        };
        debug!(
            self.log,
            "optical alarms changed";
            "active" => ?report.active,
            "raised" => ?report.raised,
            "cleared" => ?report.cleared,
            "forced" => forced,
        );
        if let Some(callback) = self.state.callback.get() {
            callback(&report);
        }
        Ok(())
    }

    /// Sample until cancelled.
    ///
    /// Periodic samples are skipped outside the operational band. Forced
    /// re-evaluations always run.
    pub(crate) async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            let forced = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(self.log, "cancelled, exiting alarm sampler");
                    return;
                }
                _ = self.state.recheck.notified() => true,
                _ = ticker.tick() => false,
            };
            if !forced && !self.state.is_operational() {
                continue;
            }
            if let Err(e) = self.sample(forced).await {
                warn!(self.log, "failed to sample optical levels"; "reason" => ?e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AlarmReport;
    use super::AlarmSampler;
    use super::AlarmState;
    use crate::eeprom::Eeprom;
    use crate::eeprom::MemoryEeprom;
    use crate::eeprom::Page;
    use crate::test_utils::test_logger;
    use pon_decode::AlarmThresholds;
    use pon_decode::OpticAlarms;
    use pon_decode::OpticalLevels;
    use pon_decode::PloamStateChange;
    use pon_decode::Thresholds;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn change(previous: u16, current: u16) -> PloamStateChange {
        PloamStateChange {
            previous,
            current,
            timestamp: 0,
        }
    }

    fn thresholds() -> AlarmThresholds {
        let wide = Thresholds {
            high_alarm: 6.0,
            low_alarm: 0.0,
            high_warning: 6.0,
            low_warning: 0.0,
        };
        AlarmThresholds {
            temperature: Thresholds {
                high_alarm: 70.0,
                low_alarm: -5.0,
                high_warning: 65.0,
                low_warning: 0.0,
            },
            supply_voltage: wide,
            tx_bias: Thresholds {
                high_alarm: 100.0,
                high_warning: 90.0,
                ..wide
            },
            tx_power: wide,
            rx_power: wide,
        }
    }

    fn levels(temperature: f32) -> OpticalLevels {
        OpticalLevels {
            temperature,
            supply_voltage: 3.3,
            tx_bias: 10.0,
            tx_power: 1.0,
            rx_power: 0.5,
        }
    }

    #[test]
    fn test_entering_operation_requests_one_recheck() {
        let state = AlarmState::default();
        assert!(state.observe_ploam(&change(40, 50)));
        assert_eq!(state.rechecks(), 1);
        assert!(state.is_operational());
        assert!(!state.observe_ploam(&change(50, 51)));
        assert_eq!(state.rechecks(), 1);
        assert!(!state.observe_ploam(&change(51, 60)));
        assert!(!state.is_operational());
    }

    #[test]
    fn test_evaluate_reports_edges() {
        let state = AlarmState::default();
        assert!(state.evaluate(levels(25.0), false).is_none());
        state.set_thresholds(thresholds());

        assert!(state.evaluate(levels(25.0), false).is_none());
        let report = state.evaluate(levels(80.0), false).unwrap();
        assert_eq!(
            report.raised,
            OpticAlarms::TEMPERATURE_HIGH_ALARM | OpticAlarms::TEMPERATURE_HIGH_WARNING
        );
        assert!(report.cleared.is_empty());
        assert!(state.evaluate(levels(80.0), false).is_none());

        let report = state.evaluate(levels(80.0), true).unwrap();
        assert!(report.forced);
        assert_eq!(report.raised, report.active);

        let report = state.evaluate(levels(25.0), false).unwrap();
        assert!(report.active.is_empty());
        assert_eq!(
            report.cleared,
            OpticAlarms::TEMPERATURE_HIGH_ALARM | OpticAlarms::TEMPERATURE_HIGH_WARNING
        );
    }

    #[tokio::test]
    async fn test_sampler_runs_forced_recheck() {
        let log = test_logger();
        let eeprom = Arc::new(MemoryEeprom::new(log.clone()));
        eeprom
            .write(Page::A2, AlarmThresholds::OFFSET, &thresholds().to_bytes())
            .unwrap();
        eeprom
            .write(Page::A2, OpticalLevels::OFFSET, &levels(80.0).to_bytes())
            .unwrap();

        let state = Arc::new(AlarmState::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<AlarmReport>();
        state.callback.replace(Some(Arc::new(move |report: &AlarmReport| {
            let _ = tx.send(*report);
        })));

        let cancel = CancellationToken::new();
        let sampler = AlarmSampler::new(
            log,
            state.clone(),
            eeprom,
            Duration::from_secs(3600),
            cancel.clone(),
        );
        let task = tokio::spawn(sampler.run());

        state.observe_ploam(&change(40, 50));
        let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(report.forced);
        assert_eq!(
            report.active,
            OpticAlarms::TEMPERATURE_HIGH_ALARM | OpticAlarms::TEMPERATURE_HIGH_WARNING
        );
        assert!(state.thresholds().is_some());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();
    }
}
