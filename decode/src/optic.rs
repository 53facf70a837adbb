// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Decode SFF-8472 optical diagnostics and alarm thresholds.
//!
//! Both live in the A2h page of the transceiver EEPROM. All values are
//! internally calibrated, big-endian 16-bit words.

use crate::utils::check_len;
use crate::utils::decode_with_scale;
use crate::utils::encode_with_scale;
use crate::utils::word;
use crate::Error;

// Scale factors, see SFF-8472 rev 12.4 section 9.2.
const TEMPERATURE_SCALE: f32 = 1.0 / 256.0; // degrees C
const VOLTAGE_SCALE: f32 = 1e-4; // Volts
const BIAS_SCALE: f32 = 2e-3; // milliamps
const POWER_SCALE: f32 = 1e-4; // milliwatts

/// Measured optical levels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(
    any(feature = "api-traits", test),
    derive(serde::Deserialize, serde::Serialize, schemars::JsonSchema)
)]
pub struct OpticalLevels {
    /// Module temperature (degrees C).
    pub temperature: f32,
    /// Supply voltage (Volts).
    pub supply_voltage: f32,
    /// Laser bias current (milliamps).
    pub tx_bias: f32,
    /// Transmitted optical power (milliwatts).
    pub tx_power: f32,
    /// Received optical power (milliwatts).
    pub rx_power: f32,
}

impl OpticalLevels {
    /// The offset of the measurements in page A2h.
    pub const OFFSET: u8 = 96;
    pub const SIZE: usize = 10;

    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        check_len(buf, Self::SIZE)?;
        Ok(Self {
            temperature: decode_with_scale::<i16>(word(buf, 0)?, TEMPERATURE_SCALE),
            supply_voltage: decode_with_scale::<u16>(word(buf, 2)?, VOLTAGE_SCALE),
            tx_bias: decode_with_scale::<u16>(word(buf, 4)?, BIAS_SCALE),
            tx_power: decode_with_scale::<u16>(word(buf, 6)?, POWER_SCALE),
            rx_power: decode_with_scale::<u16>(word(buf, 8)?, POWER_SCALE),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&encode_with_scale::<i16>(self.temperature, TEMPERATURE_SCALE));
        out[2..4].copy_from_slice(&encode_with_scale::<u16>(self.supply_voltage, VOLTAGE_SCALE));
        out[4..6].copy_from_slice(&encode_with_scale::<u16>(self.tx_bias, BIAS_SCALE));
        out[6..8].copy_from_slice(&encode_with_scale::<u16>(self.tx_power, POWER_SCALE));
        out[8..10].copy_from_slice(&encode_with_scale::<u16>(self.rx_power, POWER_SCALE));
        out
    }
}

/// Alarm and warning limits for one measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(
    any(feature = "api-traits", test),
    derive(serde::Deserialize, serde::Serialize, schemars::JsonSchema)
)]
pub struct Thresholds {
    pub high_alarm: f32,
    pub low_alarm: f32,
    pub high_warning: f32,
    pub low_warning: f32,
}

impl Thresholds {
    fn parse<T: crate::utils::Scalable>(buf: &[u8], scale: f32) -> Result<Self, Error> {
        Ok(Self {
            high_alarm: decode_with_scale::<T>(word(buf, 0)?, scale),
            low_alarm: decode_with_scale::<T>(word(buf, 2)?, scale),
            high_warning: decode_with_scale::<T>(word(buf, 4)?, scale),
            low_warning: decode_with_scale::<T>(word(buf, 6)?, scale),
        })
    }

    fn write<T: crate::utils::Scalable>(&self, out: &mut [u8], scale: f32) {
        out[0..2].copy_from_slice(&encode_with_scale::<T>(self.high_alarm, scale));
        out[2..4].copy_from_slice(&encode_with_scale::<T>(self.low_alarm, scale));
        out[4..6].copy_from_slice(&encode_with_scale::<T>(self.high_warning, scale));
        out[6..8].copy_from_slice(&encode_with_scale::<T>(self.low_warning, scale));
    }

    // Return the 4 alarm bits of `value`, in `OpticAlarms` order.
    fn check(&self, value: f32) -> u32 {
        u32::from(value > self.high_alarm)
            | u32::from(value < self.low_alarm) << 1
            | u32::from(value > self.high_warning) << 2
            | u32::from(value < self.low_warning) << 3
    }
}

/// Alarm and warning limits for all optical measurements.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(
    any(feature = "api-traits", test),
    derive(serde::Deserialize, serde::Serialize, schemars::JsonSchema)
)]
pub struct AlarmThresholds {
    pub temperature: Thresholds,
    pub supply_voltage: Thresholds,
    pub tx_bias: Thresholds,
    pub tx_power: Thresholds,
    pub rx_power: Thresholds,
}

impl AlarmThresholds {
    /// The offset of the thresholds in page A2h.
    pub const OFFSET: u8 = 0;
    pub const SIZE: usize = 40;

    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        check_len(buf, Self::SIZE)?;
        Ok(Self {
            temperature: Thresholds::parse::<i16>(&buf[0..8], TEMPERATURE_SCALE)?,
            supply_voltage: Thresholds::parse::<u16>(&buf[8..16], VOLTAGE_SCALE)?,
            tx_bias: Thresholds::parse::<u16>(&buf[16..24], BIAS_SCALE)?,
            tx_power: Thresholds::parse::<u16>(&buf[24..32], POWER_SCALE)?,
            rx_power: Thresholds::parse::<u16>(&buf[32..40], POWER_SCALE)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        self.temperature.write::<i16>(&mut out[0..8], TEMPERATURE_SCALE);
        self.supply_voltage.write::<u16>(&mut out[8..16], VOLTAGE_SCALE);
        self.tx_bias.write::<u16>(&mut out[16..24], BIAS_SCALE);
        self.tx_power.write::<u16>(&mut out[24..32], POWER_SCALE);
        self.rx_power.write::<u16>(&mut out[32..40], POWER_SCALE);
        out
    }

    /// Compare `levels` against the thresholds.
    pub fn evaluate(&self, levels: &OpticalLevels) -> OpticAlarms {
        let bits = self.temperature.check(levels.temperature)
            | self.supply_voltage.check(levels.supply_voltage) << 4
            | self.tx_bias.check(levels.tx_bias) << 8
            | self.tx_power.check(levels.tx_power) << 12
            | self.rx_power.check(levels.rx_power) << 16;
        OpticAlarms::from_bits_truncate(bits)
    }
}

bitflags::bitflags! {
    /// Optical level alarms and warnings.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct OpticAlarms: u32 {
        const TEMPERATURE_HIGH_ALARM = 1 << 0;
        const TEMPERATURE_LOW_ALARM = 1 << 1;
        const TEMPERATURE_HIGH_WARNING = 1 << 2;
        const TEMPERATURE_LOW_WARNING = 1 << 3;
        const VOLTAGE_HIGH_ALARM = 1 << 4;
        const VOLTAGE_LOW_ALARM = 1 << 5;
        const VOLTAGE_HIGH_WARNING = 1 << 6;
        const VOLTAGE_LOW_WARNING = 1 << 7;
        const BIAS_HIGH_ALARM = 1 << 8;
        const BIAS_LOW_ALARM = 1 << 9;
        const BIAS_HIGH_WARNING = 1 << 10;
        const BIAS_LOW_WARNING = 1 << 11;
        const TX_POWER_HIGH_ALARM = 1 << 12;
        const TX_POWER_LOW_ALARM = 1 << 13;
        const TX_POWER_HIGH_WARNING = 1 << 14;
        const TX_POWER_LOW_WARNING = 1 << 15;
        const RX_POWER_HIGH_ALARM = 1 << 16;
        const RX_POWER_LOW_ALARM = 1 << 17;
        const RX_POWER_HIGH_WARNING = 1 << 18;
        const RX_POWER_LOW_WARNING = 1 << 19;
    }
}

#[cfg(test)]
mod tests {
    use super::AlarmThresholds;
    use super::OpticAlarms;
    use super::OpticalLevels;
    use super::Thresholds;

    fn thresholds() -> AlarmThresholds {
        let t = |high_alarm, low_alarm, high_warning, low_warning| Thresholds {
            high_alarm,
            low_alarm,
            high_warning,
            low_warning,
        };
        AlarmThresholds {
            temperature: t(85.0, -40.0, 75.0, -30.0),
            supply_voltage: t(3.6, 3.0, 3.5, 3.1),
            tx_bias: t(80.0, 2.0, 70.0, 4.0),
            tx_power: t(2.0, 0.1, 1.5, 0.2),
            rx_power: t(1.0, 0.001, 0.5, 0.002),
        }
    }

    #[test]
    fn test_parse_levels() {
        // 25.5 C, 3.3 V, 10 mA, 1 mW, 0.1 mW
        let buf = [0x19, 0x80, 0x80, 0xe8, 0x13, 0x88, 0x27, 0x10, 0x03, 0xe8];
        let levels = OpticalLevels::parse(&buf).unwrap();
        assert_eq!(levels.temperature, 25.5);
        assert!((levels.supply_voltage - 3.3).abs() < 1e-4);
        assert!((levels.tx_bias - 10.0).abs() < 1e-3);
        assert!((levels.tx_power - 1.0).abs() < 1e-4);
        assert!((levels.rx_power - 0.1).abs() < 1e-4);
        assert_eq!(levels.to_bytes(), buf);
    }

    #[test]
    fn test_parse_thresholds_roundtrip() {
        let expected = thresholds();
        let parsed = AlarmThresholds::parse(&expected.to_bytes()).unwrap();
        assert_eq!(parsed.temperature, expected.temperature);
        assert!((parsed.rx_power.low_alarm - 0.001).abs() < 1e-4);
        assert!(AlarmThresholds::parse(&[0; 39]).is_err());
    }

    #[test]
    fn test_evaluate() {
        let t = thresholds();
        let nominal = OpticalLevels {
            temperature: 40.0,
            supply_voltage: 3.3,
            tx_bias: 20.0,
            tx_power: 1.0,
            rx_power: 0.1,
        };
        assert_eq!(t.evaluate(&nominal), OpticAlarms::empty());

        let hot_and_dark = OpticalLevels {
            temperature: 90.0,
            rx_power: 0.0,
            ..nominal
        };
        assert_eq!(
            t.evaluate(&hot_and_dark),
            OpticAlarms::TEMPERATURE_HIGH_ALARM
                | OpticAlarms::TEMPERATURE_HIGH_WARNING
                | OpticAlarms::RX_POWER_LOW_ALARM
                | OpticAlarms::RX_POWER_LOW_WARNING
        );
    }
}
