use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Device calibration constants. The defaults match the 220V / 3100W inverter model.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Calibration {
    /// Voltage at which the voltage gauge reads 100%
    pub voltage_max: f64,
    /// Above this voltage the efficiency is computed against `voltage_max` instead of the
    /// measured voltage
    pub efficiency_breakpoint: f64,
    /// Power at which the power gauge reads 100%
    pub power_max: f64,
}

impl Calibration {
    /// Every maximum is a divisor of a gauge value, so it has to be a positive number.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("calibration.voltageMax", self.voltage_max),
            ("calibration.efficiencyBreakpoint", self.efficiency_breakpoint),
            ("calibration.powerMax", self.power_max),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidValue { field, value: value.to_string() });
            }
        }
        Ok(())
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            voltage_max: 220.0,
            efficiency_breakpoint: 220.1,
            power_max: 3100.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingConfig {
    pub elapsed_tick_millis: u64,
    pub processing_tick_millis: u64,
    /// Length of one aggregation window, each window becomes one chart point
    pub window_millis: u64,
}

impl TimingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("timing.elapsedTickMillis", self.elapsed_tick_millis),
            ("timing.processingTickMillis", self.processing_tick_millis),
            ("timing.windowMillis", self.window_millis),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue { field, value: value.to_string() });
            }
        }
        Ok(())
    }

    pub fn elapsed_tick(&self) -> Duration {
        Duration::from_millis(self.elapsed_tick_millis)
    }

    pub fn processing_tick(&self) -> Duration {
        Duration::from_millis(self.processing_tick_millis)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            elapsed_tick_millis: 1_000,
            processing_tick_millis: 10_000,
            window_millis: 3_600_000,
        }
    }
}

/// Display hints handed to the chart renderer together with the points.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartConfig {
    pub visible_hours: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub bar_width: f64,
}

impl Default for ChartConfig {
    fn default() -> Self {
        ChartConfig {
            visible_hours: 10.0,
            y_min: 0.0,
            y_max: 600.0,
            bar_width: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub calibration: Calibration,
    pub timing: TimingConfig,
    pub chart: ChartConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calibration.validate()?;
        self.timing.validate()
    }
}
