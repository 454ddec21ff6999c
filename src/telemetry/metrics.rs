use crate::config::types::Calibration;
use crate::error::SampleError;
use crate::telemetry::decoder::RawSample;

const VOLTAGE_CHANNEL: usize = 0;
const POWER_CHANNEL: usize = 2;
const CURRENT_CHANNEL: usize = 3;

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Whether the inverter is feeding the grid or running stand-alone on its battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridMode {
    GridConnected,
    UpsStandAlone,
}

/// Display values derived from one complete sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedMetrics {
    /// Clamped to the calibrated maximum, one decimal
    pub voltage: f64,
    pub voltage_percent: f64,
    /// Clamped to the calibrated maximum, one decimal
    pub power: f64,
    pub power_percent: f64,
    /// Raw value of the fourth channel
    pub current: f64,
    /// 0..=100, one decimal
    pub efficiency_percent: f64,
}

impl DerivedMetrics {
    pub fn grid_mode(&self) -> GridMode {
        if self.voltage > 0.0 { GridMode::GridConnected } else { GridMode::UpsStandAlone }
    }
}

pub struct MetricDeriver {
    calibration: Calibration,
}

impl MetricDeriver {
    pub fn new(calibration: Calibration) -> Self {
        MetricDeriver { calibration }
    }

    /// Derive display metrics. Samples with fewer than 4 channels produce no metrics at all.
    pub fn derive(&self, sample: &RawSample) -> Result<DerivedMetrics, SampleError> {
        sample.check_complete()?;

        let channels = sample.channels();
        let v = channels[VOLTAGE_CHANNEL];
        let p = channels[POWER_CHANNEL];
        let c = channels[CURRENT_CHANNEL];

        Ok(DerivedMetrics {
            voltage: round_one_decimal(v.min(self.calibration.voltage_max)),
            voltage_percent: self.voltage_percent(v),
            power: round_one_decimal(p.min(self.calibration.power_max)),
            power_percent: self.power_percent(p),
            current: c,
            efficiency_percent: round_one_decimal(self.efficiency_percent(v, c)),
        })
    }

    pub fn voltage_percent(&self, v: f64) -> f64 {
        let max = self.calibration.voltage_max;
        if v > max { 100.0 } else { v / max * 100.0 }
    }

    pub fn power_percent(&self, p: f64) -> f64 {
        let max = self.calibration.power_max;
        if p > max { 100.0 } else { p / max * 100.0 }
    }

    pub fn efficiency_percent(&self, v: f64, c: f64) -> f64 {
        if v == 0.0 {
            0.0
        }
        else if v <= self.calibration.efficiency_breakpoint {
            (c / v * 100.0).min(100.0)
        }
        else {
            (c / self.calibration.voltage_max * 100.0).min(100.0)
        }
    }
}

/// Mean of every channel-4 value seen during the session, not windowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CumulativeAverage {
    sum: f64,
    count: u64,
}

impl CumulativeAverage {
    pub fn new() -> Self {
        CumulativeAverage::default()
    }

    pub fn add(&mut self, value: f64) -> f64 {
        self.sum += value;
        self.count += 1;
        self.sum / self.count as f64
    }

    pub fn average(&self) -> Option<f64> {
        if self.count == 0 { None } else { Some(self.sum / self.count as f64) }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = CumulativeAverage::default();
    }
}
