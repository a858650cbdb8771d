//! Daily Light Integral
//!
//! DLI is the photosynthetic photon dose delivered over a day, in mol/m²/d.
//! Illuminance is converted to PPFD (µmol/m²/s) with a spectrum-dependent
//! factor, and PPFD integrated over time gives DLI.

use chrono::{DateTime, NaiveDate, Utc};

/// µmol/m²/s per lux for typical daylight
pub const LUX_TO_PPFD: f64 = 0.0185;

/// Hours of constant illumination assumed when converting a bound to DLI
pub const DEFAULT_DLI_HOURS: f64 = 24.0;

pub const UNIT_DLI: &str = "mol/m²/d";
pub const ICON_DLI: &str = "mdi:counter";

const MICRO: f64 = 1e-6;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// PPFD for an illuminance; negative illuminance yields 0
pub fn lux_to_ppfd(lux: f64, factor: f64) -> Option<f64> {
    if !lux.is_finite() {
        return None;
    }
    Some(lux.max(0.0) * factor)
}

/// DLI of a PPFD held constant for `hours`
pub fn ppfd_to_dli(ppfd: f64, hours: f64) -> Option<f64> {
    if !ppfd.is_finite() || !hours.is_finite() {
        return None;
    }
    Some(ppfd.max(0.0) * hours * SECONDS_PER_HOUR * MICRO)
}

/// DLI of an illuminance held constant for `hours`
pub fn lux_to_dli(lux: f64, factor: f64, hours: f64) -> Option<f64> {
    lux_to_ppfd(lux, factor).and_then(|ppfd| ppfd_to_dli(ppfd, hours))
}

/// Integrates PPFD readings into the DLI of the current UTC day
///
/// The total resets on the first reading of a new day. A reading older than
/// the previous one only moves the clock.
#[derive(Debug, Clone, Default)]
pub struct DliAccumulator {
    accumulated: f64,
    last_update: Option<DateTime<Utc>>,
    current_day: Option<NaiveDate>,
}

impl DliAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, day: NaiveDate) {
        self.accumulated = 0.0;
        self.last_update = None;
        self.current_day = Some(day);
    }

    /// Add a reading taken at `at`; returns the day's total so far
    pub fn update(&mut self, ppfd: f64, at: DateTime<Utc>) -> f64 {
        let day = at.date_naive();
        if self.current_day != Some(day) {
            self.reset(day);
        }

        let Some(last) = self.last_update.replace(at) else {
            return self.accumulated;
        };

        let elapsed = (at - last).num_milliseconds() as f64 / 1000.0;
        if elapsed > 0.0 && ppfd.is_finite() && ppfd > 0.0 {
            self.accumulated += ppfd * elapsed * MICRO;
        }
        self.accumulated
    }

    pub fn dli(&self) -> f64 {
        self.accumulated
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Restore a total, e.g. after a restart; negative values become 0
    pub fn set_dli(&mut self, dli: f64) {
        self.accumulated = if dli.is_finite() { dli.max(0.0) } else { 0.0 };
    }
}
