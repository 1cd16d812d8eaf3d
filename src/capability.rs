use crate::protocol::{CapabilityTable, ModeCapability};
use crate::types::{HvacMode, RemoMode};

const ACCEPTED_STEPS: [f64; 2] = [1.0, 0.5];
const DEFAULT_STEP: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Default for TemperatureRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            step: DEFAULT_STEP,
        }
    }
}

impl TemperatureRange {
    /// Derives the range from the vendor's list of selectable temperatures.
    ///
    /// Empty entries are dropped. The step is taken from the gap between the
    /// first two values and only trusted when it is 1 or 0.5; anything else
    /// falls back to 1. This assumes an evenly spaced list and does not try
    /// to detect arbitrary progressions.
    pub fn resolve(temps: &[String]) -> Self {
        let values: Vec<f64> = temps
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .filter_map(|t| t.parse().ok())
            .collect();

        if values.is_empty() {
            return Self::default();
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let step = match values.as_slice() {
            [first, second, ..] => {
                let gap = ((second - first) * 10.0).round() / 10.0;
                if ACCEPTED_STEPS.contains(&gap) {
                    gap
                } else {
                    DEFAULT_STEP
                }
            }
            _ => DEFAULT_STEP,
        };

        Self { min, max, step }
    }
}

/// Capabilities of the currently selected mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModeCapabilities {
    pub range: TemperatureRange,
    pub fan_modes: Vec<String>,
    pub swing_modes: Vec<String>,
}

impl ModeCapabilities {
    pub fn resolve(table: &CapabilityTable, mode: Option<RemoMode>) -> Self {
        match mode.and_then(|m| table.get(&m)) {
            Some(entry) => Self::from_entry(entry),
            None => Self::default(),
        }
    }

    fn from_entry(entry: &ModeCapability) -> Self {
        Self {
            range: TemperatureRange::resolve(&entry.temp),
            fan_modes: entry.vol.clone(),
            swing_modes: entry.dir.clone(),
        }
    }
}

/// Modes the unit reports, plus `Off` which every unit supports.
pub fn supported_hvac_modes(table: &CapabilityTable) -> Vec<HvacMode> {
    let mut modes: Vec<HvacMode> = table
        .keys()
        .filter(|m| !m.is_power_off())
        .map(|m| m.to_hvac())
        .collect();
    modes.push(HvacMode::Off);
    modes
}
