use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::command::AirconCommand;

/// Generic climate mode as seen by the home-automation host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HvacMode {
    Auto,
    FanOnly,
    Cool,
    Dry,
    Heat,
    Off,
}

impl HvacMode {
    pub const ALL: [HvacMode; 6] = [
        HvacMode::Auto,
        HvacMode::FanOnly,
        HvacMode::Cool,
        HvacMode::Dry,
        HvacMode::Heat,
        HvacMode::Off,
    ];

    pub fn to_remo(self) -> RemoMode {
        match self {
            HvacMode::Auto => RemoMode::Auto,
            HvacMode::FanOnly => RemoMode::Blow,
            HvacMode::Cool => RemoMode::Cool,
            HvacMode::Dry => RemoMode::Dry,
            HvacMode::Heat => RemoMode::Warm,
            HvacMode::Off => RemoMode::PowerOff,
        }
    }
}

/// Vendor mode vocabulary. `PowerOff` is the momentary "turn off" button,
/// never an entry of the capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoMode {
    Auto,
    Blow,
    Cool,
    Dry,
    Warm,
    #[serde(rename = "power-off")]
    PowerOff,
}

impl RemoMode {
    pub const ALL: [RemoMode; 6] = [
        RemoMode::Auto,
        RemoMode::Blow,
        RemoMode::Cool,
        RemoMode::Dry,
        RemoMode::Warm,
        RemoMode::PowerOff,
    ];

    pub fn to_hvac(self) -> HvacMode {
        match self {
            RemoMode::Auto => HvacMode::Auto,
            RemoMode::Blow => HvacMode::FanOnly,
            RemoMode::Cool => HvacMode::Cool,
            RemoMode::Dry => HvacMode::Dry,
            RemoMode::Warm => HvacMode::Heat,
            RemoMode::PowerOff => HvacMode::Off,
        }
    }

    pub fn as_remo_str(&self) -> &'static str {
        match self {
            RemoMode::Auto => "auto",
            RemoMode::Blow => "blow",
            RemoMode::Cool => "cool",
            RemoMode::Dry => "dry",
            RemoMode::Warm => "warm",
            RemoMode::PowerOff => "power-off",
        }
    }

    pub fn from_remo_str(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(RemoMode::Auto),
            "blow" => Some(RemoMode::Blow),
            "cool" => Some(RemoMode::Cool),
            "dry" => Some(RemoMode::Dry),
            "warm" => Some(RemoMode::Warm),
            "power-off" => Some(RemoMode::PowerOff),
            _ => None,
        }
    }

    pub fn is_power_off(&self) -> bool {
        matches!(self, RemoMode::PowerOff)
    }

    /// Target staged when switching into this mode with no remembered value.
    pub fn default_temperature(&self) -> Option<f64> {
        match self {
            RemoMode::PowerOff => None,
            _ => Some(23.0),
        }
    }
}

impl fmt::Display for RemoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_remo_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    #[serde(rename = "c")]
    Celsius,
    #[serde(rename = "f")]
    Fahrenheit,
}

impl FromStr for TemperatureUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" => Ok(TemperatureUnit::Celsius),
            "f" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(format!("unknown temperature unit: {other}")),
        }
    }
}

/// Formats a target temperature the way the aircon endpoint accepts it:
/// whole numbers without a fractional part. Callers reject non-finite values.
pub fn format_temperature(value: f64) -> String {
    // f64's Display prints 24.0 as "24" and never uses exponent notation.
    format!("{value}")
}

/// A user command. Every field is optional; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClimateRequest {
    pub temperature: Option<f64>,
    pub hvac_mode: Option<HvacMode>,
    pub fan_mode: Option<String>,
    pub swing_mode: Option<String>,
}

impl ClimateRequest {
    pub fn temperature(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }

    pub fn hvac_mode(mode: HvacMode) -> Self {
        Self {
            hvac_mode: Some(mode),
            ..Default::default()
        }
    }

    pub fn fan_mode(mode: impl Into<String>) -> Self {
        Self {
            fan_mode: Some(mode.into()),
            ..Default::default()
        }
    }

    pub fn swing_mode(mode: impl Into<String>) -> Self {
        Self {
            swing_mode: Some(mode.into()),
            ..Default::default()
        }
    }
}

/// Observable climate surface of one appliance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClimateState {
    pub appliance_id: String,
    pub name: String,
    pub hvac_mode: Option<HvacMode>,
    pub hvac_modes: Vec<HvacMode>,
    pub target_temperature: Option<f64>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub target_temperature_step: f64,
    pub fan_mode: Option<String>,
    pub fan_modes: Vec<String>,
    pub swing_mode: Option<String>,
    pub swing_modes: Vec<String>,
    pub current_temperature: Option<f64>,
    pub current_humidity: Option<f64>,
    pub temperature_unit: TemperatureUnit,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Attributes the host persists and hands back on restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoredAttributes {
    #[serde(default, deserialize_with = "temperature_map")]
    pub previous_target_temperature: BTreeMap<RemoMode, f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// Older hosts persisted the raw settings strings ("25"), newer ones numbers.
fn temperature_map<'de, D>(deserializer: D) -> Result<BTreeMap<RemoMode, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    let raw: BTreeMap<RemoMode, NumberOrString> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(mode, value)| match value {
            NumberOrString::Number(n) => Some((mode, n)),
            NumberOrString::String(s) => s.trim().parse().ok().map(|n| (mode, n)),
        })
        .collect())
}

/// Events emitted when the observable state of an appliance changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ModeChanged { mode: Option<HvacMode> },
    TargetTemperatureChanged { temperature: Option<f64> },
    RangeChanged { min: f64, max: f64, step: f64 },
    FanModeChanged { mode: Option<String> },
    SwingModeChanged { mode: Option<String> },
    TemperatureUnitChanged { unit: TemperatureUnit },
    CurrentTemperatureChanged { temperature: f64 },
    HumidityChanged { humidity: f64 },
    CommandSent { command: AirconCommand },
    CommandFailed { error: String, attempt: u32 },
}
