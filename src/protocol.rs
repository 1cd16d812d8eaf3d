use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{RemoMode, TemperatureUnit};

pub const DEFAULT_BASE_URL: &str = "https://api.nature.global";

pub const APPLIANCE_TYPE_AC: &str = "AC";

/// Value of the settings `button` field while the unit is switched off.
pub const POWER_OFF_BUTTON: &str = "power-off";

pub fn appliances_path() -> &'static str {
    "/1/appliances"
}

pub fn devices_path() -> &'static str {
    "/1/devices"
}

pub fn aircon_settings_path(appliance_id: &str) -> String {
    format!("/1/appliances/{appliance_id}/aircon_settings")
}

/// Settings as reported by the cloud, either inside an appliance record or
/// as the response to an aircon settings command.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AirconSettings {
    /// Target temperature as text. Absent, `null` and `""` all decode to
    /// `None`.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub temp: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub temp_unit: Option<TemperatureUnit>,
    pub mode: RemoMode,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub vol: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub dir: Option<String>,
    #[serde(default)]
    pub button: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AirconSettings {
    pub fn is_power_off(&self) -> bool {
        self.button == POWER_OFF_BUTTON
    }
}

/// Supported values for one vendor mode.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModeCapability {
    #[serde(default, deserialize_with = "strings_skipping_null")]
    pub temp: Vec<String>,
    #[serde(default, deserialize_with = "strings_skipping_null")]
    pub vol: Vec<String>,
    #[serde(default, deserialize_with = "strings_skipping_null")]
    pub dir: Vec<String>,
}

pub type CapabilityTable = BTreeMap<RemoMode, ModeCapability>;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AirconRange {
    #[serde(default)]
    pub modes: CapabilityTable,
    #[serde(rename = "fixedButtons", default)]
    pub fixed_buttons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AirconRecord {
    #[serde(default)]
    pub range: AirconRange,
    #[serde(rename = "tempUnit", default, deserialize_with = "empty_as_none")]
    pub temp_unit: Option<TemperatureUnit>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DeviceRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApplianceRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub nickname: String,
    pub device: DeviceRef,
    #[serde(default)]
    pub settings: Option<AirconSettings>,
    #[serde(default)]
    pub aircon: Option<AirconRecord>,
}

impl ApplianceRecord {
    pub fn is_aircon(&self) -> bool {
        self.kind == APPLIANCE_TYPE_AC
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SensorEvent {
    pub val: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NewestEvents {
    /// Temperature.
    #[serde(default)]
    pub te: Option<SensorEvent>,
    /// Humidity.
    #[serde(default)]
    pub hu: Option<SensorEvent>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub newest_events: NewestEvents,
}

/// Appliance records that can be driven as climate entities.
pub fn aircon_appliances(records: &[ApplianceRecord]) -> impl Iterator<Item = &ApplianceRecord> {
    records.iter().filter(|r| r.is_aircon())
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn strings_skipping_null<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Option<String>> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().flatten().collect())
}
