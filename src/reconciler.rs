use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::capability::{supported_hvac_modes, ModeCapabilities};
use crate::command::AirconCommand;
use crate::protocol::{AirconSettings, CapabilityTable};
use crate::types::*;

/// Confirmed state of one air conditioner plus its telemetry.
///
/// Only confirmed settings and telemetry mutate this; user commands are
/// staged into an [`AirconCommand`] and leave it untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AirconState {
    /// Last non-off vendor mode. Kept while the unit is off so capability
    /// lookups still have a table entry.
    pub mode: Option<RemoMode>,
    pub power_off: bool,
    pub target_temperature: Option<f64>,
    pub last_target_by_mode: BTreeMap<RemoMode, f64>,
    pub fan_mode: Option<String>,
    pub swing_mode: Option<String>,
    pub temperature_unit: TemperatureUnit,
    pub updated_at: Option<DateTime<Utc>>,
    pub capabilities: CapabilityTable,
    pub current_temperature: Option<f64>,
    pub current_humidity: Option<f64>,
    pub last_error: Option<String>,
}

impl AirconState {
    pub fn new(capabilities: CapabilityTable, temperature_unit: TemperatureUnit) -> Self {
        Self {
            capabilities,
            temperature_unit,
            ..Default::default()
        }
    }

    pub fn restore(&mut self, attributes: &RestoredAttributes) {
        self.last_target_by_mode
            .extend(attributes.previous_target_temperature.iter().map(|(m, t)| (*m, *t)));
        if self.updated_at.is_none() {
            self.updated_at = attributes.updated_at;
        }
    }

    pub fn restored_attributes(&self) -> RestoredAttributes {
        RestoredAttributes {
            previous_target_temperature: self.last_target_by_mode.clone(),
            updated_at: self.updated_at,
        }
    }

    pub fn hvac_mode(&self) -> Option<HvacMode> {
        if self.power_off {
            Some(HvacMode::Off)
        } else {
            self.mode.map(RemoMode::to_hvac)
        }
    }

    /// Translates a user request into vendor command fields.
    pub fn stage(&self, request: &ClimateRequest) -> AirconCommand {
        let mut command = AirconCommand::default();

        if let Some(hvac_mode) = request.hvac_mode {
            let mode = hvac_mode.to_remo();
            command.stage_mode(mode);
            if !mode.is_power_off() {
                command.temperature = self
                    .last_target_by_mode
                    .get(&mode)
                    .copied()
                    .or_else(|| mode.default_temperature())
                    .map(format_temperature);
            }
        }

        match request.temperature {
            Some(temperature) if temperature.is_finite() => {
                command.temperature = Some(format_temperature(temperature));
            }
            Some(temperature) => warn!(temperature, "ignoring non-finite target temperature"),
            None => {}
        }
        if let Some(ref fan) = request.fan_mode {
            command.air_volume = Some(fan.clone());
        }
        if let Some(ref swing) = request.swing_mode {
            command.air_direction = Some(swing.clone());
        }

        command
    }

    /// Merges settings confirmed by the cloud. Idempotent.
    pub fn apply_confirmed(&mut self, settings: &AirconSettings) {
        if settings.mode.is_power_off() {
            self.power_off = true;
        } else {
            self.mode = Some(settings.mode);
            self.power_off = settings.is_power_off();
        }

        self.target_temperature = settings
            .temp
            .as_deref()
            .and_then(|t| t.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite());
        if let (Some(mode), Some(temp)) = (self.mode, self.target_temperature) {
            self.last_target_by_mode.insert(mode, temp);
        }

        self.fan_mode = settings.vol.clone();
        self.swing_mode = settings.dir.clone();
        if let Some(unit) = settings.temp_unit {
            self.temperature_unit = unit;
        }
        self.updated_at = settings.updated_at;
    }

    pub fn current_capabilities(&self) -> ModeCapabilities {
        ModeCapabilities::resolve(&self.capabilities, self.mode)
    }

    pub fn snapshot(&self, appliance_id: &str, name: &str) -> ClimateState {
        let caps = self.current_capabilities();
        ClimateState {
            appliance_id: appliance_id.to_string(),
            name: name.to_string(),
            hvac_mode: self.hvac_mode(),
            hvac_modes: supported_hvac_modes(&self.capabilities),
            target_temperature: self.target_temperature,
            min_temp: caps.range.min,
            max_temp: caps.range.max,
            target_temperature_step: caps.range.step,
            fan_mode: self.fan_mode.clone(),
            fan_modes: caps.fan_modes,
            swing_mode: self.swing_mode.clone(),
            swing_modes: caps.swing_modes,
            current_temperature: self.current_temperature,
            current_humidity: self.current_humidity,
            temperature_unit: self.temperature_unit,
            updated_at: self.updated_at,
            last_error: self.last_error.clone(),
        }
    }
}
