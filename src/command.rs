use serde_json::{Map, Value};

use crate::debounce::Coalesce;
use crate::protocol::POWER_OFF_BUTTON;
use crate::types::RemoMode;

/// Unsent, merged user intent for one appliance.
///
/// Power-off and `operation_mode` never coexist. Once a power-off is pending
/// it dominates: a later mode change in the same merge is dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AirconCommand {
    pub operation_mode: Option<RemoMode>,
    pub temperature: Option<String>,
    pub air_volume: Option<String>,
    pub air_direction: Option<String>,
    pub power_off: bool,
}

impl AirconCommand {
    pub fn is_empty(&self) -> bool {
        self.operation_mode.is_none()
            && self.temperature.is_none()
            && self.air_volume.is_none()
            && self.air_direction.is_none()
            && !self.power_off
    }

    pub fn stage_mode(&mut self, mode: RemoMode) {
        if mode.is_power_off() {
            self.power_off = true;
            self.operation_mode = None;
        } else {
            self.power_off = false;
            self.operation_mode = Some(mode);
        }
    }

    /// Form fields in the shape the aircon settings endpoint expects.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::with_capacity(5);
        if let Some(mode) = self.operation_mode {
            fields.push(("operation_mode", mode.as_remo_str().to_string()));
        }
        if let Some(ref temp) = self.temperature {
            fields.push(("temperature", temp.clone()));
        }
        if let Some(ref vol) = self.air_volume {
            fields.push(("air_volume", vol.clone()));
        }
        if let Some(ref dir) = self.air_direction {
            fields.push(("air_direction", dir.clone()));
        }
        if self.power_off {
            fields.push(("button", POWER_OFF_BUTTON.to_string()));
        }
        fields
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .form_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v)))
            .collect();
        Value::Object(map)
    }
}

impl Coalesce for AirconCommand {
    fn coalesce(&mut self, later: Self) {
        if later.power_off {
            self.stage_mode(RemoMode::PowerOff);
        } else if let Some(mode) = later.operation_mode
            && !self.power_off
        {
            self.stage_mode(mode);
        }
        if later.temperature.is_some() {
            self.temperature = later.temperature;
        }
        if later.air_volume.is_some() {
            self.air_volume = later.air_volume;
        }
        if later.air_direction.is_some() {
            self.air_direction = later.air_direction;
        }
    }
}
