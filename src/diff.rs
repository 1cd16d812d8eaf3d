use serde_json::Value;

use crate::types::*;

pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => changes.push((path, Value::Null, curr_val.clone())),
                }
            }
        }
        (Value::Array(prev_arr), Value::Array(curr_arr)) if prev_arr.len() == curr_arr.len() => {
            for (i, (prev_val, curr_val)) in prev_arr.iter().zip(curr_arr).enumerate() {
                let path = if path_prefix.is_empty() {
                    i.to_string()
                } else {
                    format!("{path_prefix}.{i}")
                };
                diff_json(prev_val, curr_val, &path, changes);
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

/// Typed events for every observable field that differs between snapshots.
pub(crate) fn diff_state(previous: &ClimateState, current: &ClimateState) -> Vec<Event> {
    let mut events = Vec::new();

    if previous.hvac_mode != current.hvac_mode {
        events.push(Event::ModeChanged {
            mode: current.hvac_mode,
        });
    }
    if previous.target_temperature != current.target_temperature {
        events.push(Event::TargetTemperatureChanged {
            temperature: current.target_temperature,
        });
    }
    if (previous.min_temp, previous.max_temp, previous.target_temperature_step)
        != (current.min_temp, current.max_temp, current.target_temperature_step)
    {
        events.push(Event::RangeChanged {
            min: current.min_temp,
            max: current.max_temp,
            step: current.target_temperature_step,
        });
    }
    if previous.fan_mode != current.fan_mode {
        events.push(Event::FanModeChanged {
            mode: current.fan_mode.clone(),
        });
    }
    if previous.swing_mode != current.swing_mode {
        events.push(Event::SwingModeChanged {
            mode: current.swing_mode.clone(),
        });
    }
    if previous.temperature_unit != current.temperature_unit {
        events.push(Event::TemperatureUnitChanged {
            unit: current.temperature_unit,
        });
    }
    if let Some(temperature) = current.current_temperature
        && previous.current_temperature != current.current_temperature
    {
        events.push(Event::CurrentTemperatureChanged { temperature });
    }
    if let Some(humidity) = current.current_humidity
        && previous.current_humidity != current.current_humidity
    {
        events.push(Event::HumidityChanged { humidity });
    }

    events
}
