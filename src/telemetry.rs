use std::collections::HashMap;

use tracing::{debug, warn};

use crate::protocol::DeviceRecord;
use crate::reconciler::AirconState;
use crate::Result;

/// Read side of the device poll channel.
pub trait DeviceDirectory {
    fn last_update_success(&self) -> bool;
    fn device(&self, device_id: &str) -> Option<&DeviceRecord>;
}

/// Latest device list, keeping the previous data across failed refreshes.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    devices: HashMap<String, DeviceRecord>,
    last_update_success: bool,
}

impl DeviceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_devices(devices: Vec<DeviceRecord>) -> Self {
        let mut snapshot = Self::new();
        snapshot.replace(devices);
        snapshot
    }

    /// Folds the outcome of one device list fetch into the snapshot.
    pub fn refresh(&mut self, result: Result<Vec<DeviceRecord>>) {
        match result {
            Ok(devices) => self.replace(devices),
            Err(e) => {
                warn!("device refresh failed: {e}");
                self.last_update_success = false;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn replace(&mut self, devices: Vec<DeviceRecord>) {
        self.devices = devices.into_iter().map(|d| (d.id.clone(), d)).collect();
        self.last_update_success = true;
    }
}

impl DeviceDirectory for DeviceSnapshot {
    fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    fn device(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices.get(device_id)
    }
}

/// Overwrites ambient readings from the device's newest events. Returns
/// whether the state was touched.
pub fn apply_telemetry(
    state: &mut AirconState,
    device_id: &str,
    directory: &impl DeviceDirectory,
) -> bool {
    if !directory.last_update_success() {
        debug!(device = %device_id, "skipping telemetry, last refresh failed");
        return false;
    }
    let Some(device) = directory.device(device_id) else {
        debug!(device = %device_id, "device missing from directory");
        return false;
    };

    let events = &device.newest_events;
    if let Some(ref te) = events.te {
        state.current_temperature = Some(te.val);
    }
    if let Some(ref hu) = events.hu {
        state.current_humidity = Some(hu.val);
    }
    true
}
