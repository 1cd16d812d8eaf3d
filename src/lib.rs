mod capability;
mod client;
mod command;
mod debounce;
mod diff;
mod entity;
mod error;
mod logger;
mod protocol;
mod reconciler;
mod telemetry;
mod types;

pub use capability::{supported_hvac_modes, ModeCapabilities, TemperatureRange};
pub use client::{CommandTransport, RemoClient, RemoClientBuilder, DEFAULT_REQUEST_TIMEOUT};
pub use command::AirconCommand;
pub use debounce::DEFAULT_QUIET_INTERVAL;
pub use entity::{AirconEntity, AirconEntityBuilder, FailurePolicy};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use protocol::*;
pub use reconciler::AirconState;
pub use telemetry::{apply_telemetry, DeviceDirectory, DeviceSnapshot};
pub use types::*;
