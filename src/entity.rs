use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::client::{CommandTransport, DEFAULT_REQUEST_TIMEOUT};
use crate::command::AirconCommand;
use crate::debounce::{Debouncer, DEFAULT_QUIET_INTERVAL};
use crate::diff::diff_state;
use crate::protocol::{AirconSettings, ApplianceRecord};
use crate::reconciler::AirconState;
use crate::telemetry::{apply_telemetry, DeviceDirectory};
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&ClimateState) + Send + Sync>;

/// What to do with a command whose request failed or timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Drop,
    /// Re-send the same payload after `backoff`, up to `max_attempts`
    /// requests in total.
    Retry { max_attempts: u32, backoff: Duration },
}

impl FailurePolicy {
    fn retry_after(&self, attempt: u32) -> Option<Duration> {
        match *self {
            FailurePolicy::Drop => None,
            FailurePolicy::Retry {
                max_attempts,
                backoff,
            } => (attempt < max_attempts).then_some(backoff),
        }
    }
}

pub struct AirconEntityBuilder<T: CommandTransport> {
    appliance: ApplianceRecord,
    transport: T,
    quiet_interval: Duration,
    request_timeout: Duration,
    failure_policy: FailurePolicy,
    restored: Option<RestoredAttributes>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl<T: CommandTransport> AirconEntityBuilder<T> {
    pub fn new(appliance: &ApplianceRecord, transport: T) -> Self {
        Self {
            appliance: appliance.clone(),
            transport,
            quiet_interval: DEFAULT_QUIET_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            failure_policy: FailurePolicy::default(),
            restored: None,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
        }
    }

    pub fn quiet_interval(mut self, interval: Duration) -> Self {
        self.quiet_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Attributes persisted by the host from a previous run.
    pub fn restore(mut self, attributes: RestoredAttributes) -> Self {
        self.restored = Some(attributes);
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&ClimateState) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> Result<AirconEntity<T>> {
        let appliance = self.appliance;
        if !appliance.is_aircon() {
            return Err(Error::NotAircon(appliance.id));
        }
        let (Some(aircon), Some(settings)) = (appliance.aircon, appliance.settings) else {
            return Err(Error::NotAircon(appliance.id));
        };

        let mut state = AirconState::new(aircon.range.modes, aircon.temp_unit.unwrap_or_default());
        if let Some(ref restored) = self.restored {
            state.restore(restored);
        }
        state.apply_confirmed(&settings);

        debug!(
            appliance = %appliance.id,
            device = %appliance.device.id,
            modes = state.capabilities.len(),
            "aircon entity created"
        );

        Ok(AirconEntity {
            shared: Arc::new(Shared {
                appliance_id: appliance.id,
                device_id: appliance.device.id,
                name: appliance.nickname,
                transport: self.transport,
                request_timeout: self.request_timeout,
                failure_policy: self.failure_policy,
                inner: Mutex::new(Inner {
                    state,
                    debouncer: Debouncer::new(self.quiet_interval),
                    dispatch_seq: 0,
                    torn_down: false,
                }),
                event_callbacks: self.event_callbacks,
                snapshot_callbacks: self.snapshot_callbacks,
            }),
        })
    }
}

struct Inner {
    state: AirconState,
    debouncer: Debouncer<AirconCommand>,
    /// Bumped each time a debounced command is claimed for sending.
    dispatch_seq: u64,
    torn_down: bool,
}

struct Shared<T: CommandTransport> {
    appliance_id: String,
    device_id: String,
    name: String,
    transport: T,
    request_timeout: Duration,
    failure_policy: FailurePolicy,
    inner: Mutex<Inner>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

/// Climate control for one air conditioner.
///
/// Commands are fire-and-forget: they are staged, coalesced over the quiet
/// interval and sent as one request. The observable state only changes
/// once the cloud confirms the settings. Commands must be issued from
/// within a tokio runtime.
pub struct AirconEntity<T: CommandTransport> {
    shared: Arc<Shared<T>>,
}

impl<T: CommandTransport> AirconEntity<T> {
    pub fn builder(appliance: &ApplianceRecord, transport: T) -> AirconEntityBuilder<T> {
        AirconEntityBuilder::new(appliance, transport)
    }

    pub fn appliance_id(&self) -> &str {
        &self.shared.appliance_id
    }

    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ClimateState {
        self.shared.snapshot(&self.shared.lock())
    }

    /// Attributes for the host to persist across restarts.
    pub fn extra_state_attributes(&self) -> RestoredAttributes {
        self.shared.lock().state.restored_attributes()
    }

    pub fn pending_command(&self) -> Option<AirconCommand> {
        self.shared.lock().debouncer.pending().cloned()
    }

    pub fn is_dispatch_armed(&self) -> bool {
        self.shared.lock().debouncer.is_armed()
    }

    pub fn set_temperature(&self, temperature: f64) {
        self.request(ClimateRequest::temperature(temperature));
    }

    pub fn set_hvac_mode(&self, mode: HvacMode) {
        self.request(ClimateRequest::hvac_mode(mode));
    }

    pub fn set_fan_mode(&self, mode: impl Into<String>) {
        self.request(ClimateRequest::fan_mode(mode));
    }

    pub fn set_swing_mode(&self, mode: impl Into<String>) {
        self.request(ClimateRequest::swing_mode(mode));
    }

    /// Stages a request and restarts the debounce timer.
    pub fn request(&self, request: ClimateRequest) {
        let mut inner = self.shared.lock();
        if inner.torn_down {
            debug!(appliance = %self.shared.appliance_id, "ignoring command after teardown");
            return;
        }

        let command = inner.state.stage(&request);
        if command.is_empty() {
            return;
        }
        trace!(
            appliance = %self.shared.appliance_id,
            fields = ?command.form_fields(),
            quiet_ms = inner.debouncer.quiet_interval().as_millis() as u64,
            "staging command"
        );

        let shared = Arc::clone(&self.shared);
        inner
            .debouncer
            .arm(command, move |generation| shared.dispatch(generation));
    }

    /// Applies settings delivered by the appliance poll channel.
    pub fn apply_appliance(&self, record: &ApplianceRecord) {
        if record.id != self.shared.appliance_id {
            debug!(
                appliance = %self.shared.appliance_id,
                other = %record.id,
                "ignoring record of another appliance"
            );
            return;
        }
        if let Some(ref settings) = record.settings {
            self.shared.confirm(settings);
        }
    }

    /// Applies the latest ambient readings from the device poll channel.
    pub fn apply_device_refresh(&self, directory: &impl DeviceDirectory) {
        let (before, after) = {
            let mut inner = self.shared.lock();
            if inner.torn_down {
                return;
            }
            let before = self.shared.snapshot(&inner);
            if !apply_telemetry(&mut inner.state, &self.shared.device_id, directory) {
                return;
            }
            (before, self.shared.snapshot(&inner))
        };
        self.shared.publish(&before, &after, Vec::new());
    }

    /// Cancels an armed dispatch and discards any later confirmation. A
    /// request already in flight still completes on the wire.
    pub fn teardown(&self) {
        let dropped = {
            let mut inner = self.shared.lock();
            inner.torn_down = true;
            inner.debouncer.cancel()
        };
        if let Some(command) = dropped {
            debug!(
                appliance = %self.shared.appliance_id,
                fields = ?command.form_fields(),
                "dropped pending command on teardown"
            );
        }
    }
}

impl<T: CommandTransport> Drop for AirconEntity<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<T: CommandTransport> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, inner: &Inner) -> ClimateState {
        inner.state.snapshot(&self.appliance_id, &self.name)
    }

    async fn dispatch(self: Arc<Self>, generation: u64) {
        let (command, seq) = {
            let mut inner = self.lock();
            if inner.torn_down {
                return;
            }
            let Some(command) = inner.debouncer.fire(generation) else {
                return;
            };
            inner.dispatch_seq += 1;
            (command, inner.dispatch_seq)
        };

        debug!(appliance = %self.appliance_id, fields = ?command.form_fields(), "dispatching command");
        self.emit(&[Event::CommandSent {
            command: command.clone(),
        }]);

        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(
                self.request_timeout,
                self.transport.send_aircon_settings(&self.appliance_id, &command),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            };

            let error = match result {
                Ok(settings) => {
                    self.confirm(&settings);
                    return;
                }
                Err(e) => e,
            };

            warn!(appliance = %self.appliance_id, attempt, "aircon command failed: {error}");
            self.record_failure(&error, attempt);

            let Some(backoff) = self.failure_policy.retry_after(attempt) else {
                return;
            };
            if !self.may_retry(seq) {
                return;
            }
            tokio::time::sleep(backoff).await;
            if !self.may_retry(seq) {
                return;
            }
            attempt += 1;
        }
    }

    /// A retry is abandoned after teardown or once a newer command has been
    /// claimed for sending.
    fn may_retry(&self, seq: u64) -> bool {
        let inner = self.lock();
        let superseded = inner.dispatch_seq != seq;
        if superseded && !inner.torn_down {
            debug!(appliance = %self.appliance_id, "abandoning retry of superseded command");
        }
        !inner.torn_down && !superseded
    }

    fn confirm(&self, settings: &AirconSettings) {
        let (before, after) = {
            let mut inner = self.lock();
            if inner.torn_down {
                debug!(appliance = %self.appliance_id, "discarding confirmation after teardown");
                return;
            }
            let before = self.snapshot(&inner);
            inner.state.apply_confirmed(settings);
            inner.state.last_error = None;
            (before, self.snapshot(&inner))
        };
        self.publish(&before, &after, Vec::new());
    }

    fn record_failure(&self, error: &Error, attempt: u32) {
        let (before, after) = {
            let mut inner = self.lock();
            if inner.torn_down {
                return;
            }
            let before = self.snapshot(&inner);
            inner.state.last_error = Some(error.to_string());
            (before, self.snapshot(&inner))
        };
        let failed = Event::CommandFailed {
            error: error.to_string(),
            attempt,
        };
        self.publish(&before, &after, vec![failed]);
    }

    fn publish(&self, before: &ClimateState, after: &ClimateState, mut events: Vec<Event>) {
        events.extend(diff_state(before, after));
        self.emit(&events);
        for cb in &self.snapshot_callbacks {
            cb(after);
        }
        if !events.is_empty() {
            trace!(appliance = %self.appliance_id, count = events.len(), "published events");
        }
    }

    fn emit(&self, events: &[Event]) {
        for event in events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
    }
}
