use std::sync::{Arc, Mutex};
use std::time::Duration;

use nature_remo_aircon::{
    AirconCommand, AirconEntity, AirconSettings, ApplianceRecord, CommandTransport,
    DeviceRecord, DeviceSnapshot, Error, Event, FailurePolicy, HvacMode, RemoMode,
    RestoredAttributes,
};
use tokio::sync::Semaphore;
use tokio::time::sleep;

fn appliance() -> ApplianceRecord {
    serde_json::from_value(serde_json::json!({
        "id": "app-1",
        "type": "AC",
        "nickname": "Living AC",
        "device": { "id": "dev-1", "name": "Remo" },
        "settings": {
            "temp": "27",
            "temp_unit": "c",
            "mode": "cool",
            "vol": "auto",
            "dir": "swing",
            "button": "",
            "updated_at": "2024-07-01T10:00:00Z"
        },
        "aircon": {
            "range": {
                "modes": {
                    "cool": { "temp": ["16", "17", "18", "27", "30"], "vol": ["1", "2", "3", "auto"], "dir": ["swing", "1"] },
                    "warm": { "temp": ["14", "14.5", "15"], "vol": ["auto"], "dir": ["swing"] },
                    "blow": { "temp": [""], "vol": ["auto"], "dir": [] }
                },
                "fixedButtons": ["power-off"]
            },
            "tempUnit": "c"
        }
    }))
    .unwrap()
}

/// Applies commands to an in-memory copy of the settings, the way the cloud
/// does, and records every request.
#[derive(Clone)]
struct MockTransport {
    sent: Arc<Mutex<Vec<AirconCommand>>>,
    server: Arc<Mutex<AirconSettings>>,
    gate: Option<Arc<Semaphore>>,
    failures: Arc<Mutex<u32>>,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            sent: Arc::default(),
            server: Arc::new(Mutex::new(appliance().settings.unwrap())),
            gate: None,
            failures: Arc::default(),
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    fn failing(times: u32) -> Self {
        let transport = Self::new();
        *transport.failures.lock().unwrap() = times;
        transport
    }

    fn sent(&self) -> Vec<AirconCommand> {
        self.sent.lock().unwrap().clone()
    }
}

impl CommandTransport for MockTransport {
    async fn send_aircon_settings(
        &self,
        _appliance_id: &str,
        command: &AirconCommand,
    ) -> nature_remo_aircon::Result<AirconSettings> {
        self.sent.lock().unwrap().push(command.clone());
        if let Some(ref gate) = self.gate {
            gate.acquire().await.unwrap().forget();
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::InvalidConfig("server rejected".to_string()));
            }
        }

        let mut server = self.server.lock().unwrap();
        if let Some(mode) = command.operation_mode {
            server.mode = mode;
            server.button = String::new();
        }
        if command.power_off {
            server.button = "power-off".to_string();
        }
        if let Some(ref temp) = command.temperature {
            server.temp = Some(temp.clone());
        }
        if let Some(ref vol) = command.air_volume {
            server.vol = Some(vol.clone());
        }
        if let Some(ref dir) = command.air_direction {
            server.dir = Some(dir.clone());
        }
        Ok(server.clone())
    }
}

fn collect_events() -> (Arc<Mutex<Vec<Event>>>, impl Fn(&Event) + Send + Sync + 'static) {
    let events: Arc<Mutex<Vec<Event>>> = Arc::default();
    let events_clone = events.clone();
    (events, move |event: &Event| {
        events_clone.lock().unwrap().push(event.clone());
    })
}

const SETTLE: Duration = Duration::from_millis(150);

#[tokio::test(start_paused = true)]
async fn burst_sends_one_merged_request() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_temperature(24.0);
    entity.set_temperature(25.0);
    entity.set_fan_mode("2");
    entity.set_temperature(26.0);
    sleep(SETTLE).await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].temperature.as_deref(), Some("26"));
    assert_eq!(sent[0].air_volume.as_deref(), Some("2"));
    assert_eq!(sent[0].operation_mode, None);

    let state = entity.state();
    assert_eq!(state.target_temperature, Some(26.0));
    assert_eq!(state.fan_mode.as_deref(), Some("2"));
}

#[tokio::test(start_paused = true)]
async fn state_lags_until_confirmed() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_temperature(20.0);
    assert_eq!(entity.state().target_temperature, Some(27.0));
    assert!(entity.is_dispatch_armed());
    assert_eq!(entity.pending_command().unwrap().temperature.as_deref(), Some("20"));

    sleep(SETTLE).await;
    assert!(!entity.is_dispatch_armed());
    assert_eq!(entity.pending_command(), None);
    assert_eq!(entity.state().target_temperature, Some(20.0));
}

#[tokio::test(start_paused = true)]
async fn commands_spaced_beyond_quiet_interval_send_separately() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_temperature(20.0);
    sleep(SETTLE).await;
    entity.set_temperature(21.0);
    sleep(SETTLE).await;

    let temps: Vec<_> = transport.sent().into_iter().map(|c| c.temperature).collect();
    assert_eq!(temps, vec![Some("20".to_string()), Some("21".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn whole_temperatures_go_out_as_integers() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_temperature(24.0);
    sleep(SETTLE).await;

    assert_eq!(
        transport.sent()[0].form_fields(),
        vec![("temperature", "24".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn mode_switch_restores_per_mode_target() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_temperature(25.0);
    sleep(SETTLE).await;
    entity.set_hvac_mode(HvacMode::Heat);
    sleep(SETTLE).await;
    entity.set_hvac_mode(HvacMode::Cool);
    sleep(SETTLE).await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1].operation_mode, Some(RemoMode::Warm));
    assert_eq!(sent[1].temperature.as_deref(), Some("23"));
    assert_eq!(sent[2].operation_mode, Some(RemoMode::Cool));
    assert_eq!(sent[2].temperature.as_deref(), Some("25"));

    let state = entity.state();
    assert_eq!(state.hvac_mode, Some(HvacMode::Cool));
    assert_eq!(state.max_temp, 30.0);
}

#[tokio::test(start_paused = true)]
async fn capabilities_follow_confirmed_mode() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    let state = entity.state();
    assert_eq!((state.min_temp, state.max_temp, state.target_temperature_step), (16.0, 30.0, 1.0));
    assert_eq!(
        state.hvac_modes,
        vec![HvacMode::FanOnly, HvacMode::Cool, HvacMode::Heat, HvacMode::Off]
    );

    entity.set_hvac_mode(HvacMode::Heat);
    sleep(SETTLE).await;
    let state = entity.state();
    assert_eq!((state.min_temp, state.max_temp, state.target_temperature_step), (14.0, 15.0, 0.5));
    assert_eq!(state.fan_modes, vec!["auto"]);

    entity.set_hvac_mode(HvacMode::Off);
    sleep(SETTLE).await;
    let state = entity.state();
    assert_eq!(state.hvac_mode, Some(HvacMode::Off));
    assert_eq!(state.target_temperature_step, 0.5);
}

#[tokio::test(start_paused = true)]
async fn power_off_keeps_staged_temperature() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_hvac_mode(HvacMode::Off);
    entity.set_temperature(22.0);
    sleep(SETTLE).await;

    let fields = transport.sent()[0].form_fields();
    assert_eq!(
        fields,
        vec![
            ("temperature", "22".to_string()),
            ("button", "power-off".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn off_then_mode_in_one_burst_still_powers_off() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_hvac_mode(HvacMode::Off);
    entity.set_hvac_mode(HvacMode::Cool);
    sleep(SETTLE).await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].power_off);
    assert_eq!(sent[0].operation_mode, None);
    assert_eq!(
        sent[0].form_fields(),
        vec![
            ("temperature", "27".to_string()),
            ("button", "power-off".to_string()),
        ]
    );
    assert_eq!(entity.state().hvac_mode, Some(HvacMode::Off));
}

#[tokio::test(start_paused = true)]
async fn non_finite_temperature_is_not_sent() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_temperature(f64::NAN);
    entity.set_temperature(f64::INFINITY);
    sleep(SETTLE).await;

    assert!(transport.sent().is_empty());
    assert!(!entity.is_dispatch_armed());
}

#[tokio::test(start_paused = true)]
async fn teardown_with_armed_timer_sends_nothing() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_temperature(19.0);
    entity.teardown();
    sleep(Duration::from_millis(500)).await;

    assert!(transport.sent().is_empty());
    assert_eq!(entity.pending_command(), None);

    entity.set_temperature(20.0);
    sleep(SETTLE).await;
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_entity_cancels_dispatch() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_swing_mode("1");
    drop(entity);
    sleep(Duration::from_millis(500)).await;

    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn command_during_in_flight_request_starts_new_buffer() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = MockTransport::gated(gate.clone());
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    entity.set_temperature(24.0);
    sleep(SETTLE).await;
    assert_eq!(transport.sent().len(), 1);
    assert!(!entity.is_dispatch_armed());

    entity.set_fan_mode("3");
    let pending = entity.pending_command().unwrap();
    assert_eq!(pending.air_volume.as_deref(), Some("3"));
    assert_eq!(pending.temperature, None);

    gate.add_permits(1);
    sleep(Duration::from_millis(50)).await;

    assert_eq!(entity.state().target_temperature, Some(24.0));
    assert_eq!(entity.pending_command().unwrap().air_volume.as_deref(), Some("3"));
    assert!(entity.is_dispatch_armed());

    gate.add_permits(1);
    sleep(SETTLE).await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].temperature, None);
    assert_eq!(sent[1].air_volume.as_deref(), Some("3"));
    let state = entity.state();
    assert_eq!(state.fan_mode.as_deref(), Some("3"));
    assert_eq!(state.target_temperature, Some(24.0));
}

#[tokio::test(start_paused = true)]
async fn confirmation_after_teardown_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = MockTransport::gated(gate.clone());
    let (events, on_event) = collect_events();
    let entity = AirconEntity::builder(&appliance(), transport.clone())
        .on_event(on_event)
        .build()
        .unwrap();

    entity.set_temperature(18.0);
    sleep(SETTLE).await;
    assert_eq!(transport.sent().len(), 1);

    entity.teardown();
    gate.add_permits(1);
    sleep(SETTLE).await;

    assert_eq!(entity.state().target_temperature, Some(27.0));
    let captured = events.lock().unwrap();
    assert!(!captured.iter().any(|e| matches!(e, Event::TargetTemperatureChanged { .. })));
}

#[tokio::test(start_paused = true)]
async fn failed_request_surfaces_error_and_keeps_state() {
    let transport = MockTransport::failing(1);
    let (events, on_event) = collect_events();
    let entity = AirconEntity::builder(&appliance(), transport.clone())
        .on_event(on_event)
        .build()
        .unwrap();

    entity.set_temperature(20.0);
    sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.sent().len(), 1);
    let state = entity.state();
    assert_eq!(state.target_temperature, Some(27.0));
    assert!(state.last_error.unwrap().contains("server rejected"));
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, Event::CommandFailed { attempt: 1, .. })));

    entity.set_temperature(21.0);
    sleep(SETTLE).await;
    let state = entity.state();
    assert_eq!(state.target_temperature, Some(21.0));
    assert_eq!(state.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_resends_same_payload() {
    let transport = MockTransport::failing(1);
    let entity = AirconEntity::builder(&appliance(), transport.clone())
        .failure_policy(FailurePolicy::Retry {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        })
        .build()
        .unwrap();

    entity.set_temperature(20.0);
    sleep(SETTLE).await;
    assert_eq!(transport.sent().len(), 1);
    assert!(entity.state().last_error.is_some());

    sleep(Duration::from_secs(1)).await;
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
    let state = entity.state();
    assert_eq!(state.target_temperature, Some(20.0));
    assert_eq!(state.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn retry_is_abandoned_once_a_newer_command_is_sent() {
    let transport = MockTransport::failing(1);
    let entity = AirconEntity::builder(&appliance(), transport.clone())
        .failure_policy(FailurePolicy::Retry {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        })
        .build()
        .unwrap();

    entity.set_temperature(20.0);
    sleep(SETTLE).await;
    entity.set_temperature(22.0);
    sleep(SETTLE).await;
    assert_eq!(entity.state().target_temperature, Some(22.0));

    sleep(Duration::from_secs(3)).await;
    let temps: Vec<_> = transport
        .sent()
        .into_iter()
        .map(|c| c.temperature)
        .collect();
    assert_eq!(temps, vec![Some("20".to_string()), Some("22".to_string())]);
    assert_eq!(entity.state().target_temperature, Some(22.0));
}

#[tokio::test(start_paused = true)]
async fn retry_gives_up_after_max_attempts() {
    let transport = MockTransport::failing(10);
    let entity = AirconEntity::builder(&appliance(), transport.clone())
        .failure_policy(FailurePolicy::Retry {
            max_attempts: 2,
            backoff: Duration::from_millis(500),
        })
        .build()
        .unwrap();

    entity.set_temperature(20.0);
    sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.sent().len(), 2);
    assert!(entity.state().last_error.is_some());
}

#[tokio::test(start_paused = true)]
async fn lost_response_times_out() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = MockTransport::gated(gate);
    let entity = AirconEntity::builder(&appliance(), transport.clone())
        .request_timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    entity.set_temperature(20.0);
    sleep(Duration::from_secs(2)).await;

    let state = entity.state();
    assert_eq!(state.last_error.as_deref(), Some("request timed out"));
    assert_eq!(state.target_temperature, Some(27.0));
}

#[tokio::test(start_paused = true)]
async fn events_follow_confirmation() {
    let transport = MockTransport::new();
    let (events, on_event) = collect_events();
    let snapshots: Arc<Mutex<Vec<f64>>> = Arc::default();
    let snapshots_clone = snapshots.clone();
    let entity = AirconEntity::builder(&appliance(), transport.clone())
        .on_event(on_event)
        .on_snapshot(move |state| {
            if let Some(t) = state.target_temperature {
                snapshots_clone.lock().unwrap().push(t);
            }
        })
        .build()
        .unwrap();

    entity.set_temperature(22.0);
    sleep(SETTLE).await;

    let captured = events.lock().unwrap();
    assert!(matches!(captured[0], Event::CommandSent { .. }));
    assert!(captured.contains(&Event::TargetTemperatureChanged { temperature: Some(22.0) }));
    assert_eq!(*snapshots.lock().unwrap(), vec![22.0]);
}

#[tokio::test(start_paused = true)]
async fn restored_targets_seed_mode_switch() {
    let transport = MockTransport::new();
    let mut restored = RestoredAttributes::default();
    restored.previous_target_temperature.insert(RemoMode::Warm, 21.0);
    let entity = AirconEntity::builder(&appliance(), transport.clone())
        .restore(restored)
        .build()
        .unwrap();

    let attrs = entity.extra_state_attributes();
    assert_eq!(attrs.previous_target_temperature[&RemoMode::Cool], 27.0);
    assert_eq!(attrs.previous_target_temperature[&RemoMode::Warm], 21.0);

    entity.set_hvac_mode(HvacMode::Heat);
    sleep(SETTLE).await;
    assert_eq!(transport.sent()[0].temperature.as_deref(), Some("21"));
}

#[tokio::test(start_paused = true)]
async fn telemetry_applies_independently() {
    let transport = MockTransport::new();
    let (events, on_event) = collect_events();
    let entity = AirconEntity::builder(&appliance(), transport.clone())
        .on_event(on_event)
        .build()
        .unwrap();

    let device: DeviceRecord = serde_json::from_value(serde_json::json!({
        "id": "dev-1",
        "newest_events": { "te": { "val": 28.5 }, "hu": { "val": 61 } }
    }))
    .unwrap();
    let mut snapshot = DeviceSnapshot::from_devices(vec![device]);

    entity.apply_device_refresh(&snapshot);
    let state = entity.state();
    assert_eq!(state.current_temperature, Some(28.5));
    assert_eq!(state.current_humidity, Some(61.0));
    assert!(events
        .lock()
        .unwrap()
        .contains(&Event::CurrentTemperatureChanged { temperature: 28.5 }));

    snapshot.refresh(Err(Error::Timeout));
    entity.apply_device_refresh(&snapshot);
    assert_eq!(entity.state().current_temperature, Some(28.5));
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn appliance_poll_applies_settings() {
    let transport = MockTransport::new();
    let entity = AirconEntity::builder(&appliance(), transport.clone()).build().unwrap();

    let mut record = appliance();
    let settings = record.settings.as_mut().unwrap();
    settings.mode = RemoMode::Blow;
    settings.temp = None;
    entity.apply_appliance(&record);

    let state = entity.state();
    assert_eq!(state.hvac_mode, Some(HvacMode::FanOnly));
    assert_eq!(state.target_temperature, None);
    assert_eq!((state.min_temp, state.max_temp), (0.0, 0.0));

    let mut other = appliance();
    other.id = "app-2".to_string();
    other.settings.as_mut().unwrap().mode = RemoMode::Dry;
    entity.apply_appliance(&other);
    assert_eq!(entity.state().hvac_mode, Some(HvacMode::FanOnly));
}

#[test]
fn non_aircon_appliance_is_rejected() {
    let mut record = appliance();
    record.kind = "TV".to_string();
    let err = AirconEntity::builder(&record, MockTransport::new()).build().err().unwrap();
    assert!(matches!(err, Error::NotAircon(ref id) if id == "app-1"));

    let mut record = appliance();
    record.aircon = None;
    assert!(AirconEntity::builder(&record, MockTransport::new()).build().is_err());
}
