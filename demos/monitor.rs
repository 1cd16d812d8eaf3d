use std::env;
use std::sync::Arc;
use std::time::Duration;

use nature_remo_aircon::{aircon_appliances, AirconEntity, DeviceSnapshot, RemoClient};

#[tokio::main]
async fn main() -> nature_remo_aircon::Result<()> {
    tracing_subscriber::fmt::init();

    let token = env::var("NATURE_REMO_TOKEN").expect("usage: NATURE_REMO_TOKEN=... monitor [target]");
    let target: Option<f64> = env::args().nth(1).and_then(|a| a.parse().ok());

    let client = Arc::new(RemoClient::builder(token).build()?);
    let appliances = client.appliances().await?;

    let mut entities = Vec::new();
    for record in aircon_appliances(&appliances) {
        let entity = AirconEntity::builder(record, client.clone())
            .on_event(|event| println!("{event:?}"))
            .on_snapshot(|state| {
                println!(
                    "[{}] {:?} target {:?} ({}..{} step {}) | fan {:?} | swing {:?} | room {:?}\u{00b0} {:?}%",
                    state.name,
                    state.hvac_mode,
                    state.target_temperature,
                    state.min_temp,
                    state.max_temp,
                    state.target_temperature_step,
                    state.fan_mode,
                    state.swing_mode,
                    state.current_temperature,
                    state.current_humidity,
                );
            })
            .build()?;
        println!("Found {} ({})", entity.name(), entity.appliance_id());
        if let Some(t) = target {
            entity.set_temperature(t);
        }
        entities.push(entity);
    }

    let mut devices = DeviceSnapshot::new();
    loop {
        devices.refresh(client.devices().await);
        for entity in &entities {
            entity.apply_device_refresh(&devices);
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
