//! End-to-end monitoring demo.
//!
//! Scans for peripherals, auto-selects the first one whose name contains
//! the filter passed as the first argument (default "HM"), and bridges its
//! serial frames plus stubbed GPS fixes to the configured MQTT broker.
//!
//! Run with: cargo run --example monitor [name-filter]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rise_vehicle_ble::{
    BleScanner, Config, LocationProvider, LocationRequest, LocationSample, MqttSink, Result,
    SessionController, SessionEvent, TelemetryPublisher,
};

/// Stand-in for a platform location service.
struct FixedLocation;

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn request_permission(&self) -> Result<()> {
        Ok(())
    }

    async fn current_position(&self, _request: &LocationRequest) -> Result<LocationSample> {
        Ok(LocationSample::now(45.508, -73.561, 36.0))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let filter = std::env::args().nth(1).unwrap_or_else(|| "HM".to_string());
    let config = Config::default();

    let sink = Arc::new(MqttSink::connect(&config.broker_url, "rise-monitor-demo")?);
    let publisher = Arc::new(TelemetryPublisher::new(
        sink,
        config.frame_topic.clone(),
        config.gps_topic.clone(),
    ));

    let scanner = Arc::new(BleScanner::new().await?);
    let controller = Arc::new(SessionController::new(
        config,
        Some(scanner),
        Some(Arc::new(FixedLocation)),
        publisher,
    ));

    let mut events = controller.subscribe();
    controller.start()?;

    // Auto-select in place of a user: pick the first matching device.
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let picker = controller.picker();
                if let Some(device) = picker
                    .devices()
                    .iter()
                    .find(|d| d.display_name().contains(&filter))
                {
                    println!("Selecting {}", device.display_name());
                    let _ = picker.select(&device.identifier);
                    break;
                }
            }
        });
    }

    println!("Monitoring; press Ctrl-C to stop.");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::StateChanged(state)) => println!("state: {state}"),
                    Ok(SessionEvent::Frame(frame)) => {
                        println!("frame ({} bytes): {}", frame.len(), frame.to_hex());
                    }
                    Ok(SessionEvent::Location(sample)) => {
                        println!("gps: {:.4}, {:.4}", sample.latitude, sample.longitude);
                    }
                    Ok(SessionEvent::BleError(message)) => println!("ble error: {message}"),
                    Ok(SessionEvent::Fatal(message)) => {
                        eprintln!("fatal: {message}");
                        break;
                    }
                    Err(_) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.stop().await;
    Ok(())
}
