// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]

//! # rise-vehicle-ble
//!
//! A cross-platform Rust library for bridging a vehicle's onboard
//! microcontroller to an MQTT broker over Bluetooth Low Energy.
//!
//! The onboard controller (an STM32 behind an HM-10 serial module) pushes
//! telemetry as fragmented BLE notifications terminated by the ASCII
//! sentinel `"end"`. This crate discovers the peripheral, resolves the
//! serial characteristic by legacy short identifier, reassembles the
//! notification stream into complete frames, and republishes frames and
//! periodic GPS samples to fixed MQTT topics with fire-and-forget
//! semantics.
//!
//! ## Pipeline
//!
//! - **Scan**: [`ble::BleScanner`] discovers peripherals, deduplicated by
//!   identifier, and feeds the [`picker::DevicePicker`].
//! - **Pick**: the presentation layer renders the picker's list; the
//!   session waits for exactly one selection.
//! - **Connect and resolve**: [`ble::ConnectionManager`] connects with a
//!   bounded handshake and [`ble::resolver`] locates the serial endpoint by
//!   substring match on UUID strings.
//! - **Reassemble**: [`protocol::FrameReassembler`] turns the fragmented
//!   notification stream into [`protocol::CompletedFrame`]s.
//! - **Publish**: [`publish::TelemetryPublisher`] forwards frames (raw
//!   bytes) and GPS samples (JSON) to their topics over
//!   [`publish::MqttSink`].
//!
//! [`session::SessionController`] orchestrates the whole lifecycle and runs
//! the self-throttling GPS poll loop concurrently; the BLE and GPS branches
//! are independent and either may be absent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rise_vehicle_ble::{
//!     BleScanner, Config, MqttSink, Result, SessionController, TelemetryPublisher,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::default();
//!
//!     let sink = Arc::new(MqttSink::connect(&config.broker_url, "rise-mobile")?);
//!     let publisher = Arc::new(TelemetryPublisher::new(
//!         sink,
//!         config.frame_topic.clone(),
//!         config.gps_topic.clone(),
//!     ));
//!
//!     // BLE branch is skipped when no adapter is available.
//!     let scanner = BleScanner::new().await.ok().map(Arc::new);
//!
//!     let controller = SessionController::new(config, scanner, None, publisher);
//!     controller.start()?;
//!
//!     // ... user selects a device through controller.picker() ...
//!
//!     controller.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod location;
pub mod picker;
pub mod protocol;
pub mod publish;
pub mod session;

// Re-exports for convenience
pub use ble::connection::{ConnectionManager, PeripheralState};
pub use ble::resolver::{resolve, ResolvedEndpoint, ServiceCatalog};
pub use ble::scanner::{BleScanner, PeripheralHandle};
pub use config::{CommandProfile, Config, ProtocolProfile};
pub use error::{Error, Result};
pub use location::{Accuracy, LocationProvider, LocationRequest, LocationSample};
pub use picker::{DeviceIdentity, DevicePicker};
pub use protocol::{CompletedFrame, FrameReassembler, FRAME_TERMINATOR};
pub use publish::{GpsCoordinate, MqttSink, PublishSink, TelemetryPublisher};
pub use session::{SessionController, SessionEvent, SessionState};
