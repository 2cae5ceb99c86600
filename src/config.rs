//! Configuration for a monitoring session.
//!
//! Defaults match the Rise vehicle deployment: HM-10 style serial service,
//! public Mosquitto test broker, one-second GPS cadence.

use serde::Deserialize;
use std::time::Duration;

use crate::ble::uuids::{
    BMS_COMMAND_SHORT_ID, BMS_HANDSHAKE_SHORT_ID, BMS_NOTIFY_SHORT_ID, BMS_SOC_COMMAND,
    SERIAL_NOTIFY_SHORT_ID, SERIAL_SERVICE_SHORT_ID,
};

/// Default MQTT broker URL.
pub const DEFAULT_BROKER_URL: &str = "mqtt://test.mosquitto.org:8080";
/// Topic for reassembled BLE frames (raw bytes, no added framing).
pub const DEFAULT_FRAME_TOPIC: &str = "Rise-ble-Data";
/// Topic for JSON-encoded GPS coordinates.
pub const DEFAULT_GPS_TOPIC: &str = "Rise-GPS-Position";

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_frame_topic() -> String {
    DEFAULT_FRAME_TOPIC.to_string()
}

fn default_gps_topic() -> String {
    DEFAULT_GPS_TOPIC.to_string()
}

fn default_location_poll_interval_ms() -> u64 {
    1_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

/// Periodic command writes for request/response peripherals (the BMS
/// variant). The serial profile has none: the controller pushes
/// notifications unprompted.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CommandProfile {
    /// Characteristic written once after subscribing, before polling starts.
    pub handshake_characteristic: Option<String>,
    /// Payload for the handshake write. May be empty.
    #[serde(default)]
    pub handshake_payload: Vec<u8>,
    /// Characteristic the poll command is written to, without response.
    pub poll_characteristic: String,
    /// Payload written on each poll tick.
    pub poll_payload: Vec<u8>,
    /// Interval between poll command writes, in milliseconds.
    pub poll_interval_ms: u64,
}

impl CommandProfile {
    /// Interval between poll command writes.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Which service/characteristic pair the session resolves and subscribes to.
///
/// Short identifiers are matched as substrings of the full 128-bit UUID
/// string, so legacy 16-bit identifiers like `ffe0` work unchanged.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProtocolProfile {
    /// Short identifier of the serial service.
    pub service_short_id: String,
    /// Short identifier of the notifying characteristic.
    pub notify_short_id: String,
    /// Optional command writes for request/response peripherals.
    #[serde(default)]
    pub command: Option<CommandProfile>,
}

impl ProtocolProfile {
    /// HM-10 style serial-over-BLE profile (`ffe0`/`ffe1`). The primary
    /// pipeline for the STM32 onboard controller.
    pub fn serial() -> Self {
        Self {
            service_short_id: SERIAL_SERVICE_SHORT_ID.to_string(),
            notify_short_id: SERIAL_NOTIFY_SHORT_ID.to_string(),
            command: None,
        }
    }

    /// Daly BMS profile: notifications on `17`, an empty handshake write to
    /// `48`, then a state-of-charge request written to `15` every second.
    pub fn bms() -> Self {
        Self {
            service_short_id: SERIAL_SERVICE_SHORT_ID.to_string(),
            notify_short_id: BMS_NOTIFY_SHORT_ID.to_string(),
            command: Some(CommandProfile {
                handshake_characteristic: Some(BMS_HANDSHAKE_SHORT_ID.to_string()),
                handshake_payload: Vec::new(),
                poll_characteristic: BMS_COMMAND_SHORT_ID.to_string(),
                poll_payload: BMS_SOC_COMMAND.to_vec(),
                poll_interval_ms: 1_000,
            }),
        }
    }
}

impl Default for ProtocolProfile {
    fn default() -> Self {
        Self::serial()
    }
}

/// Configuration for a monitoring session.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// MQTT broker URL, `mqtt://host:port`.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Topic for reassembled BLE frames.
    #[serde(default = "default_frame_topic")]
    pub frame_topic: String,
    /// Topic for GPS coordinate records.
    #[serde(default = "default_gps_topic")]
    pub gps_topic: String,
    /// Nominal location poll period, in milliseconds.
    #[serde(default = "default_location_poll_interval_ms")]
    pub location_poll_interval_ms: u64,
    /// Bound on the initial connect handshake, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Reassembly buffer cap. A peripheral that never sends the terminator
    /// trips a fatal overflow instead of growing without bound.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Service/characteristic profile for the monitored peripheral.
    #[serde(default)]
    pub profile: ProtocolProfile,
}

impl Config {
    /// Nominal location poll period.
    pub fn location_poll_interval(&self) -> Duration {
        Duration::from_millis(self.location_poll_interval_ms)
    }

    /// Bound on the initial connect handshake.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            frame_topic: default_frame_topic(),
            gps_topic: default_gps_topic(),
            location_poll_interval_ms: default_location_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            profile: ProtocolProfile::default(),
        }
    }
}
