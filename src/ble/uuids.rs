//! Service and characteristic short identifiers.
//!
//! The vehicle's onboard controller speaks serial-over-BLE through an HM-10
//! module, which exposes legacy 16-bit identifiers embedded in 128-bit UUID
//! strings. Endpoints are therefore located by substring match rather than
//! exact UUID comparison; see [`crate::ble::resolver`].

use uuid::Uuid;

/// Short identifier of the HM-10 serial service.
pub const SERIAL_SERVICE_SHORT_ID: &str = "ffe0";
/// Short identifier of the HM-10 serial characteristic (notify + write).
pub const SERIAL_NOTIFY_SHORT_ID: &str = "ffe1";

/// Full 128-bit form of the serial service UUID, for reference and tests.
pub const SERIAL_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ffe0_0000_1000_8000_00805f9b34fb);
/// Full 128-bit form of the serial characteristic UUID.
pub const SERIAL_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000_ffe1_0000_1000_8000_00805f9b34fb);

// Daly BMS variant. The BMS uses bare numeric short identifiers.
/// Short identifier of the BMS response characteristic (notify).
pub const BMS_NOTIFY_SHORT_ID: &str = "17";
/// Short identifier of the BMS handshake characteristic.
pub const BMS_HANDSHAKE_SHORT_ID: &str = "48";
/// Short identifier of the BMS command characteristic.
pub const BMS_COMMAND_SHORT_ID: &str = "15";
/// State-of-charge request payload, written once per poll tick.
pub const BMS_SOC_COMMAND: &[u8] = b"90";
