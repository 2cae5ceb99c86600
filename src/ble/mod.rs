//! BLE communication module.
//!
//! Low-level Bluetooth Low Energy functionality: scanning, connection
//! lifecycle, and serial endpoint resolution.

pub mod connection;
pub mod resolver;
pub mod scanner;
pub mod uuids;

pub use connection::{ConnectionManager, PeripheralState};
pub use resolver::{resolve, ResolvedEndpoint, ServiceCatalog};
pub use scanner::{BleScanner, PeripheralHandle};
pub use uuids::*;
