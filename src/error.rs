//! Error types for the rise-vehicle-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Failed to establish a connection to the peripheral.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The connect handshake did not complete within the configured bound.
    #[error("Connect attempt timed out after {timeout_ms} ms")]
    ConnectTimeout {
        /// The timeout that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// The peripheral advertised no services at all.
    #[error("No services found on peripheral")]
    NoServices,

    /// No service UUID contained the requested short identifier.
    #[error("Service not found: {short_id}")]
    ServiceNotFound {
        /// The short identifier that was searched for.
        short_id: String,
    },

    /// No characteristic UUID within the matched service contained the
    /// requested short identifier.
    #[error("Characteristic not found: {short_id}")]
    CharacteristicNotFound {
        /// The short identifier that was searched for.
        short_id: String,
    },

    /// A pending device selection was cancelled before it resolved.
    #[error("Device selection cancelled")]
    SelectionCancelled,

    /// The reassembly buffer grew past its cap without seeing a terminator.
    #[error("Frame exceeded {limit} buffered bytes without a terminator")]
    FrameOverflow {
        /// The configured buffer cap in bytes.
        limit: usize,
    },

    /// Invalid data was received from the peripheral.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// A required runtime permission was denied.
    #[error("Permission denied: {subsystem}")]
    PermissionDenied {
        /// The subsystem the permission was requested for ("bluetooth", "location").
        subsystem: String,
    },

    /// The location provider failed to produce a fix.
    #[error("Location error: {reason}")]
    Location {
        /// Description of the failure.
        reason: String,
    },

    /// An outbound publish failed. Always absorbed at the publisher layer.
    #[error("Publish error: {reason}")]
    Publish {
        /// Description of the failure.
        reason: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transport-level errors: recoverable at the session level. The session
    /// is torn down and flagged, but the process keeps running.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::BluetoothUnavailable
                | Self::ConnectionFailed { .. }
                | Self::ConnectTimeout { .. }
        )
    }

    /// Protocol-structure errors: the peripheral is structurally
    /// incompatible. Terminal for the session, never retried against the
    /// same peripheral.
    pub fn is_protocol_structure(&self) -> bool {
        matches!(
            self,
            Self::NoServices | Self::ServiceNotFound { .. } | Self::CharacteristicNotFound { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
