//! Geographic fix polling.
//!
//! The session controller polls a [`LocationProvider`] on a fixed cadence
//! and forwards each sample to the telemetry publisher. Providers are
//! platform glue (OS location services) and live outside this crate; the
//! trait is the boundary.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Accuracy hint passed to the provider on each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accuracy {
    /// Coarse fix, lowest power.
    Low,
    /// Balanced accuracy and power.
    Balanced,
    /// Highest accuracy available, suited to turn-by-turn navigation.
    #[default]
    BestForNavigation,
}

/// Parameters for one position request. No minimum time or distance
/// interval is forced; cadence is owned by the session's poll loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationRequest {
    /// Requested fix accuracy.
    pub accuracy: Accuracy,
}

/// One geographic fix. Produced on each successful poll, forwarded
/// immediately, and not retained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationSample {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Altitude in meters above sea level.
    pub altitude: f64,
    /// Fix time as milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl LocationSample {
    /// Create a sample stamped with the current time.
    pub fn now(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A polling source of geographic fixes.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Request foreground location permission. Denial is fatal to the GPS
    /// branch of monitoring only; the BLE branch proceeds independently.
    async fn request_permission(&self) -> Result<()>;

    /// Poll the current position.
    async fn current_position(&self, request: &LocationRequest) -> Result<LocationSample>;
}
