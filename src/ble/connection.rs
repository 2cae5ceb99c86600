//! BLE connection management.
//!
//! Owns the lifecycle of one connected peripheral: connect with a bounded
//! handshake, service discovery, notification subscription, command writes,
//! and best-effort release.

use btleplug::api::{Characteristic, Peripheral as _, ValueNotification, WriteType};
use futures::stream::Stream;
use parking_lot::RwLock;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::resolver::ServiceCatalog;
use crate::ble::scanner::PeripheralHandle;
use crate::error::{Error, Result};

/// Connection state of a peripheral. Transitions are driven exclusively by
/// the session controller through the [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeripheralState {
    /// Seen during a scan, no connection attempted.
    #[default]
    Discovered,
    /// Connect handshake in progress.
    Connecting,
    /// Connected, services not yet resolved.
    Connected,
    /// Service/characteristic discovery completed.
    ServicesResolved,
    /// Connection released.
    Disconnected,
    /// An unrecoverable error ended the connection.
    Failed,
}

impl PeripheralState {
    /// Check if connected (services resolved or not).
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::ServicesResolved)
    }
}

impl std::fmt::Display for PeripheralState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "Discovered"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::ServicesResolved => write!(f, "ServicesResolved"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Event for peripheral state changes.
#[derive(Debug, Clone)]
pub struct PeripheralStateEvent {
    /// The identifier of the peripheral.
    pub identifier: String,
    /// The new connection state.
    pub state: PeripheralState,
}

/// Manages the connection to one selected peripheral.
pub struct ConnectionManager {
    /// The peripheral to manage.
    handle: PeripheralHandle,
    /// Current connection state.
    state: Arc<RwLock<PeripheralState>>,
    /// Channel for state change events.
    event_tx: broadcast::Sender<PeripheralStateEvent>,
}

impl ConnectionManager {
    /// Create a connection manager for a discovered peripheral.
    pub fn new(handle: PeripheralHandle) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            handle,
            state: Arc::new(RwLock::new(PeripheralState::Discovered)),
            event_tx,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> PeripheralState {
        *self.state.read()
    }

    /// The handle this manager was created for.
    pub fn handle(&self) -> &PeripheralHandle {
        &self.handle
    }

    /// Subscribe to state change events.
    pub fn subscribe(&self) -> broadcast::Receiver<PeripheralStateEvent> {
        self.event_tx.subscribe()
    }

    /// Connect to the peripheral, bounding the handshake by `timeout`.
    ///
    /// A single attempt: expiry or failure is fatal for the session, so no
    /// automatic retry is made here.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        if self.state().is_connected() {
            debug!("Already connected to {}", self.handle.identifier);
            return Ok(());
        }

        self.set_state(PeripheralState::Connecting);

        let attempt = tokio::time::timeout(timeout, self.handle.peripheral.connect()).await;

        match attempt {
            Ok(Ok(())) => {
                info!("Connected to {}", self.handle.identifier);
                self.set_state(PeripheralState::Connected);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_state(PeripheralState::Failed);
                Err(Error::ConnectionFailed {
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.set_state(PeripheralState::Failed);
                Err(Error::ConnectTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Discover all services and characteristics, returning the catalog.
    ///
    /// # Errors
    ///
    /// [`Error::NoServices`] when the peripheral advertises nothing; a
    /// terminal, protocol-structure condition.
    pub async fn discover_services(&self) -> Result<ServiceCatalog> {
        self.handle
            .peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let services = self.handle.peripheral.services();
        let catalog = ServiceCatalog::from_services(&services);

        if catalog.is_empty() {
            self.set_state(PeripheralState::Failed);
            return Err(Error::NoServices);
        }

        debug!(
            "Discovered {} services on {}",
            catalog.services().len(),
            self.handle.identifier
        );

        self.set_state(PeripheralState::ServicesResolved);
        Ok(catalog)
    }

    /// Find the platform characteristic for a resolved UUID string.
    pub fn characteristic(&self, uuid_str: &str) -> Result<Characteristic> {
        let uuid = Uuid::parse_str(uuid_str).map_err(|e| Error::Internal(e.to_string()))?;

        self.handle
            .peripheral
            .services()
            .into_iter()
            .flat_map(|service| service.characteristics)
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                short_id: uuid_str.to_string(),
            })
    }

    /// Subscribe to notifications from a characteristic.
    pub async fn subscribe_notifications(&self, characteristic: &Characteristic) -> Result<()> {
        self.handle
            .peripheral
            .subscribe(characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Subscribed to notifications from {}", characteristic.uuid);
        Ok(())
    }

    /// Unsubscribe from notifications. Best-effort: failure is logged, not
    /// propagated, since this runs during teardown.
    pub async fn unsubscribe_notifications(&self, characteristic: &Characteristic) {
        if let Err(e) = self.handle.peripheral.unsubscribe(characteristic).await {
            warn!("Failed to unsubscribe from {}: {}", characteristic.uuid, e);
        } else {
            debug!("Unsubscribed from {}", characteristic.uuid);
        }
    }

    /// Get the peripheral's notification stream.
    pub async fn notifications(
        &self,
    ) -> Result<Pin<Box<dyn Stream<Item = ValueNotification> + Send>>> {
        self.handle
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)
    }

    /// Write to a characteristic without response.
    pub async fn write_without_response(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> Result<()> {
        self.handle
            .peripheral
            .write(characteristic, data, WriteType::WithoutResponse)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Wrote {} bytes to {}", data.len(), characteristic.uuid);
        Ok(())
    }

    /// Release the connection. Best-effort: failure is logged, not
    /// propagated.
    pub async fn disconnect(&self) {
        match self.handle.peripheral.disconnect().await {
            Ok(()) => info!("Disconnected from {}", self.handle.identifier),
            Err(e) => warn!(
                "Failed to disconnect from {}: {}",
                self.handle.identifier, e
            ),
        }
        self.set_state(PeripheralState::Disconnected);
    }

    /// Mark the connection failed after an unrecoverable error.
    pub fn mark_failed(&self) {
        self.set_state(PeripheralState::Failed);
    }

    /// Update the connection state and emit an event.
    fn set_state(&self, new_state: PeripheralState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Peripheral state changed: {} -> {}", old_state, new_state);

            let _ = self.event_tx.send(PeripheralStateEvent {
                identifier: self.handle.identifier.clone(),
                state: new_state,
            });
        }
    }
}
