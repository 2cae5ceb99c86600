//! BLE scanning.
//!
//! Drives peripheral discovery and surfaces each device exactly once: a
//! peripheral already seen during the current scan is not re-emitted, so
//! downstream selection state is never reset by repeat advertisements.

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};

/// A discovered BLE peripheral: stable identifier plus connection capability.
#[derive(Debug, Clone)]
pub struct PeripheralHandle {
    /// Stable identifier for this peripheral.
    pub identifier: String,
    /// Human-readable local name, when advertised.
    pub name: Option<String>,
    /// The underlying platform peripheral.
    pub peripheral: Peripheral,
}

impl PeripheralHandle {
    /// The name to show a user: local name when advertised, identifier
    /// otherwise.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identifier)
    }
}

/// Scan coordinator: starts/stops discovery and broadcasts each newly seen
/// peripheral.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Identifiers already surfaced during the current scan.
    seen: Arc<RwLock<HashSet<String>>>,
    /// Channel for discovery events.
    event_tx: broadcast::Sender<PeripheralHandle>,
    /// Handle to the scanning task.
    scan_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl BleScanner {
    /// Create a new BLE scanner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if no Bluetooth adapter is
    /// present or the radio is disabled.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            adapter,
            is_scanning: Arc::new(RwLock::new(false)),
            seen: Arc::new(RwLock::new(HashSet::new())),
            event_tx,
            scan_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start scanning. Idempotent: a second start while already scanning is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// A scan-level error here aborts the scan and is fatal to the session;
    /// it is not retried automatically.
    pub async fn start_scan(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan");

        self.seen.write().clear();

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let is_scanning = self.is_scanning.clone();
        let seen = self.seen.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    *is_scanning.write() = false;
                    return;
                }
            };

            while *is_scanning.read() {
                tokio::select! {
                    Some(event) = events.next() => {
                        Self::handle_event(event, &adapter, &seen, &event_tx).await;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        if !*is_scanning.read() {
                            break;
                        }
                    }
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop scanning. Best-effort: an adapter failure here is logged, not
    /// propagated — the scan flag and event loop are torn down regardless,
    /// and a selection already made must not be lost to a stop hiccup.
    pub async fn stop_scan(&self) {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return;
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop adapter scan: {}", e);
        }

        let handle = self.scan_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Subscribe to discovery events. Each peripheral is emitted at most
    /// once per scan.
    pub fn subscribe(&self) -> broadcast::Receiver<PeripheralHandle> {
        self.event_tx.subscribe()
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Handle a BLE central event.
    async fn handle_event(
        event: btleplug::api::CentralEvent,
        adapter: &Adapter,
        seen: &Arc<RwLock<HashSet<String>>>,
        event_tx: &broadcast::Sender<PeripheralHandle>,
    ) {
        use btleplug::api::CentralEvent;

        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device event: {:?}", id);
                Self::process_peripheral(adapter, id, seen, event_tx).await;
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
            }
            _ => {}
        }
    }

    /// Surface a peripheral if it has not been seen during this scan.
    async fn process_peripheral(
        adapter: &Adapter,
        id: btleplug::platform::PeripheralId,
        seen: &Arc<RwLock<HashSet<String>>>,
        event_tx: &broadcast::Sender<PeripheralHandle>,
    ) {
        let identifier = id.to_string();

        // Deduplicate before touching the peripheral at all; repeat
        // advertisements are the common case.
        if seen.read().contains(&identifier) {
            return;
        }

        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let name = match peripheral.properties().await {
            Ok(Some(properties)) => properties.local_name,
            _ => None,
        };

        if !seen.write().insert(identifier.clone()) {
            return;
        }

        debug!(
            "Discovered peripheral {} ({})",
            identifier,
            name.as_deref().unwrap_or("unnamed")
        );

        let _ = event_tx.send(PeripheralHandle {
            identifier,
            name,
            peripheral,
        });
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_handle_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<PeripheralHandle>();
    }
}
