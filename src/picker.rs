//! Device picker: accumulates discovered peripherals and hands exactly one
//! selection back to the session.
//!
//! The selection wait is an explicit cancellable oneshot pair. At most one
//! wait is outstanding: registering a new wait cancels the prior one (it
//! resolves to [`Error::SelectionCancelled`]), and `clear` cancels any
//! pending wait the same way. A selection made while no wait is registered
//! is held and handed to the next waiter.

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::ble::scanner::PeripheralHandle;
use crate::error::{Error, Result};

/// Anything the picker can accumulate: identified by a stable string.
pub trait DeviceIdentity: Clone + Send + 'static {
    /// Stable identifier for deduplication and selection.
    fn identifier(&self) -> &str;

    /// Name shown to the user.
    fn display_name(&self) -> &str {
        self.identifier()
    }
}

impl DeviceIdentity for PeripheralHandle {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn display_name(&self) -> &str {
        PeripheralHandle::display_name(self)
    }
}

struct PickerInner<H> {
    /// Accumulated devices in discovery order.
    devices: Vec<H>,
    /// Selection made before any waiter registered.
    pending: Option<H>,
    /// The outstanding selection wait, if any.
    waiter: Option<oneshot::Sender<H>>,
}

/// Single-selection device picker fed by the scan coordinator.
pub struct DevicePicker<H: DeviceIdentity = PeripheralHandle> {
    inner: Mutex<PickerInner<H>>,
}

impl<H: DeviceIdentity> DevicePicker<H> {
    /// Create an empty picker.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PickerInner {
                devices: Vec::new(),
                pending: None,
                waiter: None,
            }),
        }
    }

    /// Add a discovered device. Idempotent: a second add for the same
    /// identifier is a no-op. Returns whether the device was newly added.
    pub fn add_device(&self, handle: H) -> bool {
        let mut inner = self.inner.lock();

        if inner
            .devices
            .iter()
            .any(|known| known.identifier() == handle.identifier())
        {
            return false;
        }

        debug!("Picker: added device {}", handle.display_name());
        inner.devices.push(handle);
        true
    }

    /// The accumulated devices, in discovery order.
    pub fn devices(&self) -> Vec<H> {
        self.inner.lock().devices.clone()
    }

    /// Number of accumulated devices.
    pub fn len(&self) -> usize {
        self.inner.lock().devices.len()
    }

    /// Whether no devices have been accumulated.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().devices.is_empty()
    }

    /// Reset to empty and cancel any outstanding wait.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.devices.clear();
        inner.pending = None;
        // Dropping the sender resolves the waiter with SelectionCancelled.
        inner.waiter.take();
        debug!("Picker: cleared");
    }

    /// Record the user's choice by identifier, resolving the outstanding
    /// wait if one is registered.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when the identifier is not in the accumulated
    /// list.
    pub fn select(&self, identifier: &str) -> Result<()> {
        let mut inner = self.inner.lock();

        let handle = inner
            .devices
            .iter()
            .find(|known| known.identifier() == identifier)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown device selected: {identifier}")))?;

        match inner.waiter.take() {
            Some(waiter) => {
                // A send can only fail if the waiter went away; hold the
                // selection for the next wait instead of losing it.
                if let Err(handle) = waiter.send(handle) {
                    inner.pending = Some(handle);
                }
            }
            None => inner.pending = Some(handle),
        }

        Ok(())
    }

    /// Wait until a device is selected.
    ///
    /// Registering a new wait cancels the prior one, which resolves to
    /// [`Error::SelectionCancelled`].
    pub async fn wait_for_selection(&self) -> Result<H> {
        let rx = {
            let mut inner = self.inner.lock();

            if let Some(handle) = inner.pending.take() {
                return Ok(handle);
            }

            let (tx, rx) = oneshot::channel();
            // Replacing the slot drops any prior sender, cancelling its wait.
            inner.waiter = Some(tx);
            rx
        };

        rx.await.map_err(|_| Error::SelectionCancelled)
    }
}

impl<H: DeviceIdentity> Default for DevicePicker<H> {
    fn default() -> Self {
        Self::new()
    }
}
