//! Session controller.
//!
//! Orchestrates one monitoring run: scan, pick, connect, discover, resolve
//! the serial endpoint, subscribe, reassemble, publish, tear down — with a
//! self-throttling location poll loop running concurrently. The controller
//! is a pure engine: it owns all session state and emits [`SessionEvent`]s
//! for a presentation layer, which holds no protocol logic of its own.
//!
//! The BLE and GPS branches are independent. Either may be absent (no
//! adapter, no permission) without affecting the other.

use async_trait::async_trait;
use btleplug::api::{Characteristic, ValueNotification};
use parking_lot::{Mutex, RwLock};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use futures::stream::{Stream, StreamExt};

use crate::ble::connection::ConnectionManager;
use crate::ble::resolver::resolve;
use crate::ble::scanner::{BleScanner, PeripheralHandle};
use crate::config::{CommandProfile, Config};
use crate::error::{Error, Result};
use crate::location::{LocationProvider, LocationRequest, LocationSample};
use crate::picker::DevicePicker;
use crate::protocol::reassembler::{CompletedFrame, FrameReassembler};
use crate::publish::TelemetryPublisher;

/// Lifecycle state of a monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No session running.
    #[default]
    Idle,
    /// Peripheral discovery in progress.
    Scanning,
    /// Waiting for the user to choose a peripheral.
    AwaitingSelection,
    /// Connect handshake in progress.
    Connecting,
    /// Service/characteristic discovery in progress.
    DiscoveringServices,
    /// Locating the serial endpoint in the service catalog.
    ResolvingCharacteristic,
    /// Receiving and reassembling the notification stream.
    Subscribed,
    /// Teardown in progress.
    Stopping,
    /// An unrecoverable error ended the session. The only exit is back to
    /// `Idle` via an explicit stop.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::AwaitingSelection => write!(f, "AwaitingSelection"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "DiscoveringServices"),
            Self::ResolvingCharacteristic => write!(f, "ResolvingCharacteristic"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Event emitted by the session for consumption by a presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session state changed.
    StateChanged(SessionState),
    /// A complete frame was reassembled from the notification stream.
    Frame(CompletedFrame),
    /// A location sample was polled.
    Location(LocationSample),
    /// A BLE error ended the BLE branch. Recoverable: the rest of the app
    /// keeps running, the session does not auto-restart.
    BleError(String),
    /// An unexpected, non-BLE error. Fatal to the session.
    Fatal(String),
}

/// Live task handles for one monitoring run. The stop channel is the single
/// source of truth for "monitoring started".
struct SessionTasks {
    stop_tx: watch::Sender<bool>,
    ble: Option<tokio::task::JoinHandle<()>>,
    location: Option<tokio::task::JoinHandle<()>>,
}

/// Orchestrates the full monitoring lifecycle.
pub struct SessionController {
    config: Config,
    scanner: Option<Arc<BleScanner>>,
    location: Option<Arc<dyn LocationProvider>>,
    publisher: Arc<TelemetryPublisher>,
    picker: Arc<DevicePicker<PeripheralHandle>>,
    state: Arc<RwLock<SessionState>>,
    event_tx: broadcast::Sender<SessionEvent>,
    tasks: Mutex<Option<SessionTasks>>,
}

impl SessionController {
    /// Create a controller.
    ///
    /// `scanner` is `None` when Bluetooth is unavailable and `location` is
    /// `None` when no location source exists; the corresponding branch of
    /// monitoring is skipped entirely.
    pub fn new(
        config: Config,
        scanner: Option<Arc<BleScanner>>,
        location: Option<Arc<dyn LocationProvider>>,
        publisher: Arc<TelemetryPublisher>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            config,
            scanner,
            location,
            publisher,
            picker: Arc::new(DevicePicker::new()),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            event_tx,
            tasks: Mutex::new(None),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether a monitoring run is active.
    pub fn is_active(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// The device picker the presentation layer renders and selects from.
    pub fn picker(&self) -> &Arc<DevicePicker<PeripheralHandle>> {
        &self.picker
    }

    /// Start monitoring. Idempotent: starting while already active is a
    /// no-op.
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            debug!("Monitoring already started, ignoring start request");
            return Ok(());
        }

        info!("Starting monitoring session");

        let (stop_tx, stop_rx) = watch::channel(false);

        let ble = match &self.scanner {
            Some(scanner) => {
                let branch = BleBranch {
                    config: self.config.clone(),
                    scanner: scanner.clone(),
                    picker: self.picker.clone(),
                    publisher: self.publisher.clone(),
                    state: self.state.clone(),
                    event_tx: self.event_tx.clone(),
                };
                Some(tokio::spawn(branch.run(stop_rx.clone())))
            }
            None => {
                info!("Bluetooth unavailable, skipping BLE branch");
                None
            }
        };

        let location = match &self.location {
            Some(provider) => Some(tokio::spawn(run_location_branch(
                provider.clone(),
                self.publisher.clone(),
                self.event_tx.clone(),
                stop_rx,
                self.config.location_poll_interval(),
            ))),
            None => {
                info!("Location unavailable, skipping GPS branch");
                None
            }
        };

        *tasks = Some(SessionTasks {
            stop_tx,
            ble,
            location,
        });

        Ok(())
    }

    /// Stop monitoring: cancel the notification subscription, release the
    /// connection (best-effort), clear the picker, let the in-flight
    /// location poll finish naturally, and return to `Idle`.
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            debug!("Monitoring not started, ignoring stop request");
            return;
        };

        info!("Stopping monitoring session");
        set_state(&self.state, &self.event_tx, SessionState::Stopping);

        let _ = tasks.stop_tx.send(true);

        if let Some(handle) = tasks.ble {
            let _ = handle.await;
        }
        if let Some(handle) = tasks.location {
            let _ = handle.await;
        }

        self.picker.clear();
        set_state(&self.state, &self.event_tx, SessionState::Idle);
    }
}

fn set_state(
    state: &RwLock<SessionState>,
    event_tx: &broadcast::Sender<SessionEvent>,
    new_state: SessionState,
) {
    let changed = {
        let mut state = state.write();
        if *state == new_state {
            false
        } else {
            debug!("Session state changed: {} -> {}", *state, new_state);
            *state = new_state;
            true
        }
    };

    if changed {
        let _ = event_tx.send(SessionEvent::StateChanged(new_state));
    }
}

/// The BLE half of a monitoring run.
struct BleBranch {
    config: Config,
    scanner: Arc<BleScanner>,
    picker: Arc<DevicePicker<PeripheralHandle>>,
    publisher: Arc<TelemetryPublisher>,
    state: Arc<RwLock<SessionState>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl BleBranch {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let result = self.drive(&mut stop_rx).await;
        report_ble_result(result, &self.state, &self.event_tx);
    }

    async fn drive(&self, stop_rx: &mut watch::Receiver<bool>) -> Result<()> {
        set_state(&self.state, &self.event_tx, SessionState::Scanning);

        let mut discoveries = self.scanner.subscribe();
        self.scanner.start_scan().await?;

        set_state(&self.state, &self.event_tx, SessionState::AwaitingSelection);

        let wait = self.picker.wait_for_selection();
        tokio::pin!(wait);

        let selected = loop {
            tokio::select! {
                selection = &mut wait => {
                    match selection {
                        Ok(handle) => break handle,
                        Err(Error::SelectionCancelled) => {
                            self.scanner.stop_scan().await;
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }
                discovery = discoveries.recv() => {
                    if let Ok(handle) = discovery {
                        self.picker.add_device(handle);
                    }
                }
                _ = stop_rx.changed() => {
                    self.scanner.stop_scan().await;
                    return Ok(());
                }
            }
        };

        // Scanning stops the instant a selection resolves. Best-effort: a
        // failure to stop the scan must not discard the user's selection.
        self.scanner.stop_scan().await;

        info!("Selected peripheral {}", selected.display_name());
        let connection = ConnectionManager::new(selected);

        let result = self.run_connected(&connection, stop_rx).await;

        // Teardown runs for clean stops and errors alike. Releasing the
        // connection is best-effort.
        set_state(&self.state, &self.event_tx, SessionState::Stopping);
        connection.disconnect().await;
        self.picker.clear();

        result
    }

    async fn run_connected(
        &self,
        connection: &ConnectionManager,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        set_state(&self.state, &self.event_tx, SessionState::Connecting);
        connection.connect(self.config.connect_timeout()).await?;

        set_state(&self.state, &self.event_tx, SessionState::DiscoveringServices);
        let catalog = connection.discover_services().await?;

        set_state(
            &self.state,
            &self.event_tx,
            SessionState::ResolvingCharacteristic,
        );
        let profile = &self.config.profile;
        let endpoint = resolve(&catalog, &profile.service_short_id, &profile.notify_short_id)?;
        let notify_char = connection.characteristic(&endpoint.characteristic_uuid)?;

        // Request/response peripherals need a handshake and a periodic
        // command write to produce any notifications at all; resolve those
        // endpoints up front so a structural mismatch fails here, not
        // mid-stream.
        let command = match &profile.command {
            Some(command_profile) => {
                let poll_endpoint = resolve(
                    &catalog,
                    &profile.service_short_id,
                    &command_profile.poll_characteristic,
                )?;
                let poll = connection.characteristic(&poll_endpoint.characteristic_uuid)?;

                let handshake = match &command_profile.handshake_characteristic {
                    Some(handshake_short) => {
                        let handshake_endpoint =
                            resolve(&catalog, &profile.service_short_id, handshake_short)?;
                        Some(connection.characteristic(&handshake_endpoint.characteristic_uuid)?)
                    }
                    None => None,
                };

                Some((
                    PeripheralCommands {
                        connection,
                        handshake,
                        poll,
                    },
                    command_profile.clone(),
                ))
            }
            None => None,
        };

        let notifications = connection.notifications().await?;
        connection.subscribe_notifications(&notify_char).await?;

        set_state(&self.state, &self.event_tx, SessionState::Subscribed);

        let result = pump_notifications(
            &self.publisher,
            &self.event_tx,
            self.config.max_frame_bytes,
            notify_char.uuid,
            notifications,
            command
                .as_ref()
                .map(|(link, command_profile)| (link as &dyn CommandLink, command_profile)),
            stop_rx,
        )
        .await;

        connection.unsubscribe_notifications(&notify_char).await;
        result
    }
}

/// Write access to a connected peripheral's command characteristics.
///
/// The serial profile never sees this; it exists so the notification pump
/// stays independent of the BLE transport.
#[async_trait]
trait CommandLink: Send + Sync {
    /// One-time write issued after subscribing, before polling starts.
    async fn write_handshake(&self, payload: &[u8]) -> Result<()>;
    /// Periodic poll command write.
    async fn write_poll(&self, payload: &[u8]) -> Result<()>;
}

struct PeripheralCommands<'a> {
    connection: &'a ConnectionManager,
    handshake: Option<Characteristic>,
    poll: Characteristic,
}

#[async_trait]
impl CommandLink for PeripheralCommands<'_> {
    async fn write_handshake(&self, payload: &[u8]) -> Result<()> {
        match &self.handshake {
            Some(characteristic) => {
                self.connection
                    .write_without_response(characteristic, payload)
                    .await
            }
            None => Ok(()),
        }
    }

    async fn write_poll(&self, payload: &[u8]) -> Result<()> {
        self.connection
            .write_without_response(&self.poll, payload)
            .await
    }
}

/// Pump the notification stream into the reassembler and publisher until a
/// stop is requested or the stream fails.
///
/// Notifications from other characteristics are ignored. When a command
/// profile is present, its handshake is written exactly once before any
/// polling, and the poll payload is written on each interval tick.
#[allow(clippy::too_many_arguments)]
async fn pump_notifications(
    publisher: &TelemetryPublisher,
    event_tx: &broadcast::Sender<SessionEvent>,
    max_frame_bytes: usize,
    notify_uuid: Uuid,
    mut notifications: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    command: Option<(&dyn CommandLink, &CommandProfile)>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    if let Some((link, command_profile)) = &command {
        if command_profile.handshake_characteristic.is_some() {
            link.write_handshake(&command_profile.handshake_payload)
                .await?;
        }
    }

    // The dummy period keeps the select arm well-formed when no command
    // profile exists; the guard disables it.
    let command_period = command
        .as_ref()
        .map(|(_, command_profile)| command_profile.poll_interval())
        .unwrap_or(Duration::from_secs(3600));
    let mut command_interval = tokio::time::interval(command_period);
    command_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut reassembler = FrameReassembler::new(max_frame_bytes);

    loop {
        tokio::select! {
            notification = notifications.next() => {
                match notification {
                    Some(notification) => {
                        if notification.uuid != notify_uuid {
                            continue;
                        }
                        match reassembler.push(&notification.value) {
                            Ok(Some(frame)) => {
                                let _ = event_tx.send(SessionEvent::Frame(frame.clone()));
                                publisher.publish_frame(&frame).await;
                            }
                            Ok(None) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    None => {
                        return Err(Error::ConnectionFailed {
                            reason: "notification stream ended".to_string(),
                        });
                    }
                }
            }
            _ = command_interval.tick(), if command.is_some() => {
                if let Some((link, command_profile)) = &command {
                    link.write_poll(&command_profile.poll_payload).await?;
                }
            }
            _ = stop_rx.changed() => return Ok(()),
        }
    }
}

/// Map the outcome of the BLE branch onto session state and events.
///
/// BLE conditions end the session but leave the rest of the app running;
/// anything else is unexpected and is never swallowed silently.
fn report_ble_result(
    result: Result<()>,
    state: &RwLock<SessionState>,
    event_tx: &broadcast::Sender<SessionEvent>,
) {
    match result {
        Ok(()) => {}
        Err(e)
            if e.is_transport()
                || e.is_protocol_structure()
                || matches!(e, Error::FrameOverflow { .. } | Error::InvalidData { .. }) =>
        {
            warn!("BLE session ended with error: {}", e);
            set_state(state, event_tx, SessionState::Failed);
            let _ = event_tx.send(SessionEvent::BleError(e.to_string()));
        }
        Err(e) => {
            error!("Unexpected error in BLE session: {}", e);
            set_state(state, event_tx, SessionState::Failed);
            let _ = event_tx.send(SessionEvent::Fatal(e.to_string()));
        }
    }
}

/// The GPS half of a monitoring run.
///
/// Self-throttling: a new poll is only issued after the previous one's
/// result has been observed, and the stop check runs after each poll
/// completes, so an in-flight poll finishes naturally rather than being
/// aborted mid-flight.
async fn run_location_branch(
    provider: Arc<dyn LocationProvider>,
    publisher: Arc<TelemetryPublisher>,
    event_tx: broadcast::Sender<SessionEvent>,
    mut stop_rx: watch::Receiver<bool>,
    period: Duration,
) {
    let request = LocationRequest::default();

    if let Err(e) = provider.request_permission().await {
        warn!("Location permission denied, skipping GPS branch: {}", e);
        return;
    }

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }

        match provider.current_position(&request).await {
            Ok(sample) => {
                let _ = event_tx.send(SessionEvent::Location(sample));
                publisher.publish_location(&sample).await;
            }
            Err(e) => debug!("Location poll failed: {}", e),
        }

        if *stop_rx.borrow() {
            break;
        }
        debug!("Completed location poll");
    }

    debug!("Location poll loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolProfile;
    use crate::publish::test_support::RecordingSink;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProvider {
        sample: LocationSample,
        poll_delay: Duration,
        deny_permission: bool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        polls: AtomicUsize,
    }

    impl MockProvider {
        fn new() -> Self {
            Self {
                sample: LocationSample {
                    latitude: 45.5,
                    longitude: -73.6,
                    altitude: 35.0,
                    timestamp: 1_700_000_000_000,
                },
                poll_delay: Duration::ZERO,
                deny_permission: false,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                poll_delay: delay,
                ..Self::new()
            }
        }

        fn denying() -> Self {
            Self {
                deny_permission: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl LocationProvider for MockProvider {
        async fn request_permission(&self) -> Result<()> {
            if self.deny_permission {
                return Err(Error::PermissionDenied {
                    subsystem: "location".into(),
                });
            }
            Ok(())
        }

        async fn current_position(&self, _request: &LocationRequest) -> Result<LocationSample> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.poll_delay.is_zero() {
                tokio::time::sleep(self.poll_delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.sample)
        }
    }

    fn controller_with(
        provider: Option<Arc<MockProvider>>,
        sink: Arc<RecordingSink>,
    ) -> SessionController {
        let config = Config::default();
        let publisher = Arc::new(TelemetryPublisher::new(
            sink,
            config.frame_topic.clone(),
            config.gps_topic.clone(),
        ));
        SessionController::new(
            config,
            None,
            provider.map(|p| p as Arc<dyn LocationProvider>),
            publisher,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_branch_runs_without_ble() {
        let provider = Arc::new(MockProvider::new());
        let sink = Arc::new(RecordingSink::new());
        let controller = controller_with(Some(provider.clone()), sink.clone());

        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        // Polls at t = 1s, 2s, 3s; no BLE activity whatsoever.
        assert_eq!(sink.count_for("Rise-GPS-Position"), 3);
        assert_eq!(sink.count_for("Rise-ble-Data"), 0);

        controller.stop().await;
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_branches_is_inert() {
        let sink = Arc::new(RecordingSink::new());
        let controller = controller_with(None, sink.clone());

        controller.start().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(sink.published.lock().is_empty());

        controller.stop().await;
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_is_self_throttling() {
        // Each poll takes 2.5x the nominal period; polls must never overlap.
        let provider = Arc::new(MockProvider::slow(Duration::from_millis(2_500)));
        let sink = Arc::new(RecordingSink::new());
        let controller = controller_with(Some(provider.clone()), sink.clone());

        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(11_000)).await;
        controller.stop().await;

        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
        let polls = provider.polls.load(Ordering::SeqCst);
        assert!((2..=4).contains(&polls), "expected 2..=4 polls, got {polls}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let provider = Arc::new(MockProvider::new());
        let sink = Arc::new(RecordingSink::new());
        let controller = controller_with(Some(provider), sink.clone());

        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        controller.stop().await;

        let published = sink.count_for("Rise-GPS-Position");
        assert_eq!(published, 3);

        // The next interval tick after the stop request is skipped.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.count_for("Rise-GPS-Position"), published);
        assert!(!controller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denial_kills_gps_branch_only() {
        let provider = Arc::new(MockProvider::denying());
        let sink = Arc::new(RecordingSink::new());
        let controller = controller_with(Some(provider.clone()), sink.clone());

        controller.start().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(provider.polls.load(Ordering::SeqCst), 0);
        assert!(sink.published.lock().is_empty());

        controller.stop().await;
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let provider = Arc::new(MockProvider::new());
        let sink = Arc::new(RecordingSink::new());
        let controller = controller_with(Some(provider), sink.clone());

        controller.start().unwrap();
        controller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        // A second start spawned no second poll loop.
        assert_eq!(sink.count_for("Rise-GPS-Position"), 2);

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let sink = Arc::new(RecordingSink::new());
        let controller = controller_with(None, sink);
        controller.stop().await;
        assert_eq!(controller.state(), SessionState::Idle);
    }

    fn notification_channel() -> (
        mpsc::UnboundedSender<ValueNotification>,
        Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    ) {
        let (tx, rx) = mpsc::unbounded();
        (tx, Box::pin(rx))
    }

    fn test_publisher(sink: Arc<RecordingSink>) -> TelemetryPublisher {
        TelemetryPublisher::new(sink, "Rise-ble-Data", "Rise-GPS-Position")
    }

    #[derive(Default)]
    struct RecordingCommands {
        writes: Mutex<Vec<&'static str>>,
    }

    impl RecordingCommands {
        fn count(&self, kind: &str) -> usize {
            self.writes.lock().iter().filter(|w| **w == kind).count()
        }
    }

    #[async_trait]
    impl CommandLink for RecordingCommands {
        async fn write_handshake(&self, _payload: &[u8]) -> Result<()> {
            self.writes.lock().push("handshake");
            Ok(())
        }

        async fn write_poll(&self, _payload: &[u8]) -> Result<()> {
            self.writes.lock().push("poll");
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bms_handshake_written_once_before_polling() {
        let sink = Arc::new(RecordingSink::new());
        let publisher = test_publisher(sink);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let commands = RecordingCommands::default();
        let profile = ProtocolProfile::bms().command.unwrap();
        let (_notify_tx, stream) = notification_channel();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let pump = pump_notifications(
            &publisher,
            &event_tx,
            1024,
            Uuid::from_u128(0x17),
            stream,
            Some((&commands as &dyn CommandLink, &profile)),
            &mut stop_rx,
        );
        tokio::pin!(pump);

        tokio::select! {
            result = &mut pump => panic!("pump ended early: {result:?}"),
            _ = tokio::time::sleep(Duration::from_millis(2_500)) => {}
        }

        assert_eq!(commands.writes.lock().first(), Some(&"handshake"));
        assert_eq!(commands.count("handshake"), 1);
        // Poll writes at t = 0s, 1s, 2s.
        assert_eq!(commands.count("poll"), 3);

        stop_tx.send(true).unwrap();
        pump.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_command_follows_configured_cadence() {
        let sink = Arc::new(RecordingSink::new());
        let publisher = test_publisher(sink);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let commands = RecordingCommands::default();
        let profile = CommandProfile {
            handshake_characteristic: None,
            handshake_payload: Vec::new(),
            poll_characteristic: "15".to_string(),
            poll_payload: b"90".to_vec(),
            poll_interval_ms: 2_000,
        };
        let (_notify_tx, stream) = notification_channel();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let pump = pump_notifications(
            &publisher,
            &event_tx,
            1024,
            Uuid::from_u128(0x17),
            stream,
            Some((&commands as &dyn CommandLink, &profile)),
            &mut stop_rx,
        );
        tokio::pin!(pump);

        tokio::select! {
            result = &mut pump => panic!("pump ended early: {result:?}"),
            _ = tokio::time::sleep(Duration::from_millis(5_000)) => {}
        }

        // No handshake characteristic configured, so no handshake write;
        // polls at t = 0s, 2s, 4s.
        assert_eq!(commands.count("handshake"), 0);
        assert_eq!(commands.count("poll"), 3);

        stop_tx.send(true).unwrap();
        pump.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_reassembled_and_published() {
        let sink = Arc::new(RecordingSink::new());
        let publisher = test_publisher(sink.clone());
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let (notify_tx, stream) = notification_channel();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let notify = Uuid::from_u128(0xffe1);
        let other = Uuid::from_u128(0xffe2);
        for (uuid, value) in [
            (notify, b"AB".to_vec()),
            (other, b"IGNOREDend".to_vec()),
            (notify, b"CDend".to_vec()),
        ] {
            notify_tx
                .unbounded_send(ValueNotification { uuid, value })
                .unwrap();
        }

        let pump = pump_notifications(
            &publisher,
            &event_tx,
            1024,
            notify,
            stream,
            None,
            &mut stop_rx,
        );
        tokio::pin!(pump);

        tokio::select! {
            result = &mut pump => panic!("pump ended early: {result:?}"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }

        stop_tx.send(true).unwrap();
        pump.await.unwrap();

        // One frame from the monitored characteristic; the foreign
        // characteristic's payload never reached the reassembler.
        let published = sink.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "Rise-ble-Data");
        assert_eq!(published[0].1, b"ABCD".to_vec());

        let event = event_rx.try_recv().unwrap();
        assert!(matches!(event, SessionEvent::Frame(frame) if frame.payload() == b"ABCD"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reassembly_overflow_fails_session() {
        let sink = Arc::new(RecordingSink::new());
        let publisher = test_publisher(sink.clone());
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let (notify_tx, stream) = notification_channel();
        let (_stop_tx, mut stop_rx) = watch::channel(false);

        let notify = Uuid::from_u128(0xffe1);
        notify_tx
            .unbounded_send(ValueNotification {
                uuid: notify,
                value: vec![0u8; 32],
            })
            .unwrap();

        let err = pump_notifications(&publisher, &event_tx, 16, notify, stream, None, &mut stop_rx)
            .await
            .unwrap_err();
        assert!(matches!(&err, Error::FrameOverflow { .. }));

        let state = Arc::new(RwLock::new(SessionState::Subscribed));
        report_ble_result(Err(err), &state, &event_tx);

        assert_eq!(*state.read(), SessionState::Failed);
        let mut saw_ble_error = false;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, SessionEvent::BleError(_)) {
                saw_ble_error = true;
            }
        }
        assert!(saw_ble_error);
        assert!(sink.published.lock().is_empty());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(format!("{}", SessionState::Idle), "Idle");
        assert_eq!(
            format!("{}", SessionState::ResolvingCharacteristic),
            "ResolvingCharacteristic"
        );
    }
}
