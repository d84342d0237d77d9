//! Hardware session: the connection to the vendor payment kernel.
//!
//! A process owns exactly one [`HardwareSession`]. It gates the device's
//! capability, runs the kernel handshake, and hands out the card reader once
//! the kernel reports it ready.
//!
//! # States
//!
//! ```text
//!               connect()            on_connected(Some)
//! Disconnected ───────────► Connecting ───────────────► Connected
//!      ▲                        │                           │
//!      │   on_connected(None)   │                           │
//!      ├────────────────────────┘                           │
//!      │   on_disconnected / disconnect() / timeout         │
//!      └────────────────────────────────────────────────────┘
//! ```
//!
//! Transitions are driven by kernel callbacks, which may arrive on any
//! thread. Observers use [`HardwareSession::subscribe`]; nothing polls.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tapbridge_hardware::{CardReader, DeviceProbe, KernelListener, PayKernel};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::ConnectError;

/// Connection state of the kernel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No usable kernel connection.
    Disconnected,

    /// Handshake started, waiting for the kernel.
    Connecting,

    /// Kernel bound and card reader available.
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
        };
        write!(f, "{}", name)
    }
}

/// Successful outcome of [`HardwareSession::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// A new handshake completed.
    Connected,

    /// The session was already usable; nothing was re-initialized.
    AlreadyConnected,
}

impl ConnectStatus {
    /// Status string reported to the application layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::AlreadyConnected => "Already Connected",
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type HandshakeOutcome = Result<(), ConnectError>;

struct Inner {
    reader: Option<Arc<dyn CardReader>>,
    initialized: bool,
    pending: Option<oneshot::Sender<HandshakeOutcome>>,
    generation: u64,
    last_error: Option<ConnectError>,
    capability_error: Option<ConnectError>,
}

/// State shared with kernel listeners.
///
/// Lock order is always `inner`, then the `state` channel.
struct Shared {
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_handshake(&self, inner: &mut Inner, failure: ConnectError) {
        inner.generation += 1;
        inner.initialized = false;
        inner.pending = None;
        inner.reader = None;
        inner.last_error = Some(failure);
        self.set_state(SessionState::Disconnected);
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Session state changed");
        }
    }
}

/// Listener registered with the kernel for one handshake generation.
///
/// Callbacks from a generation that was superseded by `disconnect()` or a
/// timeout are ignored.
struct HandshakeListener {
    shared: Arc<Shared>,
    generation: u64,
}

impl KernelListener for HandshakeListener {
    fn on_connected(&self, reader: Option<Arc<dyn CardReader>>) {
        let mut inner = self.shared.lock();
        if inner.generation != self.generation {
            debug!(generation = self.generation, "Ignoring stale kernel connect");
            return;
        }

        let outcome = match reader {
            Some(reader) => {
                info!("Payment kernel connected");
                inner.reader = Some(reader);
                inner.last_error = None;
                self.shared.set_state(SessionState::Connected);
                Ok(())
            }
            None => {
                error!("Payment kernel connected without a card reader module");
                inner.reader = None;
                inner.last_error = Some(ConnectError::ReaderUnavailable);
                self.shared.set_state(SessionState::Disconnected);
                Err(ConnectError::ReaderUnavailable)
            }
        };

        if let Some(pending) = inner.pending.take() {
            let _ = pending.send(outcome);
        }
    }

    fn on_disconnected(&self) {
        let mut inner = self.shared.lock();
        if inner.generation != self.generation {
            debug!(generation = self.generation, "Ignoring stale kernel disconnect");
            return;
        }

        warn!("Payment kernel disconnected");
        inner.reader = None;
        self.shared.set_state(SessionState::Disconnected);

        if let Some(pending) = inner.pending.take() {
            inner.last_error = Some(ConnectError::Disconnected);
            let _ = pending.send(Err(ConnectError::Disconnected));
        }
    }
}

/// The process-wide connection to the payment kernel.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tapbridge_core::config::SessionConfig;
/// use tapbridge_core::session::{ConnectStatus, HardwareSession, SessionState};
/// use tapbridge_hardware::DeviceDescriptor;
/// use tapbridge_hardware::mock::MockKernel;
///
/// #[tokio::main]
/// async fn main() {
///     let (kernel, _handle) = MockKernel::new();
///     let device = DeviceDescriptor::new("SUNMI").with_service_version(320);
///     let session =
///         HardwareSession::new(Arc::new(kernel), Arc::new(device), SessionConfig::default());
///
///     assert_eq!(session.connect().await, Ok(ConnectStatus::Connected));
///     assert_eq!(session.connect().await, Ok(ConnectStatus::AlreadyConnected));
///     assert_eq!(session.state(), SessionState::Connected);
/// }
/// ```
pub struct HardwareSession {
    kernel: Arc<dyn PayKernel>,
    probe: Arc<dyn DeviceProbe>,
    config: SessionConfig,
    shared: Arc<Shared>,
}

impl HardwareSession {
    /// Create a disconnected session.
    pub fn new(
        kernel: Arc<dyn PayKernel>,
        probe: Arc<dyn DeviceProbe>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);

        Self {
            kernel,
            probe,
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    reader: None,
                    initialized: false,
                    pending: None,
                    generation: 0,
                    last_error: None,
                    capability_error: None,
                }),
                state,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Card reader of a connected session.
    pub fn reader(&self) -> Option<Arc<dyn CardReader>> {
        let inner = self.shared.lock();
        if self.state() == SessionState::Connected {
            inner.reader.clone()
        } else {
            None
        }
    }

    /// Check whether the session is connected and holds a reader.
    pub fn is_ready(&self) -> bool {
        self.reader().is_some()
    }

    /// The capability failure recorded by the last connect attempt, if any.
    pub fn capability_failure(&self) -> Option<ConnectError> {
        self.shared.lock().capability_error.clone()
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect to the payment kernel.
    ///
    /// Succeeds immediately when already connected. Otherwise checks the
    /// device, starts the kernel handshake and waits for its outcome, bounded
    /// by the configured handshake timeout. A caller arriving while another
    /// handshake is in flight waits for that handshake instead of starting a
    /// second one.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::UnsupportedDevice`] / [`ConnectError::NonFinancialHardware`]
    ///   when the device gate fails; no handshake is attempted.
    /// - [`ConnectError::ReaderUnavailable`] when the kernel has no reader.
    /// - [`ConnectError::Failed`], [`ConnectError::Disconnected`] or
    ///   [`ConnectError::Timeout`] when the handshake fails.
    pub async fn connect(&self) -> Result<ConnectStatus, ConnectError> {
        self.check_device()?;

        let generation = {
            let mut inner = self.shared.lock();
            match self.state() {
                SessionState::Connected if inner.reader.is_some() => {
                    debug!("Session already connected");
                    return Ok(ConnectStatus::AlreadyConnected);
                }
                SessionState::Connecting => None,
                _ => {
                    if inner.initialized
                        && let Some(reader) = self.kernel.card_reader()
                    {
                        info!("Reusing initialized payment kernel");
                        inner.reader = Some(reader);
                        inner.last_error = None;
                        self.shared.set_state(SessionState::Connected);
                        return Ok(ConnectStatus::AlreadyConnected);
                    }
                    inner.generation += 1;
                    inner.initialized = true;
                    inner.reader = None;
                    self.shared.set_state(SessionState::Connecting);
                    Some(inner.generation)
                }
            }
        };

        match generation {
            Some(generation) => self.handshake(generation).await,
            None => self.wait_for_handshake().await,
        }
    }

    fn check_device(&self) -> Result<(), ConnectError> {
        let device = self.probe.describe();

        let failure = if !device.is_vendor(&self.config.vendor_tag) {
            Some(ConnectError::UnsupportedDevice)
        } else {
            match device.service_version {
                Some(version) if version >= self.config.min_service_version => None,
                version => Some(ConnectError::NonFinancialHardware { version }),
            }
        };

        let mut inner = self.shared.lock();
        match failure {
            Some(failure) => {
                warn!(
                    manufacturer = ?device.manufacturer,
                    service_version = ?device.service_version,
                    min_service_version = self.config.min_service_version,
                    "Device rejected: {}",
                    failure
                );
                inner.capability_error = Some(failure.clone());
                Err(failure)
            }
            None => {
                inner.capability_error = None;
                Ok(())
            }
        }
    }

    async fn handshake(&self, generation: u64) -> Result<ConnectStatus, ConnectError> {
        let (tx, rx) = oneshot::channel();
        self.shared.lock().pending = Some(tx);
        let guard = HandshakeGuard {
            session: self,
            generation,
            armed: true,
        };

        info!("Starting payment kernel handshake");
        let listener = Arc::new(HandshakeListener {
            shared: self.shared.clone(),
            generation,
        });

        if let Err(e) = self.kernel.init(listener) {
            error!("Kernel initialization failed: {}", e);
            let failure = ConnectError::Failed(e.to_string());
            guard.abort(failure.clone());
            return Err(failure);
        }

        let timeout = self.config.connect_timeout();
        let outcome = tokio::time::timeout(timeout, rx).await;
        match outcome {
            Ok(Ok(Ok(()))) => {
                guard.disarm();
                Ok(ConnectStatus::Connected)
            }
            Ok(Ok(Err(failure))) => {
                guard.disarm();
                Err(failure)
            }
            Ok(Err(_)) => {
                guard.disarm();
                Err(ConnectError::Disconnected)
            }
            Err(_) => {
                let failure = ConnectError::Timeout {
                    ms: self.config.connect_timeout_ms,
                };
                warn!("Kernel handshake timed out after {}ms", timeout.as_millis());
                guard.abort(failure.clone());
                Err(failure)
            }
        }
    }

    fn abort_handshake(&self, generation: u64, failure: ConnectError) {
        let mut inner = self.shared.lock();
        if inner.generation != generation {
            return;
        }
        self.shared.reset_handshake(&mut inner, failure);
    }

    /// Reset a handshake nobody is waiting on any more.
    ///
    /// Leaves the session alone if the kernel already answered.
    fn abandon_handshake(&self, generation: u64) {
        let mut inner = self.shared.lock();
        if inner.generation != generation || inner.pending.is_none() {
            return;
        }
        warn!(generation, "Connect dropped mid-handshake, resetting session");
        self.shared.reset_handshake(
            &mut inner,
            ConnectError::Failed("handshake abandoned".to_string()),
        );
    }

    async fn wait_for_handshake(&self) -> Result<ConnectStatus, ConnectError> {
        debug!("Handshake in flight, waiting for its outcome");
        let mut rx = self.subscribe();
        let timeout = self.config.connect_timeout();

        let settled = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state != SessionState::Connecting),
        )
        .await
        .map(|waited| waited.map(|state| *state));

        match settled {
            Ok(Ok(SessionState::Connected)) => Ok(ConnectStatus::Connected),
            Ok(_) => Err(self
                .shared
                .lock()
                .last_error
                .clone()
                .unwrap_or(ConnectError::Disconnected)),
            Err(_) => Err(ConnectError::Timeout {
                ms: self.config.connect_timeout_ms,
            }),
        }
    }

    /// Release the kernel resource.
    ///
    /// No-op when the session is disconnected and the kernel was never
    /// initialized. A handshake in flight is abandoned.
    pub fn disconnect(&self) {
        self.release(false);
    }

    /// Release the kernel resource unconditionally (application teardown).
    pub fn teardown(&self) {
        self.release(true);
    }

    fn release(&self, force: bool) {
        {
            let mut inner = self.shared.lock();
            if !force && !inner.initialized && self.state() == SessionState::Disconnected {
                debug!("Session already disconnected");
                return;
            }
            inner.generation += 1;
            inner.initialized = false;
            inner.pending = None;
            inner.reader = None;
            self.shared.set_state(SessionState::Disconnected);
        }

        info!("Releasing payment kernel");
        self.kernel.destroy();
    }
}

/// Resets a handshake whose initiating `connect` was dropped before it
/// settled, so the session does not stay `Connecting`.
struct HandshakeGuard<'a> {
    session: &'a HardwareSession,
    generation: u64,
    armed: bool,
}

impl HandshakeGuard<'_> {
    fn abort(mut self, failure: ConnectError) {
        self.armed = false;
        self.session.abort_handshake(self.generation, failure);
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.abandon_handshake(self.generation);
        }
    }
}

impl fmt::Debug for HardwareSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareSession")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tapbridge_hardware::DeviceDescriptor;
    use tapbridge_hardware::mock::{HandshakeMode, MockKernel, MockKernelHandle};

    fn sunmi() -> DeviceDescriptor {
        DeviceDescriptor::new("SUNMI").with_service_version(320)
    }

    fn session_with(
        mode: HandshakeMode,
        device: DeviceDescriptor,
    ) -> (Arc<HardwareSession>, MockKernelHandle) {
        let (kernel, handle) = MockKernel::with_mode(mode);
        let session = HardwareSession::new(
            Arc::new(kernel),
            Arc::new(device),
            SessionConfig::default(),
        );
        (Arc::new(session), handle)
    }

    #[tokio::test]
    async fn test_connect_and_idempotence() {
        let (session, handle) = session_with(HandshakeMode::Auto, sunmi());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_ready());

        assert_eq!(session.connect().await, Ok(ConnectStatus::Connected));
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.is_ready());

        assert_eq!(session.connect().await, Ok(ConnectStatus::AlreadyConnected));
        assert_eq!(handle.init_calls(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_device() {
        let (session, handle) =
            session_with(HandshakeMode::Auto, DeviceDescriptor::new("Google"));

        let result = session.connect().await;
        assert_eq!(result, Err(ConnectError::UnsupportedDevice));
        assert_eq!(handle.init_calls(), 0);
        assert_eq!(session.capability_failure(), Some(ConnectError::UnsupportedDevice));
    }

    #[tokio::test]
    async fn test_non_financial_hardware() {
        let device = DeviceDescriptor::new("SUNMI").with_service_version(299);
        let (session, handle) = session_with(HandshakeMode::Auto, device);

        let result = session.connect().await;
        assert_eq!(
            result,
            Err(ConnectError::NonFinancialHardware { version: Some(299) })
        );
        assert_eq!(handle.init_calls(), 0);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_service_is_non_financial() {
        let (session, handle) = session_with(HandshakeMode::Auto, DeviceDescriptor::new("SUNMI"));

        let result = session.connect().await;
        assert_eq!(result, Err(ConnectError::NonFinancialHardware { version: None }));
        assert_eq!(handle.init_calls(), 0);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let device = DeviceDescriptor::new("SUNMI").with_service_version(300);
        let (session, _handle) = session_with(HandshakeMode::Auto, device);
        assert_eq!(session.connect().await, Ok(ConnectStatus::Connected));
        assert_eq!(session.capability_failure(), None);
    }

    #[tokio::test]
    async fn test_reader_unavailable() {
        let (session, _handle) = session_with(HandshakeMode::NoReader, sunmi());

        assert_eq!(session.connect().await, Err(ConnectError::ReaderUnavailable));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.reader().is_none());
    }

    #[tokio::test]
    async fn test_refused_handshake() {
        let (session, _handle) = session_with(HandshakeMode::Refuse, sunmi());

        assert_eq!(session.connect().await, Err(ConnectError::Disconnected));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_init_failure() {
        let (session, handle) = session_with(
            HandshakeMode::FailInit("service not bound".to_string()),
            sunmi(),
        );

        let result = session.connect().await;
        assert_eq!(
            result,
            Err(ConnectError::Failed(
                "Initialization failed: service not bound".to_string()
            ))
        );
        assert_eq!(session.state(), SessionState::Disconnected);

        handle.set_mode(HandshakeMode::Auto);
        assert_eq!(session.connect().await, Ok(ConnectStatus::Connected));
        assert_eq!(handle.init_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let (session, handle) = session_with(HandshakeMode::Manual, sunmi());

        let result = session.connect().await;
        assert_eq!(result, Err(ConnectError::Timeout { ms: 10_000 }));
        assert_eq!(session.state(), SessionState::Disconnected);

        // A late answer from the timed-out handshake is ignored.
        assert!(handle.complete_handshake(true));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.reader().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_connect_resets_handshake() {
        let (session, handle) = session_with(HandshakeMode::Manual, sunmi());

        let cut_short =
            tokio::time::timeout(Duration::from_millis(100), session.connect()).await;
        assert!(cut_short.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            session.shared.lock().last_error,
            Some(ConnectError::Failed("handshake abandoned".to_string()))
        );

        // The stale answer is ignored and the next connect starts afresh.
        assert!(handle.complete_handshake(true));
        assert!(session.reader().is_none());

        handle.set_mode(HandshakeMode::Auto);
        assert_eq!(session.connect().await, Ok(ConnectStatus::Connected));
        assert_eq!(handle.init_calls(), 2);
    }

    #[tokio::test]
    async fn test_dropped_connect_keeps_answered_handshake() {
        let (session, handle) = session_with(HandshakeMode::Manual, sunmi());

        let mut states = session.subscribe();

        let connecting = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });
        states
            .wait_for(|s| *s == SessionState::Connecting)
            .await
            .unwrap();

        // The kernel answers, then the caller goes away before reading it.
        assert!(handle.complete_handshake(true));
        connecting.abort();
        let _ = connecting.await;

        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_manual_handshake_and_concurrent_waiter() {
        let (session, handle) = session_with(HandshakeMode::Manual, sunmi());
        let mut states = session.subscribe();

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });
        states
            .wait_for(|s| *s == SessionState::Connecting)
            .await
            .unwrap();

        let second = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });
        tokio::task::yield_now().await;

        assert!(handle.complete_handshake(true));

        assert_eq!(first.await.unwrap(), Ok(ConnectStatus::Connected));
        assert!(second.await.unwrap().is_ok());
        assert_eq!(handle.init_calls(), 1);
    }

    #[tokio::test]
    async fn test_kernel_drop_then_reconnect() {
        let (session, handle) = session_with(HandshakeMode::Auto, sunmi());
        session.connect().await.unwrap();

        assert!(handle.drop_connection());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.reader().is_none());

        assert_eq!(session.connect().await, Ok(ConnectStatus::Connected));
        assert_eq!(handle.init_calls(), 2);
    }

    #[tokio::test]
    async fn test_reuses_initialized_kernel() {
        let (session, handle) = session_with(HandshakeMode::NoReader, sunmi());
        assert_eq!(session.connect().await, Err(ConnectError::ReaderUnavailable));

        // The kernel stays initialized and exposes its reader on the retry.
        assert_eq!(session.connect().await, Ok(ConnectStatus::AlreadyConnected));
        assert_eq!(handle.init_calls(), 1);
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (session, handle) = session_with(HandshakeMode::Auto, sunmi());

        session.disconnect();
        assert_eq!(handle.destroy_calls(), 0);

        session.connect().await.unwrap();
        session.disconnect();
        assert_eq!(handle.destroy_calls(), 1);
        assert_eq!(session.state(), SessionState::Disconnected);

        session.disconnect();
        assert_eq!(handle.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_teardown_is_unconditional() {
        let (session, handle) = session_with(HandshakeMode::Auto, sunmi());
        session.teardown();
        assert_eq!(handle.destroy_calls(), 1);
    }
}
