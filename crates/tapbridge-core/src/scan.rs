//! Card scan controller and the per-request delivery latch.
//!
//! [`ScanController::check_card`] issues one combined-mode NFC check against
//! the session's reader and returns a [`PendingScan`] as soon as the reader
//! accepted it. The outcome arrives later through the request's
//! [`ScanRequest`], which implements the reader callback.
//!
//! # Guarantees
//!
//! - At most one request is active against the reader. Before a new scan
//!   starts, the previous request is abandoned, the reader is told to
//!   cancel, and the controller waits a short settle delay so the kernel does
//!   not report a repeated call.
//! - Backgrounding or teardown while a check is still being issued wins:
//!   the check is rejected with [`ScanError::Interrupted`] and the reader is
//!   left idle.
//! - Each request delivers at most one [`ScanResult`]. The latch is an atomic
//!   `Armed → Resolved | Abandoned` transition shared by the reader callback
//!   thread and the watchdog, so neither path can deliver twice.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tapbridge_hardware::{CardMode, CardReader, CheckCardCallback, HardwareEvent};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::normalizer::{Disposition, ResultNormalizer};
use crate::result::ScanResult;
use crate::session::HardwareSession;

/// Message of the failure the watchdog delivers.
pub const WATCHDOG_TIMEOUT_MESSAGE: &str = "Error: timeout - no card presented";

const ARMED: u8 = 0;
const RESOLVED: u8 = 1;
const ABANDONED: u8 = 2;

/// Latch state of a [`ScanRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    /// Waiting for the first terminal event.
    Armed,

    /// A result was delivered.
    Resolved,

    /// Closed without a result (superseded, backgrounded or torn down).
    Abandoned,
}

impl fmt::Display for LatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Armed => write!(f, "Armed"),
            Self::Resolved => write!(f, "Resolved"),
            Self::Abandoned => write!(f, "Abandoned"),
        }
    }
}

/// One outstanding card check.
///
/// Registered with the reader as its callback. Events arriving after the
/// latch closed are dropped.
pub struct ScanRequest {
    id: u64,
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<ScanResult>>>,
    watchdog: Mutex<Option<AbortHandle>>,
    normalizer: ResultNormalizer,
}

impl ScanRequest {
    /// Create an armed request and the caller's side of it.
    pub fn new(id: u64, normalizer: ResultNormalizer) -> (Arc<Self>, PendingScan) {
        let (tx, rx) = oneshot::channel();
        let request = Arc::new(Self {
            id,
            state: AtomicU8::new(ARMED),
            sender: Mutex::new(Some(tx)),
            watchdog: Mutex::new(None),
            normalizer,
        });
        (request, PendingScan { id, rx })
    }

    /// Request identifier, unique per controller.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current latch state.
    pub fn state(&self) -> LatchState {
        match self.state.load(Ordering::Acquire) {
            ARMED => LatchState::Armed,
            RESOLVED => LatchState::Resolved,
            _ => LatchState::Abandoned,
        }
    }

    /// Check whether the request still accepts a result.
    pub fn is_armed(&self) -> bool {
        self.state() == LatchState::Armed
    }

    /// Deliver `result` if the request is still armed.
    ///
    /// Returns `true` if this call closed the latch.
    pub fn resolve(&self, result: ScanResult) -> bool {
        if !self.close(RESOLVED) {
            trace!(request = self.id, %result, "Dropping result for closed request");
            return false;
        }

        info!(request = self.id, %result, "Card check resolved");
        if let Some(tx) = self.take_sender()
            && tx.send(result).is_err()
        {
            debug!(request = self.id, "Caller no longer waiting for result");
        }
        true
    }

    /// Close the request without a result.
    ///
    /// Returns `true` if this call closed the latch.
    pub fn abandon(&self) -> bool {
        if !self.close(ABANDONED) {
            return false;
        }
        debug!(request = self.id, "Card check abandoned");
        drop(self.take_sender());
        true
    }

    /// Attach the watchdog task; it is aborted as soon as the latch closes.
    fn set_watchdog(&self, handle: AbortHandle) {
        *self.watchdog_slot() = Some(handle);
        // The latch may have closed before the handle was stored.
        if !self.is_armed()
            && let Some(handle) = self.watchdog_slot().take()
        {
            handle.abort();
        }
    }

    fn close(&self, to: u8) -> bool {
        let closed = self
            .state
            .compare_exchange(ARMED, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if closed && let Some(watchdog) = self.watchdog_slot().take() {
            trace!(request = self.id, "Stopping watchdog");
            watchdog.abort();
        }
        closed
    }

    fn watchdog_slot(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.watchdog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_sender(&self) -> Option<oneshot::Sender<ScanResult>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl CheckCardCallback for ScanRequest {
    fn on_event(&self, event: HardwareEvent) {
        if !self.is_armed() {
            trace!(
                request = self.id,
                callback = event.callback_name(),
                "Dropping event for closed request"
            );
            return;
        }

        match self.normalizer.normalize(&event) {
            Disposition::Resolve(result) => {
                self.resolve(result);
            }
            Disposition::Ignore(reason) => {
                debug!(
                    request = self.id,
                    callback = event.callback_name(),
                    ?reason,
                    "Reader event ignored"
                );
            }
        }
    }
}

impl fmt::Debug for ScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRequest")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Snapshot of a pending scan's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingState {
    /// No outcome yet.
    Pending,

    /// The outcome (consumed by this call).
    Ready(ScanResult),

    /// The request closed without a result, or the outcome was already taken.
    Closed,
}

/// Caller's handle on an accepted card check.
#[derive(Debug)]
pub struct PendingScan {
    id: u64,
    rx: oneshot::Receiver<ScanResult>,
}

impl PendingScan {
    /// Identifier of the underlying request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the outcome.
    ///
    /// Returns `None` if the request was abandoned without a result.
    pub async fn result(self) -> Option<ScanResult> {
        self.rx.await.ok()
    }

    /// Check for the outcome without waiting.
    pub fn try_result(&mut self) -> PendingState {
        match self.rx.try_recv() {
            Ok(result) => PendingState::Ready(result),
            Err(oneshot::error::TryRecvError::Empty) => PendingState::Pending,
            Err(oneshot::error::TryRecvError::Closed) => PendingState::Closed,
        }
    }
}

/// Issues card checks against the session's reader.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tapbridge_core::config::{ScanConfig, SessionConfig};
/// use tapbridge_core::scan::ScanController;
/// use tapbridge_core::session::HardwareSession;
/// use tapbridge_core::ScanResult;
/// use tapbridge_hardware::DeviceDescriptor;
/// use tapbridge_hardware::mock::MockKernel;
///
/// #[tokio::main]
/// async fn main() {
///     let (kernel, handle) = MockKernel::new();
///     let device = DeviceDescriptor::new("SUNMI").with_service_version(320);
///     let session = Arc::new(HardwareSession::new(
///         Arc::new(kernel),
///         Arc::new(device),
///         SessionConfig::default(),
///     ));
///     let scanner = ScanController::new(session, ScanConfig::default());
///
///     let pending = scanner.check_card().await.unwrap();
///     handle.reader().tap("04AABBCC");
///
///     assert_eq!(
///         pending.result().await,
///         Some(ScanResult::NfcTag { uuid: "04AABBCC".to_string() })
///     );
/// }
/// ```
pub struct ScanController {
    session: Arc<HardwareSession>,
    config: ScanConfig,
    normalizer: ResultNormalizer,
    active: Mutex<Option<Arc<ScanRequest>>>,
    issue: tokio::sync::Mutex<()>,
    epoch: AtomicU64,
    next_id: AtomicU64,
}

impl ScanController {
    /// Create a controller issuing scans through `session`.
    pub fn new(session: Arc<HardwareSession>, config: ScanConfig) -> Self {
        let normalizer = ResultNormalizer::from_config(&config);
        Self {
            session,
            config,
            normalizer,
            active: Mutex::new(None),
            issue: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<Arc<ScanRequest>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a card check.
    ///
    /// Returns once the reader accepted the request; the outcome is delivered
    /// through the returned [`PendingScan`]. Calls are serialized, and any
    /// previous request is abandoned and cancelled before the new one starts.
    ///
    /// # Errors
    ///
    /// - [`ScanError::NotConnected`] if the session has no reader (after one
    ///   reconnect attempt when `reconnect_on_check` is enabled). No request
    ///   is created.
    /// - [`ScanError::Remote`] if a vendor call fails.
    /// - [`ScanError::Interrupted`] if [`abandon_active`](Self::abandon_active)
    ///   ran while the check was being issued. The reader is left idle.
    pub async fn check_card(&self) -> Result<PendingScan, ScanError> {
        let _issuing = self.issue.lock().await;
        let epoch = self.epoch.load(Ordering::Acquire);

        let reader = self.ready_reader().await?;

        if let Some(previous) = self.active().take()
            && previous.abandon()
        {
            info!(request = previous.id(), "Superseding previous card check");
        }

        reader.cancel_check_card().map_err(|e| {
            warn!("Cancelling previous card check failed: {}", e);
            ScanError::Remote(e.to_string())
        })?;

        let settle = self.config.cancel_settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (request, pending) = ScanRequest::new(id, self.normalizer);
        *self.active() = Some(request.clone());

        if let Err(e) = self.still_current(epoch) {
            info!(request = id, "Card check dropped before start: {}", e);
            request.abandon();
            self.clear_active(id);
            return Err(e);
        }

        debug!(
            request = id,
            mode = %CardMode::COMBINED_NFC,
            timeout_secs = self.config.scan_timeout_secs,
            "Starting card check"
        );
        let callback: Arc<dyn CheckCardCallback> = request.clone();
        if let Err(e) = reader.check_card(
            CardMode::COMBINED_NFC,
            callback,
            self.config.scan_timeout_secs,
        ) {
            warn!(request = id, "Starting card check failed: {}", e);
            request.abandon();
            self.clear_active(id);
            return Err(ScanError::Remote(e.to_string()));
        }

        // Backgrounded while the reader call was in flight.
        if let Err(e) = self.still_current(epoch) {
            info!(request = id, "Card check dropped after start: {}", e);
            request.abandon();
            self.clear_active(id);
            if let Err(e) = reader.cancel_check_card() {
                warn!(request = id, "Cancelling interrupted card check failed: {}", e);
            }
            return Err(e);
        }

        self.spawn_watchdog(&request, reader);
        Ok(pending)
    }

    fn still_current(&self, epoch: u64) -> Result<(), ScanError> {
        if self.epoch.load(Ordering::Acquire) != epoch {
            return Err(ScanError::Interrupted);
        }
        if self.session.reader().is_none() {
            return Err(ScanError::NotConnected);
        }
        Ok(())
    }

    async fn ready_reader(&self) -> Result<Arc<dyn CardReader>, ScanError> {
        if let Some(reader) = self.session.reader() {
            return Ok(reader);
        }
        if !self.config.reconnect_on_check {
            return Err(ScanError::NotConnected);
        }

        debug!("Session not ready, reconnecting before card check");
        if let Err(e) = self.session.connect().await {
            warn!("Reconnect before card check failed: {}", e);
        }
        self.session.reader().ok_or(ScanError::NotConnected)
    }

    fn spawn_watchdog(&self, request: &Arc<ScanRequest>, reader: Arc<dyn CardReader>) {
        let Some(deadline) = self.config.watchdog_deadline() else {
            return;
        };
        let weak: Weak<ScanRequest> = Arc::downgrade(request);

        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let Some(request) = weak.upgrade() else {
                return;
            };
            if request.resolve(ScanResult::Failure {
                message: WATCHDOG_TIMEOUT_MESSAGE.to_string(),
            }) {
                warn!(
                    request = request.id(),
                    "No terminal reader event after {}ms",
                    deadline.as_millis()
                );
                if let Err(e) = reader.cancel_check_card() {
                    warn!("Cancelling timed out card check failed: {}", e);
                }
            }
        });
        request.set_watchdog(watchdog.abort_handle());
    }

    fn clear_active(&self, id: u64) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|request| request.id() == id) {
            *active = None;
        }
    }

    /// Ask the reader to stop the active scan.
    ///
    /// Advisory: no result is produced, and a terminal event the kernel had
    /// already queued may still resolve the request. No-op when the session
    /// is not connected. Failures are logged, never returned.
    ///
    /// Returns `true` if a cancel was sent to the reader.
    pub fn cancel(&self) -> bool {
        let Some(reader) = self.session.reader() else {
            debug!("Cancel requested while not connected");
            return false;
        };

        match reader.cancel_check_card() {
            Ok(()) => {
                debug!("Card check cancel sent");
                true
            }
            Err(e) => {
                warn!("Error cancelling card check: {}", e);
                false
            }
        }
    }

    /// Close the active request without a result.
    ///
    /// Also invalidates a check that is still being issued, which then fails
    /// with [`ScanError::Interrupted`] instead of starting the reader.
    ///
    /// Returns `true` if an armed request was abandoned.
    pub fn abandon_active(&self) -> bool {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.active().take().is_some_and(|request| request.abandon())
    }

    /// The active request, if any.
    pub fn active_request(&self) -> Option<Arc<ScanRequest>> {
        self.active().clone()
    }

    /// Check whether an armed request is outstanding.
    pub fn has_active_scan(&self) -> bool {
        self.active().as_ref().is_some_and(|request| request.is_armed())
    }

    /// Scan settings.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }
}

impl fmt::Debug for ScanController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanController")
            .field("config", &self.config)
            .field("active", &self.active_request())
            .finish_non_exhaustive()
    }
}
