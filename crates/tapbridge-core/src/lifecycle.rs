//! Host application lifecycle handling.
//!
//! The card reader is shared with other applications on the terminal, so the
//! bridge releases it when the host goes to the background and restores the
//! session when it comes back. None of these hooks has a caller to report
//! to: failures are logged and swallowed.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::scan::ScanController;
use crate::session::HardwareSession;

/// Host application transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The application moved to the background.
    Pause,

    /// The application returned to the foreground.
    Resume,

    /// The application is being torn down.
    Destroy,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Reacts to lifecycle transitions on behalf of the session and scanner.
#[derive(Debug, Clone)]
pub struct LifecycleAdapter {
    session: Arc<HardwareSession>,
    scanner: Arc<ScanController>,
}

impl LifecycleAdapter {
    pub fn new(session: Arc<HardwareSession>, scanner: Arc<ScanController>) -> Self {
        Self { session, scanner }
    }

    /// Dispatch one transition.
    pub async fn handle(&self, event: LifecycleEvent) {
        debug!(%event, "Lifecycle transition");
        match event {
            LifecycleEvent::Pause => self.on_pause(),
            LifecycleEvent::Resume => self.on_resume().await,
            LifecycleEvent::Destroy => self.on_destroy(),
        }
    }

    /// Release the reader: drop the active request and cancel the scan.
    ///
    /// Events the kernel still delivers for the dropped request are
    /// discarded.
    pub fn on_pause(&self) {
        info!("Application paused, cancelling card check");
        if self.scanner.abandon_active() {
            debug!("Active card check dropped on pause");
        }
        self.scanner.cancel();
    }

    /// Restore the session if it was lost while in the background.
    ///
    /// Capability failures are not retried.
    pub async fn on_resume(&self) {
        if self.session.is_ready() {
            debug!("Application resumed, session still connected");
            return;
        }
        if let Some(failure) = self.session.capability_failure() {
            debug!("Application resumed, not reconnecting: {}", failure);
            return;
        }

        info!("Application resumed, reconnecting payment kernel");
        match self.session.connect().await {
            Ok(status) => info!(%status, "Silent reconnect succeeded"),
            Err(e) => warn!("Silent reconnect failed: {}", e),
        }
    }

    /// Release the kernel resource.
    pub fn on_destroy(&self) {
        info!("Application destroyed, releasing payment kernel");
        self.scanner.abandon_active();
        self.session.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScanConfig, SessionConfig};
    use crate::error::{ConnectError, ScanError};
    use crate::session::SessionState;
    use std::time::Duration;
    use tapbridge_hardware::mock::{HandshakeMode, MockKernel, MockKernelHandle};
    use tapbridge_hardware::{DeviceDescriptor, HardwareEvent, HardwareError};

    fn adapter_for(
        device: DeviceDescriptor,
    ) -> (LifecycleAdapter, Arc<ScanController>, MockKernelHandle) {
        let (kernel, handle) = MockKernel::with_mode(HandshakeMode::Auto);
        let session = Arc::new(HardwareSession::new(
            Arc::new(kernel),
            Arc::new(device),
            SessionConfig::default(),
        ));
        let scanner = Arc::new(ScanController::new(session.clone(), ScanConfig::default()));
        (
            LifecycleAdapter::new(session, scanner.clone()),
            scanner,
            handle,
        )
    }

    fn sunmi() -> DeviceDescriptor {
        DeviceDescriptor::new("SUNMI").with_service_version(320)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_cancels_and_drops_late_events() {
        let (adapter, scanner, handle) = adapter_for(sunmi());
        let pending = scanner.check_card().await.unwrap();

        adapter.handle(LifecycleEvent::Pause).await;
        assert!(!scanner.has_active_scan());
        assert!(!handle.reader().is_scanning());

        handle
            .reader()
            .emit_to_cancelled(HardwareEvent::card_found("04AABBCC"));
        assert_eq!(pending.result().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_while_check_is_issuing() {
        let (adapter, scanner, handle) = adapter_for(sunmi());
        adapter.session.connect().await.unwrap();

        let issuing = tokio::spawn({
            let scanner = scanner.clone();
            async move { scanner.check_card().await }
        });
        // Inside the cancel settle delay.
        tokio::time::sleep(Duration::from_millis(10)).await;
        adapter.handle(LifecycleEvent::Pause).await;

        assert_eq!(issuing.await.unwrap().unwrap_err(), ScanError::Interrupted);
        assert!(!scanner.has_active_scan());
        assert!(!handle.reader().is_scanning());
        assert_eq!(handle.reader().stats().check_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_while_check_is_issuing() {
        let (adapter, scanner, handle) = adapter_for(sunmi());
        adapter.session.connect().await.unwrap();

        let issuing = tokio::spawn({
            let scanner = scanner.clone();
            async move { scanner.check_card().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        adapter.handle(LifecycleEvent::Destroy).await;

        assert_eq!(issuing.await.unwrap().unwrap_err(), ScanError::Interrupted);
        assert!(scanner.active_request().is_none());
        assert!(!handle.reader().is_scanning());
        assert_eq!(handle.reader().stats().check_calls, 0);
        assert_eq!(handle.destroy_calls(), 1);
        assert_eq!(adapter.session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_pause_swallows_cancel_failure() {
        let (adapter, scanner, handle) = adapter_for(sunmi());
        adapter.session.connect().await.unwrap();

        handle
            .reader()
            .fail_next_cancel(HardwareError::remote("binder died"));
        adapter.on_pause();
        assert!(!scanner.has_active_scan());
    }

    #[tokio::test]
    async fn test_pause_while_disconnected() {
        let (adapter, _scanner, handle) = adapter_for(sunmi());
        adapter.on_pause();
        assert_eq!(handle.reader().stats().cancel_calls, 0);
    }

    #[tokio::test]
    async fn test_resume_reconnects_lost_session() {
        let (adapter, _scanner, handle) = adapter_for(sunmi());
        adapter.session.connect().await.unwrap();

        handle.drop_connection();
        assert_eq!(adapter.session.state(), SessionState::Disconnected);

        adapter.handle(LifecycleEvent::Resume).await;
        assert_eq!(adapter.session.state(), SessionState::Connected);
        assert_eq!(handle.init_calls(), 2);
    }

    #[tokio::test]
    async fn test_resume_keeps_live_session() {
        let (adapter, _scanner, handle) = adapter_for(sunmi());
        adapter.session.connect().await.unwrap();

        adapter.on_resume().await;
        assert_eq!(handle.init_calls(), 1);
    }

    #[tokio::test]
    async fn test_resume_swallows_connect_failure() {
        let (adapter, _scanner, handle) = adapter_for(sunmi());
        handle.set_mode(HandshakeMode::NoReader);
        handle.set_reader_available(false);

        adapter.on_resume().await;
        assert_eq!(adapter.session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_resume_does_not_retry_capability_failure() {
        let (adapter, _scanner, handle) =
            adapter_for(DeviceDescriptor::new("SUNMI").with_service_version(100));

        let result = adapter.session.connect().await;
        assert_eq!(
            result,
            Err(ConnectError::NonFinancialHardware { version: Some(100) })
        );

        adapter.on_resume().await;
        assert_eq!(handle.init_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_releases_kernel() {
        let (adapter, scanner, handle) = adapter_for(sunmi());
        let pending = scanner.check_card().await.unwrap();

        adapter.handle(LifecycleEvent::Destroy).await;
        assert_eq!(handle.destroy_calls(), 1);
        assert_eq!(adapter.session.state(), SessionState::Disconnected);
        assert_eq!(pending.result().await, None);
    }
}
