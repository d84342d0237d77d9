//! Action facade for the application layer.
//!
//! The application layer invokes actions by name and receives either an
//! immediate reply or, for card checks, a pending handle that later yields
//! exactly one outcome.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tapbridge_core::{BridgeConfig, Reply, TapBridge};
//! use tapbridge_hardware::DeviceDescriptor;
//! use tapbridge_hardware::event::Diagnostics;
//! use tapbridge_hardware::mock::MockKernel;
//! use tapbridge_hardware::HardwareEvent;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (kernel, handle) = MockKernel::new();
//!     let device = DeviceDescriptor::new("SUNMI").with_service_version(320);
//!     let bridge = TapBridge::new(Arc::new(kernel), Arc::new(device), BridgeConfig::default());
//!
//!     let Ok(Reply::Status(status)) = bridge.execute("connect").await else {
//!         panic!("connect failed");
//!     };
//!     assert_eq!(status, "Connected");
//!
//!     let Ok(Reply::Pending(pending)) = bridge.execute("checkCard").await else {
//!         panic!("checkCard was rejected");
//!     };
//!     handle.reader().finish(HardwareEvent::ErrorWithDiagnostics(Some(
//!         Diagnostics::new().with("code", "-2549"),
//!     )));
//!
//!     let payload = pending.result().await.unwrap().to_payload().unwrap();
//!     assert_eq!(payload["error"], "NON_PAYMENT_CARD_DETECTED");
//!     assert_eq!(payload["code"], -2549);
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tapbridge_hardware::{DeviceProbe, PayKernel};
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, ConnectError, ScanError};
use crate::lifecycle::{LifecycleAdapter, LifecycleEvent};
use crate::scan::{PendingScan, ScanController};
use crate::session::{ConnectStatus, HardwareSession};

/// Actions the application layer can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Connect,
    CheckCard,
    CancelCheckCard,
}

impl Action {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::CheckCard => "checkCard",
            Self::CancelCheckCard => "cancelCheckCard",
        }
    }
}

impl FromStr for Action {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(Self::Connect),
            "checkCard" => Ok(Self::CheckCard),
            "cancelCheckCard" => Ok(Self::CancelCheckCard),
            other => Err(BridgeError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immediate reply to an action.
#[derive(Debug)]
pub enum Reply {
    /// Connection status string.
    Status(String),

    /// The card check is running; the outcome follows on the handle.
    Pending(PendingScan),

    /// Plain acknowledgment.
    Ack,
}

/// The bridge: one session, one scanner and the lifecycle adapter over them.
#[derive(Debug)]
pub struct TapBridge {
    session: Arc<HardwareSession>,
    scanner: Arc<ScanController>,
    lifecycle: LifecycleAdapter,
}

impl TapBridge {
    /// Assemble a bridge over the given kernel and device probe.
    pub fn new(
        kernel: Arc<dyn PayKernel>,
        probe: Arc<dyn DeviceProbe>,
        config: BridgeConfig,
    ) -> Self {
        let session = Arc::new(HardwareSession::new(kernel, probe, config.session));
        let scanner = Arc::new(ScanController::new(session.clone(), config.scan));
        let lifecycle = LifecycleAdapter::new(session.clone(), scanner.clone());

        Self {
            session,
            scanner,
            lifecycle,
        }
    }

    /// Run an action by name.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownAction`] for unrecognised names, and
    /// the connect or scan error of the action otherwise.
    pub async fn execute(&self, action: &str) -> Result<Reply, BridgeError> {
        let action: Action = action.parse()?;
        debug!(%action, "Executing action");

        match action {
            Action::Connect => {
                let status = self.connect().await?;
                Ok(Reply::Status(status.as_str().to_string()))
            }
            Action::CheckCard => Ok(Reply::Pending(self.check_card().await?)),
            Action::CancelCheckCard => {
                self.cancel_check_card();
                Ok(Reply::Ack)
            }
        }
    }

    /// Connect to the payment kernel.
    ///
    /// # Errors
    ///
    /// See [`HardwareSession::connect`].
    pub async fn connect(&self) -> Result<ConnectStatus, ConnectError> {
        let status = self.session.connect().await?;
        info!(%status, "Bridge connected");
        Ok(status)
    }

    /// Start a card check.
    ///
    /// # Errors
    ///
    /// See [`ScanController::check_card`].
    pub async fn check_card(&self) -> Result<PendingScan, ScanError> {
        self.scanner.check_card().await
    }

    /// Cancel the running card check, if any. Always acknowledged.
    pub fn cancel_check_card(&self) {
        self.scanner.cancel();
    }

    /// Forward a host lifecycle transition.
    pub async fn lifecycle(&self, event: LifecycleEvent) {
        self.lifecycle.handle(event).await;
    }

    /// The kernel session.
    pub fn session(&self) -> &Arc<HardwareSession> {
        &self.session
    }

    /// The scan controller.
    pub fn scanner(&self) -> &Arc<ScanController> {
        &self.scanner
    }
}
