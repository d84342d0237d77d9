//! NFC card-detection bridge for payment terminals.
//!
//! Turns the vendor kernel's callback-driven card detection into a single
//! asynchronous outcome per request, while absorbing the hardware's quirks:
//! duplicate-call errors, power-fault-prone legacy card modes and
//! non-financial hardware variants.
//!
//! # Components
//!
//! ```text
//! TapBridge ──► HardwareSession ──► PayKernel (vendor)
//!     │               ▲
//!     │               │
//!     ├──► ScanController ──► CardReader (vendor)
//!     │          │                  │
//!     │          └── ScanRequest ◄──┘ HardwareEvent
//!     │                 │
//!     │                 └── ResultNormalizer ──► ScanResult
//!     │
//!     └──► LifecycleAdapter (pause / resume / destroy)
//! ```
//!
//! - [`session`]: kernel connection, device capability gate.
//! - [`scan`]: one-at-a-time card checks and the at-most-once latch.
//! - [`normalizer`]: reader events to [`ScanResult`].
//! - [`lifecycle`]: host foreground/background/teardown handling.
//! - [`bridge`]: named actions for the application layer.

pub mod bridge;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod normalizer;
pub mod result;
pub mod scan;
pub mod session;

pub use bridge::{Action, Reply, TapBridge};
pub use config::{BridgeConfig, ScanConfig, SessionConfig, SuppressionPolicy};
pub use error::{BridgeError, ConfigError, ConnectError, ScanError};
pub use lifecycle::{LifecycleAdapter, LifecycleEvent};
pub use normalizer::{Disposition, IgnoreReason, ResultNormalizer};
pub use result::ScanResult;
pub use scan::{PendingScan, PendingState, ScanController, ScanRequest};
pub use session::{ConnectStatus, HardwareSession, SessionState};
