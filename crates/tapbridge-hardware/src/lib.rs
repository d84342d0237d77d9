//! Vendor payment-kernel abstraction for the tapbridge NFC bridge.
//!
//! This crate models the parts of a payment terminal's vendor SDK that the
//! bridge talks to: the kernel handshake, the card reader, and the reader's
//! callback surface. Real SDK bindings and the [`mock`] implementations both
//! plug in behind the same traits.
//!
//! # Design
//!
//! - **Object-safe**: vendor calls are synchronous remote calls, so the
//!   traits are plain methods and usable as `Arc<dyn Trait>`.
//! - **Thread-safe**: all traits require `Send + Sync`; callbacks may arrive
//!   on any thread.
//! - **One event type**: the reader's many callback methods collapse into
//!   [`HardwareEvent`], delivered to a single [`CheckCardCallback`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tapbridge_hardware::event::HardwareEvent;
//! use tapbridge_hardware::traits::{CardReader, CheckCardCallback};
//! use tapbridge_hardware::types::CardMode;
//!
//! struct Log;
//!
//! impl CheckCardCallback for Log {
//!     fn on_event(&self, event: HardwareEvent) {
//!         println!("{}: {:?}", event.callback_name(), event);
//!     }
//! }
//!
//! fn scan(reader: &dyn CardReader) -> tapbridge_hardware::Result<()> {
//!     reader.check_card(CardMode::COMBINED_NFC, Arc::new(Log), 60)
//! }
//! ```
//!
//! [`CheckCardCallback`]: traits::CheckCardCallback

pub mod error;
pub mod event;
#[cfg(feature = "mock")]
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{HardwareError, Result};
pub use event::{Diagnostics, HardwareEvent};
pub use traits::{CardReader, CheckCardCallback, DeviceProbe, KernelListener, PayKernel};
pub use types::{CardMode, DeviceDescriptor};
