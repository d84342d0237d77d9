//! Vendor kernel trait definitions.
//!
//! These traits describe the contract between the bridge and the vendor
//! payment kernel: initializing the kernel, obtaining the card reader,
//! issuing check-card requests and receiving reader callbacks.
//!
//! Unlike peripheral I/O, every vendor operation is a synchronous remote call
//! whose outcome arrives later on the kernel's own callback thread. The
//! traits are therefore plain (non-async) and object-safe, so the session can
//! hold `Arc<dyn PayKernel>` and tests can substitute the
//! [`mock`](crate::mock) implementations.

use std::sync::Arc;

use crate::error::Result;
use crate::event::HardwareEvent;
use crate::types::{CardMode, DeviceDescriptor};

/// Receiver for every event raised by one check-card request.
///
/// The reader may call [`on_event`](CheckCardCallback::on_event) from any
/// thread, any number of times, including after the request was cancelled.
pub trait CheckCardCallback: Send + Sync {
    /// Handle one reader event.
    fn on_event(&self, event: HardwareEvent);
}

/// Card reader capability exposed by a connected kernel.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tapbridge_hardware::event::HardwareEvent;
/// use tapbridge_hardware::traits::{CardReader, CheckCardCallback};
/// use tapbridge_hardware::types::CardMode;
///
/// struct Print;
///
/// impl CheckCardCallback for Print {
///     fn on_event(&self, event: HardwareEvent) {
///         println!("{:?}", event);
///     }
/// }
///
/// fn start(reader: &dyn CardReader) -> tapbridge_hardware::Result<()> {
///     reader.cancel_check_card()?;
///     reader.check_card(CardMode::COMBINED_NFC, Arc::new(Print), 60)
/// }
/// ```
pub trait CardReader: Send + Sync {
    /// Start listening for a card.
    ///
    /// Returns once the kernel accepted the request. Detection results,
    /// errors and the timeout are reported through `callback`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails or the reader refuses the
    /// requested mode.
    fn check_card(
        &self,
        mode: CardMode,
        callback: Arc<dyn CheckCardCallback>,
        timeout_secs: u32,
    ) -> Result<()>;

    /// Ask the kernel to stop the active check-card request, if any.
    ///
    /// Cancellation is advisory: events already queued by the kernel may
    /// still be delivered to the previous callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn cancel_check_card(&self) -> Result<()>;
}

/// Outcome notifications for a kernel handshake.
pub trait KernelListener: Send + Sync {
    /// The kernel service is bound. `reader` is `None` when the card reader
    /// module could not be obtained.
    fn on_connected(&self, reader: Option<Arc<dyn CardReader>>);

    /// The kernel service failed to bind or was lost.
    fn on_disconnected(&self);
}

/// The vendor payment kernel.
///
/// A process holds at most one kernel. It is owned by the hardware session
/// and passed around by `Arc`.
pub trait PayKernel: Send + Sync {
    /// Start the asynchronous handshake with the kernel service.
    ///
    /// The outcome is reported to `listener`, which stays registered for
    /// later disconnect notifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake could not be started at all.
    fn init(&self, listener: Arc<dyn KernelListener>) -> Result<()>;

    /// Reader of an already initialized kernel, if it is still available.
    fn card_reader(&self) -> Option<Arc<dyn CardReader>>;

    /// Release the kernel service. Safe to call when not initialized.
    fn destroy(&self);
}

/// Source of the terminal's device descriptor.
pub trait DeviceProbe: Send + Sync {
    /// Describe the current device. Queried on every connect.
    fn describe(&self) -> DeviceDescriptor;
}

impl DeviceProbe for DeviceDescriptor {
    fn describe(&self) -> DeviceDescriptor {
        self.clone()
    }
}
