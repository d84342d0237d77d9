//! Mock card reader implementation for testing and development.
//!
//! The mock records every request, keeps the active callback so tests can
//! push events into it, and reproduces the vendor's "repeated call" quirk:
//! starting a scan while another is still active delivers a `-20001` error
//! to the new callback instead of starting a second scan.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::event::{Diagnostics, HardwareEvent, KEY_CODE, KEY_MESSAGE};
use crate::traits::{CardReader, CheckCardCallback};
use crate::types::CardMode;
use crate::{HardwareError, Result};

/// Error code the vendor reader emits for an overlapping check-card call.
pub const REPEATED_CALL_CODE: i32 = -20001;

/// Counters and last-request details recorded by a [`MockReader`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockReaderStats {
    /// Accepted and rejected `check_card` calls.
    pub check_calls: usize,

    /// `cancel_check_card` calls.
    pub cancel_calls: usize,

    /// `check_card` calls made while another scan was still active.
    pub overlapping_calls: usize,

    /// Mode of the most recent `check_card` call.
    pub last_mode: Option<CardMode>,

    /// Timeout of the most recent `check_card` call.
    pub last_timeout_secs: Option<u32>,
}

#[derive(Default)]
struct ReaderState {
    active: Option<Arc<dyn CheckCardCallback>>,
    last_cancelled: Option<Arc<dyn CheckCardCallback>>,
    fail_next_check: Option<HardwareError>,
    fail_cancel: Option<HardwareError>,
    stats: MockReaderStats,
}

/// Mock vendor card reader.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use tapbridge_hardware::event::HardwareEvent;
/// use tapbridge_hardware::mock::MockReader;
/// use tapbridge_hardware::traits::{CardReader, CheckCardCallback};
/// use tapbridge_hardware::types::CardMode;
///
/// #[derive(Default)]
/// struct Collect(Mutex<Vec<HardwareEvent>>);
///
/// impl CheckCardCallback for Collect {
///     fn on_event(&self, event: HardwareEvent) {
///         self.0.lock().unwrap().push(event);
///     }
/// }
///
/// let (reader, handle) = MockReader::new();
/// let collector = Arc::new(Collect::default());
///
/// reader.check_card(CardMode::COMBINED_NFC, collector.clone(), 60).unwrap();
/// handle.tap("04AABBCC");
///
/// assert_eq!(
///     collector.0.lock().unwrap().as_slice(),
///     &[HardwareEvent::card_found("04AABBCC")]
/// );
/// ```
pub struct MockReader {
    state: Arc<Mutex<ReaderState>>,
}

impl MockReader {
    /// Create a new mock reader and its control handle.
    pub fn new() -> (Self, MockReaderHandle) {
        let state = Arc::new(Mutex::new(ReaderState::default()));
        (
            Self {
                state: state.clone(),
            },
            MockReaderHandle { state },
        )
    }

    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CardReader for MockReader {
    fn check_card(
        &self,
        mode: CardMode,
        callback: Arc<dyn CheckCardCallback>,
        timeout_secs: u32,
    ) -> Result<()> {
        let rejected = {
            let mut state = self.lock();
            state.stats.check_calls += 1;
            state.stats.last_mode = Some(mode);
            state.stats.last_timeout_secs = Some(timeout_secs);

            if mode.contains_legacy() {
                return Err(HardwareError::unsupported(format!("checkCard({})", mode)));
            }
            if let Some(error) = state.fail_next_check.take() {
                return Err(error);
            }

            if state.active.is_some() {
                state.stats.overlapping_calls += 1;
                true
            } else {
                state.active = Some(callback.clone());
                false
            }
        };

        if rejected {
            debug!(mode = %mode, "Mock reader rejecting overlapping checkCard");
            callback.on_event(HardwareEvent::ErrorWithDiagnostics(Some(
                Diagnostics::new()
                    .with(KEY_CODE, REPEATED_CALL_CODE.to_string())
                    .with(KEY_MESSAGE, "Repeated call"),
            )));
        } else {
            trace!(mode = %mode, timeout_secs, "Mock reader scanning");
        }

        Ok(())
    }

    fn cancel_check_card(&self) -> Result<()> {
        let mut state = self.lock();
        state.stats.cancel_calls += 1;

        if let Some(error) = state.fail_cancel.take() {
            return Err(error);
        }
        if let Some(callback) = state.active.take() {
            state.last_cancelled = Some(callback);
        }
        Ok(())
    }
}

/// Handle for driving a [`MockReader`] from tests.
///
/// Events are delivered on the calling thread, the way the vendor kernel
/// delivers them on its binder thread.
#[derive(Clone)]
pub struct MockReaderHandle {
    state: Arc<Mutex<ReaderState>>,
}

impl MockReaderHandle {
    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event to the active scan without ending it.
    ///
    /// Returns `false` when no scan is active.
    pub fn emit(&self, event: HardwareEvent) -> bool {
        let callback = self.lock().active.clone();
        match callback {
            Some(callback) => {
                callback.on_event(event);
                true
            }
            None => false,
        }
    }

    /// Deliver a terminal event and end the active scan.
    pub fn finish(&self, event: HardwareEvent) -> bool {
        let callback = self.lock().active.take();
        match callback {
            Some(callback) => {
                callback.on_event(event);
                true
            }
            None => false,
        }
    }

    /// Present a contactless card with the given identifier.
    pub fn tap(&self, uuid: &str) -> bool {
        self.finish(HardwareEvent::card_found(uuid))
    }

    /// Deliver a late event to the most recently cancelled scan.
    ///
    /// Returns `false` when no scan was ever cancelled.
    pub fn emit_to_cancelled(&self, event: HardwareEvent) -> bool {
        let callback = self.lock().last_cancelled.clone();
        match callback {
            Some(callback) => {
                callback.on_event(event);
                true
            }
            None => false,
        }
    }

    /// Make the next `check_card` call fail with `error`.
    pub fn fail_next_check(&self, error: HardwareError) {
        self.lock().fail_next_check = Some(error);
    }

    /// Make the next `cancel_check_card` call fail with `error`.
    pub fn fail_next_cancel(&self, error: HardwareError) {
        self.lock().fail_cancel = Some(error);
    }

    /// Check whether a scan is currently active.
    pub fn is_scanning(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Snapshot of the recorded counters.
    pub fn stats(&self) -> MockReaderStats {
        self.lock().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<HardwareEvent>>);

    impl CheckCardCallback for Collect {
        fn on_event(&self, event: HardwareEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Collect {
        fn events(&self) -> Vec<HardwareEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_tap_reaches_active_callback() {
        let (reader, handle) = MockReader::new();
        let collect = Arc::new(Collect::default());

        reader
            .check_card(CardMode::COMBINED_NFC, collect.clone(), 60)
            .unwrap();
        assert!(handle.is_scanning());
        assert!(handle.tap("04AABBCC"));
        assert!(!handle.is_scanning());

        assert_eq!(collect.events(), vec![HardwareEvent::card_found("04AABBCC")]);
        assert_eq!(handle.stats().last_mode, Some(CardMode::COMBINED_NFC));
        assert_eq!(handle.stats().last_timeout_secs, Some(60));
    }

    #[test]
    fn test_overlapping_check_gets_repeated_call() {
        let (reader, handle) = MockReader::new();
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());

        reader
            .check_card(CardMode::COMBINED_NFC, first.clone(), 60)
            .unwrap();
        reader
            .check_card(CardMode::COMBINED_NFC, second.clone(), 60)
            .unwrap();

        assert_eq!(handle.stats().overlapping_calls, 1);
        assert_eq!(
            second.events(),
            vec![HardwareEvent::ErrorWithDiagnostics(Some(
                Diagnostics::new()
                    .with(KEY_CODE, "-20001")
                    .with(KEY_MESSAGE, "Repeated call")
            ))]
        );
        assert!(first.events().is_empty());
    }

    #[test]
    fn test_cancel_then_check_does_not_overlap() {
        let (reader, handle) = MockReader::new();
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());

        reader
            .check_card(CardMode::COMBINED_NFC, first.clone(), 60)
            .unwrap();
        reader.cancel_check_card().unwrap();
        reader
            .check_card(CardMode::COMBINED_NFC, second.clone(), 60)
            .unwrap();

        let stats = handle.stats();
        assert_eq!(stats.overlapping_calls, 0);
        assert_eq!(stats.cancel_calls, 1);
        assert_eq!(stats.check_calls, 2);

        assert!(handle.emit_to_cancelled(HardwareEvent::card_found("LATE")));
        assert_eq!(first.events(), vec![HardwareEvent::card_found("LATE")]);
    }

    #[test]
    fn test_only_latest_cancelled_scan_is_kept() {
        let (reader, handle) = MockReader::new();
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());

        for callback in [first.clone(), second.clone()] {
            reader
                .check_card(CardMode::COMBINED_NFC, callback, 60)
                .unwrap();
            reader.cancel_check_card().unwrap();
        }
        // Cancelling with nothing running keeps the last cancelled scan.
        reader.cancel_check_card().unwrap();

        assert!(handle.emit_to_cancelled(HardwareEvent::card_found("LATE")));
        assert!(first.events().is_empty());
        assert_eq!(second.events(), vec![HardwareEvent::card_found("LATE")]);
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn test_legacy_mode_refused() {
        let (reader, _handle) = MockReader::new();
        let collect = Arc::new(Collect::default());

        let result = reader.check_card(CardMode::MAGNETIC | CardMode::GENERAL_NFC, collect, 60);
        assert!(matches!(result, Err(HardwareError::Unsupported { .. })));
    }

    #[test]
    fn test_injected_failures() {
        let (reader, handle) = MockReader::new();

        handle.fail_next_check(HardwareError::remote("binder died"));
        let result = reader.check_card(CardMode::COMBINED_NFC, Arc::new(Collect::default()), 60);
        assert_eq!(result, Err(HardwareError::remote("binder died")));
        assert!(!handle.is_scanning());

        handle.fail_next_cancel(HardwareError::remote("binder died"));
        assert!(reader.cancel_check_card().is_err());
        assert!(reader.cancel_check_card().is_ok());
    }

    #[test]
    fn test_emit_without_scan() {
        let (_reader, handle) = MockReader::new();
        assert!(!handle.emit(HardwareEvent::card_found("x")));
        assert!(!handle.emit_to_cancelled(HardwareEvent::card_found("x")));
    }
}
