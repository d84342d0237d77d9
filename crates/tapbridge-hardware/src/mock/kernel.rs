//! Mock payment kernel implementation for testing and development.
//!
//! The mock kernel owns a [`MockReader`] and answers handshakes according to
//! a configurable [`HandshakeMode`]. In [`HandshakeMode::Manual`] the test
//! decides when (and how) the handshake completes, which makes it possible
//! to observe the `Connecting` state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::reader::{MockReader, MockReaderHandle};
use crate::traits::{CardReader, KernelListener, PayKernel};
use crate::{HardwareError, Result};

/// How the mock kernel answers `init`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandshakeMode {
    /// Report success with the reader before `init` returns.
    #[default]
    Auto,

    /// Report success without a reader before `init` returns.
    NoReader,

    /// Report a disconnect before `init` returns.
    Refuse,

    /// Make `init` itself fail with the given message.
    FailInit(String),

    /// Wait for [`MockKernelHandle::complete_handshake`] or
    /// [`MockKernelHandle::drop_connection`].
    Manual,
}

struct KernelState {
    mode: HandshakeMode,
    initialized: bool,
    reader_available: bool,
    listener: Option<Arc<dyn KernelListener>>,
    init_calls: usize,
    destroy_calls: usize,
}

/// Mock vendor payment kernel.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tapbridge_hardware::mock::MockKernel;
/// use tapbridge_hardware::traits::{CardReader, KernelListener, PayKernel};
///
/// struct Ignore;
///
/// impl KernelListener for Ignore {
///     fn on_connected(&self, _reader: Option<Arc<dyn CardReader>>) {}
///     fn on_disconnected(&self) {}
/// }
///
/// let (kernel, handle) = MockKernel::new();
/// kernel.init(Arc::new(Ignore)).unwrap();
///
/// assert!(kernel.card_reader().is_some());
/// assert_eq!(handle.init_calls(), 1);
/// ```
pub struct MockKernel {
    state: Arc<Mutex<KernelState>>,
    reader: Arc<MockReader>,
}

impl MockKernel {
    /// Create a kernel that connects immediately.
    pub fn new() -> (Self, MockKernelHandle) {
        Self::with_mode(HandshakeMode::Auto)
    }

    /// Create a kernel with the given handshake behaviour.
    pub fn with_mode(mode: HandshakeMode) -> (Self, MockKernelHandle) {
        let (reader, reader_handle) = MockReader::new();
        let reader = Arc::new(reader);
        let state = Arc::new(Mutex::new(KernelState {
            mode,
            initialized: false,
            reader_available: true,
            listener: None,
            init_calls: 0,
            destroy_calls: 0,
        }));

        let handle = MockKernelHandle {
            state: state.clone(),
            reader: reader.clone(),
            reader_handle,
        };

        (Self { state, reader }, handle)
    }

    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PayKernel for MockKernel {
    fn init(&self, listener: Arc<dyn KernelListener>) -> Result<()> {
        let mode = {
            let mut state = self.lock();
            state.init_calls += 1;
            if let HandshakeMode::FailInit(message) = &state.mode {
                return Err(HardwareError::initialization_failed(message.clone()));
            }
            state.initialized = true;
            state.listener = Some(listener.clone());
            state.mode.clone()
        };

        debug!(?mode, "Mock kernel handshake started");
        match mode {
            HandshakeMode::Auto => {
                let reader: Arc<dyn CardReader> = self.reader.clone();
                listener.on_connected(Some(reader));
            }
            HandshakeMode::NoReader => listener.on_connected(None),
            HandshakeMode::Refuse => {
                self.lock().initialized = false;
                listener.on_disconnected();
            }
            HandshakeMode::FailInit(_) | HandshakeMode::Manual => {}
        }
        Ok(())
    }

    fn card_reader(&self) -> Option<Arc<dyn CardReader>> {
        let state = self.lock();
        if state.initialized && state.reader_available {
            let reader: Arc<dyn CardReader> = self.reader.clone();
            Some(reader)
        } else {
            None
        }
    }

    fn destroy(&self) {
        let mut state = self.lock();
        state.destroy_calls += 1;
        state.initialized = false;
        state.listener = None;
    }
}

/// Handle for controlling a [`MockKernel`] from tests.
#[derive(Clone)]
pub struct MockKernelHandle {
    state: Arc<Mutex<KernelState>>,
    reader: Arc<MockReader>,
    reader_handle: MockReaderHandle,
}

impl MockKernelHandle {
    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change how subsequent handshakes are answered.
    pub fn set_mode(&self, mode: HandshakeMode) {
        self.lock().mode = mode;
    }

    /// Control whether the kernel exposes its reader.
    pub fn set_reader_available(&self, available: bool) {
        self.lock().reader_available = available;
    }

    /// Complete a pending handshake, with or without the reader.
    ///
    /// Returns `false` if no handshake was started.
    pub fn complete_handshake(&self, with_reader: bool) -> bool {
        let listener = self.lock().listener.clone();
        match listener {
            Some(listener) => {
                let reader = with_reader.then(|| {
                    let reader: Arc<dyn CardReader> = self.reader.clone();
                    reader
                });
                listener.on_connected(reader);
                true
            }
            None => false,
        }
    }

    /// Simulate the kernel service dying.
    ///
    /// Returns `false` if no listener was registered.
    pub fn drop_connection(&self) -> bool {
        let listener = {
            let mut state = self.lock();
            state.initialized = false;
            state.listener.clone()
        };
        match listener {
            Some(listener) => {
                listener.on_disconnected();
                true
            }
            None => false,
        }
    }

    /// Handle for the kernel's reader.
    pub fn reader(&self) -> &MockReaderHandle {
        &self.reader_handle
    }

    /// Check whether the kernel is initialized.
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Number of `init` calls.
    pub fn init_calls(&self) -> usize {
        self.lock().init_calls
    }

    /// Number of `destroy` calls.
    pub fn destroy_calls(&self) -> usize {
        self.lock().destroy_calls
    }
}
