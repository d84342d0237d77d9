//! Error types for vendor kernel operations.
//!
//! Every remote call into the payment kernel can fail with one of these
//! errors. They are raised at the call site and converted by the session
//! and scan controller into caller-visible failures; they never escape as
//! panics.

/// Result type alias for vendor kernel operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while talking to the vendor payment kernel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardwareError {
    /// A remote (binder) call into the kernel service failed.
    #[error("Remote call failed: {message}")]
    Remote { message: String },

    /// The kernel service is not bound or was lost.
    #[error("Kernel disconnected: {component}")]
    Disconnected { component: String },

    /// The reader rejected a scan because another one is still active.
    #[error("Repeated call: a card check is already in progress")]
    RepeatedCall,

    /// Operation is not supported by this reader.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Kernel initialization could not be started.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl HardwareError {
    /// Create a new remote call error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Create a new disconnected error.
    pub fn disconnected(component: impl Into<String>) -> Self {
        Self::Disconnected {
            component: component.into(),
        }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
