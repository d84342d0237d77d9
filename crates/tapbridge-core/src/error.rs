//! Error types for bridge operations.
//!
//! Display strings are the messages the application layer receives, so
//! they stay stable and human-readable.

use thiserror::Error;

/// Errors from establishing the kernel session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The device is not made by the terminal vendor.
    #[error("Not a supported device")]
    UnsupportedDevice,

    /// The payment service is missing or below the financial threshold.
    #[error("Non-financial hardware: payment service version {}", describe_version(.version))]
    NonFinancialHardware { version: Option<u32> },

    /// The handshake succeeded but no card reader module was provided.
    #[error("Connected but card reader module unavailable")]
    ReaderUnavailable,

    /// The handshake could not be started.
    #[error("Connection Failed: {0}")]
    Failed(String),

    /// The kernel reported a disconnect before the handshake completed.
    #[error("Connection Failed: kernel disconnected during handshake")]
    Disconnected,

    /// The kernel never answered the handshake.
    #[error("Connection Failed: handshake timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl ConnectError {
    /// Check whether this is a capability failure.
    ///
    /// Capability failures are never retried automatically.
    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedDevice | Self::NonFinancialHardware { .. }
        )
    }
}

fn describe_version(version: &Option<u32>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "not installed".to_string(),
    }
}

/// Errors that reject a card check before it becomes pending.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The session is not connected to the kernel.
    #[error("SDK not connected")]
    NotConnected,

    /// The vendor call to start the scan failed.
    #[error("Remote Exception: {0}")]
    Remote(String),

    /// The app was backgrounded or torn down while the check was being issued.
    #[error("Card check interrupted")]
    Interrupted,
}

/// Errors surfaced through the action facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The action name is not one the bridge handles.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Invalid(String),
}
