//! Bridge configuration.
//!
//! Defaults reproduce the behaviour terminals in the field depend on; a JSON
//! document can override any subset of fields.
//!
//! # Example
//!
//! ```
//! use tapbridge_core::config::{BridgeConfig, SuppressionPolicy};
//!
//! let config = BridgeConfig::from_json_str(
//!     r#"{ "scan": { "suppression": "unknown_code", "reconnect_on_check": false } }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.scan.suppression, SuppressionPolicy::UnknownCode);
//! assert!(!config.scan.reconnect_on_check);
//! assert_eq!(config.scan.scan_timeout_secs, 60);
//! assert_eq!(config.session.min_service_version, 300);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which hardware error code is treated as transient noise.
///
/// Terminal revisions disagree on the code they emit for an overlapping
/// check-card call, so exactly one code is suppressed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionPolicy {
    /// Suppress the vendor's "repeated call" code, `-20001`.
    #[default]
    RepeatedCall,

    /// Suppress the generic unknown code, `-1`.
    UnknownCode,
}

impl SuppressionPolicy {
    /// The error code this policy suppresses.
    pub fn suppressed_code(self) -> i32 {
        match self {
            Self::RepeatedCall => -20001,
            Self::UnknownCode => -1,
        }
    }
}

/// Settings for the kernel session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Manufacturer tag a supported device must carry (case-insensitive).
    pub vendor_tag: String,

    /// Minimum payment service version offering financial capability.
    pub min_service_version: u32,

    /// Upper bound on the kernel handshake.
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vendor_tag: "SUNMI".to_string(),
            min_service_version: 300,
            connect_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Handshake timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Settings for card checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Timeout handed to the reader, in seconds.
    pub scan_timeout_secs: u32,

    /// Pause between cancelling the previous scan and starting the next.
    pub cancel_settle_ms: u64,

    /// Reconnect once before rejecting a check on a disconnected session.
    pub reconnect_on_check: bool,

    /// Error code treated as transient noise.
    pub suppression: SuppressionPolicy,

    /// Extra time past the reader timeout before the bridge resolves the
    /// scan itself. `None` disables the watchdog.
    pub watchdog_grace_ms: Option<u64>,

    /// Log every diagnostic bundle field at debug level.
    pub log_diagnostics: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 60,
            cancel_settle_ms: 50,
            reconnect_on_check: true,
            suppression: SuppressionPolicy::default(),
            watchdog_grace_ms: Some(5_000),
            log_diagnostics: true,
        }
    }
}

impl ScanConfig {
    /// Settle delay as a [`Duration`].
    pub fn cancel_settle(&self) -> Duration {
        Duration::from_millis(self.cancel_settle_ms)
    }

    /// Total time after which the watchdog fires, if enabled.
    pub fn watchdog_deadline(&self) -> Option<Duration> {
        self.watchdog_grace_ms.map(|grace| {
            Duration::from_secs(u64::from(self.scan_timeout_secs)) + Duration::from_millis(grace)
        })
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub session: SessionConfig,
    pub scan: ScanConfig,
}

impl BridgeConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails validation.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero scan or handshake timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.scan_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "scan.scan_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
