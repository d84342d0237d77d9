//! Raw events emitted by the vendor card reader.
//!
//! The vendor callback interface is a wide set of near-empty overrides
//! (`findMagCard`, `findICCard`, `findRFCard`, `onError`, and their bundle
//! forms). Here it collapses into one tagged enum, [`HardwareEvent`], which
//! a single [`CheckCardCallback`](crate::traits::CheckCardCallback) receives.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bundle key carrying the numeric error code.
pub const KEY_CODE: &str = "code";

/// Bundle key carrying the error message.
pub const KEY_MESSAGE: &str = "msg";

/// Primary bundle key for the card identifier.
pub const KEY_UUID: &str = "uuid";

/// Alternate bundle key for the card identifier used by some firmware.
pub const KEY_UID: &str = "uid";

/// Code reported when a bundle carries no usable code.
pub const UNKNOWN_CODE: i32 = -1;

/// Message reported when a bundle carries no message.
pub const UNKNOWN_MESSAGE: &str = "Unknown";

/// Key/value payload attached to the richer callback forms.
///
/// Values are kept as strings exactly as the vendor reported them; typed
/// accessors parse on demand.
///
/// # Examples
///
/// ```
/// use tapbridge_hardware::event::Diagnostics;
///
/// let bundle = Diagnostics::new()
///     .with("code", "-2549")
///     .with("msg", "not a payment card");
///
/// assert_eq!(bundle.code(), -2549);
/// assert_eq!(bundle.message(), "not a payment card");
/// assert_eq!(bundle.identifier(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(BTreeMap<String, String>);

impl Diagnostics {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any previous value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a field, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Check whether a field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Numeric error code, or [`UNKNOWN_CODE`] when missing or unparseable.
    pub fn code(&self) -> i32 {
        self.get(KEY_CODE)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(UNKNOWN_CODE)
    }

    /// Error message, or [`UNKNOWN_MESSAGE`] when missing.
    pub fn message(&self) -> &str {
        self.get(KEY_MESSAGE).unwrap_or(UNKNOWN_MESSAGE)
    }

    /// Card identifier under `uuid`, falling back to `uid`.
    pub fn identifier(&self) -> Option<&str> {
        self.get(KEY_UUID).or_else(|| self.get(KEY_UID))
    }

    /// Iterate over all fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the bundle has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Diagnostics
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One notification from the vendor reader's callback surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum HardwareEvent {
    /// Magnetic-stripe card swiped (legacy family).
    MagCardFound(Diagnostics),

    /// Contact IC card inserted (legacy family).
    IcCardFound { atr: String },

    /// Contact IC card inserted, bundle form (legacy family).
    IcCardFoundWithDiagnostics(Diagnostics),

    /// Contactless card detected with a bare identifier.
    CardFound { uuid: Option<String> },

    /// Contactless card detected, bundle form.
    CardFoundWithDiagnostics(Diagnostics),

    /// Error reported as a bare code and message.
    ErrorCode { code: i32, message: String },

    /// Error reported as a bundle; the bundle itself may be missing.
    ErrorWithDiagnostics(Option<Diagnostics>),
}

impl HardwareEvent {
    /// Contactless card detected with the given identifier.
    pub fn card_found(uuid: impl Into<String>) -> Self {
        Self::CardFound {
            uuid: Some(uuid.into()),
        }
    }

    /// Bundle-form error carrying only a code.
    pub fn error_code(code: i32) -> Self {
        Self::ErrorWithDiagnostics(Some(
            Diagnostics::new().with(KEY_CODE, code.to_string()),
        ))
    }

    /// Check whether this event belongs to a legacy card family.
    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            Self::MagCardFound(_) | Self::IcCardFound { .. } | Self::IcCardFoundWithDiagnostics(_)
        )
    }

    /// Short name of the callback that produced this event, for logging.
    pub fn callback_name(&self) -> &'static str {
        match self {
            Self::MagCardFound(_) => "findMagCard",
            Self::IcCardFound { .. } => "findICCard",
            Self::IcCardFoundWithDiagnostics(_) => "findICCardEx",
            Self::CardFound { .. } => "findRFCard",
            Self::CardFoundWithDiagnostics(_) => "findRFCardEx",
            Self::ErrorCode { .. } => "onError",
            Self::ErrorWithDiagnostics(_) => "onErrorEx",
        }
    }
}
