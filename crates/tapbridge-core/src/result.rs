//! Caller-visible outcome of a card check.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Marker the application layer branches on for non-payment cards.
pub const NON_PAYMENT_CARD_DETECTED: &str = "NON_PAYMENT_CARD_DETECTED";

/// Normalized outcome of one card check.
///
/// `NfcTag` and `NonPaymentCard` are both successful outcomes; only
/// `Failure` is an error from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanResult {
    /// A contactless card was detected.
    NfcTag { uuid: String },

    /// A card was present but the kernel classified it as non-financial.
    NonPaymentCard { code: i32 },

    /// The check ended with a hardware failure.
    Failure { message: String },
}

impl ScanResult {
    /// Check whether this outcome is success-shaped.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }

    /// Payload for the application layer.
    ///
    /// Successes become a JSON object; failures become the error message.
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use tapbridge_core::ScanResult;
    ///
    /// let tag = ScanResult::NfcTag { uuid: "04AABBCC".to_string() };
    /// assert_eq!(tag.to_payload(), Ok(json!({"type": "NFC", "uuid": "04AABBCC"})));
    ///
    /// let other = ScanResult::NonPaymentCard { code: -2549 };
    /// assert_eq!(
    ///     other.to_payload(),
    ///     Ok(json!({"type": "NFC", "error": "NON_PAYMENT_CARD_DETECTED", "code": -2549}))
    /// );
    /// ```
    pub fn to_payload(&self) -> Result<Value, String> {
        match self {
            Self::NfcTag { uuid } => Ok(json!({ "type": "NFC", "uuid": uuid })),
            Self::NonPaymentCard { code } => Ok(json!({
                "type": "NFC",
                "error": NON_PAYMENT_CARD_DETECTED,
                "code": code,
            })),
            Self::Failure { message } => Err(message.clone()),
        }
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NfcTag { uuid } => write!(f, "NFC tag {}", uuid),
            Self::NonPaymentCard { code } => write!(f, "non-payment card ({})", code),
            Self::Failure { message } => write!(f, "failure: {}", message),
        }
    }
}
