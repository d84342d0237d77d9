//! Mapping from raw reader events to caller-visible outcomes.
//!
//! The reader reports the same logical outcome through several callback
//! shapes. [`ResultNormalizer::normalize`] reduces each event to a
//! [`Disposition`]: either a [`ScanResult`] to deliver, or a reason to
//! ignore the event and keep waiting.
//!
//! # Rules
//!
//! Applied in order:
//!
//! 1. Magnetic-stripe and contact-IC events are ignored.
//! 2. Card-found events resolve to [`ScanResult::NfcTag`], with an empty
//!    identifier if the reader supplied none.
//! 3. Bare-code errors are handled as bundle errors without a bundle.
//! 4. The code selected by the [`SuppressionPolicy`] is ignored.
//! 5. A bundle error that still carries an identifier resolves to `NfcTag`.
//! 6. Codes [`NON_PAYMENT_CODES`] resolve to [`ScanResult::NonPaymentCard`].
//! 7. Anything else resolves to [`ScanResult::Failure`].

use tapbridge_hardware::event::{Diagnostics, HardwareEvent, UNKNOWN_CODE, UNKNOWN_MESSAGE};
use tracing::{debug, error, warn};

use crate::config::{ScanConfig, SuppressionPolicy};
use crate::result::ScanResult;

/// Error codes the kernel uses for a present but non-financial card.
pub const NON_PAYMENT_CODES: [i32; 2] = [-2549, -2520];

/// Why an event did not resolve the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Magnetic-stripe or contact-IC event.
    LegacyCardFamily,

    /// Error code treated as transient noise.
    SuppressedCode(i32),
}

/// What to do with one reader event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Deliver this outcome to the caller.
    Resolve(ScanResult),

    /// Drop the event; the scan stays armed.
    Ignore(IgnoreReason),
}

impl Disposition {
    /// The outcome, if this disposition resolves the scan.
    pub fn into_result(self) -> Option<ScanResult> {
        match self {
            Self::Resolve(result) => Some(result),
            Self::Ignore(_) => None,
        }
    }
}

/// Stateless event-to-outcome mapper.
///
/// # Examples
///
/// ```
/// use tapbridge_core::config::SuppressionPolicy;
/// use tapbridge_core::normalizer::{Disposition, IgnoreReason, ResultNormalizer};
/// use tapbridge_core::ScanResult;
/// use tapbridge_hardware::HardwareEvent;
///
/// let normalizer = ResultNormalizer::new(SuppressionPolicy::RepeatedCall);
///
/// assert_eq!(
///     normalizer.normalize(&HardwareEvent::card_found("04AABBCC")),
///     Disposition::Resolve(ScanResult::NfcTag { uuid: "04AABBCC".to_string() })
/// );
/// assert_eq!(
///     normalizer.normalize(&HardwareEvent::error_code(-20001)),
///     Disposition::Ignore(IgnoreReason::SuppressedCode(-20001))
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultNormalizer {
    policy: SuppressionPolicy,
    log_diagnostics: bool,
}

impl ResultNormalizer {
    /// Create a normalizer with the given suppression policy.
    pub fn new(policy: SuppressionPolicy) -> Self {
        Self {
            policy,
            log_diagnostics: false,
        }
    }

    /// Create a normalizer from scan settings.
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.suppression).with_diagnostics_logging(config.log_diagnostics)
    }

    /// Enable or disable verbatim logging of bundle fields.
    pub fn with_diagnostics_logging(mut self, enabled: bool) -> Self {
        self.log_diagnostics = enabled;
        self
    }

    /// The active suppression policy.
    pub fn policy(&self) -> SuppressionPolicy {
        self.policy
    }

    /// Map one reader event.
    pub fn normalize(&self, event: &HardwareEvent) -> Disposition {
        match event {
            HardwareEvent::MagCardFound(_)
            | HardwareEvent::IcCardFound { .. }
            | HardwareEvent::IcCardFoundWithDiagnostics(_) => {
                Disposition::Ignore(IgnoreReason::LegacyCardFamily)
            }
            HardwareEvent::CardFound { uuid } => nfc_tag(uuid.as_deref()),
            HardwareEvent::CardFoundWithDiagnostics(bundle) => {
                self.log_bundle(event, bundle);
                nfc_tag(bundle.identifier())
            }
            HardwareEvent::ErrorCode { code, message } => {
                warn!(
                    code,
                    message = %message,
                    "Bare error callback, handling as bundle error without details"
                );
                self.normalize_error(None)
            }
            HardwareEvent::ErrorWithDiagnostics(bundle) => {
                if let Some(bundle) = bundle {
                    self.log_bundle(event, bundle);
                }
                self.normalize_error(bundle.as_ref())
            }
        }
    }

    fn normalize_error(&self, bundle: Option<&Diagnostics>) -> Disposition {
        let code = bundle.map_or(UNKNOWN_CODE, Diagnostics::code);
        let message = bundle.map_or(UNKNOWN_MESSAGE, Diagnostics::message);

        if code == self.policy.suppressed_code() {
            warn!(code, policy = ?self.policy, "Ignoring transient reader error");
            return Disposition::Ignore(IgnoreReason::SuppressedCode(code));
        }

        error!(code, message = %message, "Reader reported an error");

        if let Some(uuid) = bundle.and_then(Diagnostics::identifier) {
            debug!(uuid = %uuid, "Recovered card identifier from error callback");
            return nfc_tag(Some(uuid));
        }

        if NON_PAYMENT_CODES.contains(&code) {
            return Disposition::Resolve(ScanResult::NonPaymentCard { code });
        }

        Disposition::Resolve(ScanResult::Failure {
            message: format!("Error: {} - {}", code, message),
        })
    }

    fn log_bundle(&self, event: &HardwareEvent, bundle: &Diagnostics) {
        if !self.log_diagnostics {
            return;
        }
        for (key, value) in bundle.iter() {
            debug!(callback = event.callback_name(), key, value, "Diagnostic field");
        }
    }
}

fn nfc_tag(uuid: Option<&str>) -> Disposition {
    Disposition::Resolve(ScanResult::NfcTag {
        uuid: uuid.unwrap_or_default().to_string(),
    })
}
