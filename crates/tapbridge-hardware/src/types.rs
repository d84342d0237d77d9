//! Common types shared between the kernel abstraction and its callers.
//!
//! This module defines the card-family bit flags accepted by the reader and
//! the device descriptor used to gate financial capability.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Card families a check-card request listens for.
///
/// The vendor reader takes a bitwise union of family flags. Only the two NFC
/// families are ever requested by this crate; the magnetic-stripe and
/// contact-IC families are kept so readers can recognise and refuse them
/// (enabling them on some terminal revisions causes a power fault).
///
/// # Examples
///
/// ```
/// use tapbridge_hardware::types::CardMode;
///
/// let mode = CardMode::FINANCIAL_NFC | CardMode::GENERAL_NFC;
/// assert_eq!(mode, CardMode::COMBINED_NFC);
/// assert_eq!(mode.bits(), 0x0C);
/// assert!(!mode.contains_legacy());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardMode(u32);

impl CardMode {
    /// Magnetic-stripe cards (legacy, never requested).
    pub const MAGNETIC: CardMode = CardMode(0x01);

    /// Contact IC cards (legacy, never requested).
    pub const CONTACT_IC: CardMode = CardMode(0x02);

    /// Contactless banking cards.
    pub const FINANCIAL_NFC: CardMode = CardMode(0x04);

    /// General-purpose contactless cards (Mifare, transit, ID).
    pub const GENERAL_NFC: CardMode = CardMode(0x08);

    /// Banking and general-purpose NFC in a single request.
    pub const COMBINED_NFC: CardMode = CardMode(0x04 | 0x08);

    /// Raw bit value passed to the vendor reader.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build a mode from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Check whether every flag of `other` is set in `self`.
    pub const fn contains(self, other: CardMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether a power-fault-prone legacy family is requested.
    pub const fn contains_legacy(self) -> bool {
        self.0 & (Self::MAGNETIC.0 | Self::CONTACT_IC.0) != 0
    }
}

impl BitOr for CardMode {
    type Output = CardMode;

    fn bitor(self, rhs: Self) -> Self::Output {
        CardMode(self.0 | rhs.0)
    }
}

impl fmt::Display for CardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Description of the terminal the bridge is running on.
///
/// Gathered at connect time from the platform: the device manufacturer and
/// the installed version of the vendor payment service. A missing service
/// version means the service package is not installed at all.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device manufacturer (e.g., "SUNMI").
    pub manufacturer: Option<String>,

    /// Version code of the installed vendor payment service.
    pub service_version: Option<u32>,
}

impl DeviceDescriptor {
    /// Create a descriptor for the given manufacturer with no service installed.
    pub fn new(manufacturer: impl Into<String>) -> Self {
        Self {
            manufacturer: Some(manufacturer.into()),
            service_version: None,
        }
    }

    /// Set the installed payment service version.
    pub fn with_service_version(mut self, version: u32) -> Self {
        self.service_version = Some(version);
        self
    }

    /// Check whether the manufacturer matches a vendor tag, case-insensitively.
    ///
    /// # Examples
    ///
    /// ```
    /// use tapbridge_hardware::types::DeviceDescriptor;
    ///
    /// let device = DeviceDescriptor::new("Sunmi Technology");
    /// assert!(device.is_vendor("SUNMI"));
    /// assert!(!DeviceDescriptor::default().is_vendor("SUNMI"));
    /// ```
    pub fn is_vendor(&self, tag: &str) -> bool {
        self.manufacturer
            .as_deref()
            .is_some_and(|m| m.to_uppercase().contains(&tag.to_uppercase()))
    }
}
