//! Query results and payload layouts of the SentryCard applets

mod enrollment;
mod fingerprint;
mod version;

pub use enrollment::{BiometricMode, EnrollmentStatus, FingerCounters, FingerTouches};
pub use fingerprint::{FingerprintMatch, FingerprintValidationAndData};
pub use version::{CardVersionInfo, Version, VersionInfo};

use crate::constants::{HUGE_SLOT_CAPACITY, SMALL_SLOT_CAPACITY};

/// Storage areas of the verify applet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataSlot {
    /// Up to 255 bytes, with secured and unsecured access
    #[display("small")]
    Small,
    /// Up to 2048 bytes, secured access only
    #[display("huge")]
    Huge,
}

impl DataSlot {
    /// Largest payload the slot accepts
    pub const fn capacity(self) -> usize {
        match self {
            Self::Small => SMALL_SLOT_CAPACITY,
            Self::Huge => HUGE_SLOT_CAPACITY,
        }
    }

    /// Smallest slot that holds `len` bytes
    pub const fn for_len(len: usize) -> Self {
        if len <= SMALL_SLOT_CAPACITY { Self::Small } else { Self::Huge }
    }
}
