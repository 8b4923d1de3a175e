use crate::{Error, Result};

/// Enrollment state reported by the card as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BiometricMode {
    /// Fingers still need to be enrolled
    #[display("enrollment")]
    Enrollment,
    /// Every finger is enrolled, matching is available
    #[display("verification")]
    Verification,
}

/// Progress of a single finger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FingerTouches {
    /// Touches recorded so far
    pub enrolled_touches: u8,
    /// Touches still required
    pub remaining_touches: u8,
    /// Internal biometric state of the finger, absent on legacy cards
    pub biometric_mode: Option<u8>,
    /// Top-up, qualification and retry counters, absent on legacy cards
    pub counters: Option<FingerCounters>,
}

/// Secondary per finger counters reported by versioned enroll applets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FingerCounters {
    /// Top-up touches
    pub topup_touches: u8,
    /// Qualification touches
    pub qualification_touches: u8,
    /// Qualification touches that passed
    pub qualification_passes: u8,
    /// Top-up touches still remaining
    pub topup_remaining: u8,
    /// Top-up attempts made
    pub topup_attempts: u8,
}

/// Snapshot of the enroll applet status
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnrollmentStatus {
    /// Layout version byte
    pub version: u8,
    /// Number of fingers the card enrolls
    pub max_fingers: u8,
    /// Per finger progress, index 0 is finger 1
    pub fingers: Vec<FingerTouches>,
    /// Next finger to enroll, 1-based
    pub next_finger: u8,
    /// Card wide mode
    pub mode: BiometricMode,
    /// Mode byte as sent; versioned layouts derive `mode` from the finger states instead
    pub raw_mode: u8,
    /// Re-enrollment attempts, absent on legacy cards
    pub reenroll_attempts: Option<u8>,
}

/// Field offsets of one on-wire layout
struct Layout {
    min_len: usize,
    max_fingers: usize,
    /// Start of each finger record
    fingers: &'static [usize],
    next_finger: Option<usize>,
    reenroll_attempts: Option<usize>,
    mode: usize,
}

/// Offsets within a finger record
mod finger {
    pub(super) const ENROLLED: usize = 0;
    pub(super) const REMAINING: usize = 1;
    pub(super) const TOPUP: usize = 2;
    pub(super) const QUALIFICATION_TOUCHES: usize = 3;
    pub(super) const QUALIFICATION_PASSES: usize = 4;
    pub(super) const BIOMETRIC_MODE: usize = 5;
    pub(super) const TOPUP_REMAINING: usize = 6;
    pub(super) const TOPUP_ATTEMPTS: usize = 7;
}

/// Single finger layout of enroll applets before 2.1
static LEGACY: Layout = Layout {
    min_len: 40,
    max_fingers: 31,
    fingers: &[32],
    next_finger: None,
    reenroll_attempts: None,
    mode: 39,
};

/// Two finger layout, version byte 1
static MULTI_FINGER: Layout = Layout {
    min_len: 51,
    max_fingers: 31,
    fingers: &[32, 40],
    next_finger: Some(49),
    reenroll_attempts: Some(48),
    mode: 50,
};

/// Bytes every layout needs before the version can be trusted
const MIN_STATUS_LEN: usize = 40;

impl EnrollmentStatus {
    /// Parse the payload of a get enroll status response
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_STATUS_LEN {
            return Err(Error::EnrollmentStatusBufferTooSmall {
                expected: MIN_STATUS_LEN,
                actual: data.len(),
            });
        }

        let version = data[0];
        let layout = match version {
            0 => &LEGACY,
            1 => &MULTI_FINGER,
            other => return Err(Error::UnsupportedEnrollAppletVersion(other)),
        };
        if data.len() < layout.min_len {
            return Err(Error::EnrollmentStatusBufferTooSmall {
                expected: layout.min_len,
                actual: data.len(),
            });
        }

        let versioned = layout.next_finger.is_some();
        let fingers: Vec<FingerTouches> = layout
            .fingers
            .iter()
            .map(|&base| {
                let record = &data[base..];
                FingerTouches {
                    enrolled_touches: record[finger::ENROLLED],
                    remaining_touches: record[finger::REMAINING],
                    biometric_mode: versioned.then(|| record[finger::BIOMETRIC_MODE]),
                    counters: versioned.then(|| FingerCounters {
                        topup_touches: record[finger::TOPUP],
                        qualification_touches: record[finger::QUALIFICATION_TOUCHES],
                        qualification_passes: record[finger::QUALIFICATION_PASSES],
                        topup_remaining: record[finger::TOPUP_REMAINING],
                        topup_attempts: record[finger::TOPUP_ATTEMPTS],
                    }),
                }
            })
            .collect();

        let max_fingers = data[layout.max_fingers];
        let mode = if versioned {
            // Verification once every finger the card uses has finished enrolling
            let active = (max_fingers as usize).clamp(1, fingers.len());
            if fingers[..active]
                .iter()
                .all(|f| f.biometric_mode.is_some_and(|m| m > 1))
            {
                BiometricMode::Verification
            } else {
                BiometricMode::Enrollment
            }
        } else if data[layout.mode] == 0 {
            BiometricMode::Enrollment
        } else {
            BiometricMode::Verification
        };

        Ok(Self {
            version,
            max_fingers,
            fingers,
            next_finger: layout.next_finger.map_or(1, |offset| data[offset]),
            mode,
            raw_mode: data[layout.mode],
            reenroll_attempts: layout.reenroll_attempts.map(|offset| data[offset]),
        })
    }

    /// Progress of a finger, 1-based
    pub fn finger(&self, index: u8) -> Option<&FingerTouches> {
        self.fingers.get(usize::from(index).checked_sub(1)?)
    }

    /// Whether the card is ready to match fingerprints
    pub fn is_enrolled(&self) -> bool {
        self.mode == BiometricMode::Verification
    }
}
