use bytes::Bytes;

use crate::constants::cvm_result;
use crate::{Error, Result};

/// Outcome of a fingerprint match performed by the CVM
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FingerprintMatch {
    /// The finger matched an enrolled fingerprint
    #[display("match")]
    Matched,
    /// The finger did not match
    #[display("no match")]
    NotMatched,
}

impl FingerprintMatch {
    /// Interpret a CVM result byte
    ///
    /// Anything other than a match or a clean mismatch is an error;
    /// [`Error::NoMatchPerformed`] is the only one worth retrying.
    pub const fn from_result_byte(byte: u8) -> Result<Self> {
        match byte {
            cvm_result::MATCH => Ok(Self::Matched),
            cvm_result::NO_MATCH => Ok(Self::NotMatched),
            cvm_result::NOT_AVAILABLE => Err(Error::CvmAppletNotAvailable),
            cvm_result::BLOCKED => Err(Error::CvmAppletBlocked),
            cvm_result::NO_MATCH_PERFORMED => Err(Error::NoMatchPerformed),
            other => Err(Error::CvmAppletError(other)),
        }
    }

    /// Interpret the payload of a get fingerprint verification response
    ///
    /// Current applets answer with the bare result byte. Older ones send a
    /// record of at least 6 bytes with the availability flag at offset 3,
    /// the result byte at offset 4 and the blocked flag at offset 5.
    pub fn from_verification(payload: &[u8]) -> Result<Self> {
        match payload {
            [byte] => Self::from_result_byte(*byte),
            [_, _, _, available, result, blocked, ..] => {
                if *available == 0 {
                    return Err(Error::CvmAppletNotAvailable);
                }
                if *blocked == 1 {
                    return Err(Error::CvmAppletBlocked);
                }
                Self::from_result_byte(*result)
            }
            _ => Err(Error::ResponseTooShort {
                expected: 1,
                actual: payload.len(),
            }),
        }
    }

    /// Whether the finger matched
    pub const fn is_match(self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// Result of reading a biometric gated data slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintValidationAndData {
    /// Outcome of the match the card ran before releasing the data
    pub matched: FingerprintMatch,
    /// Slot contents, empty unless the finger matched
    pub data: Bytes,
}

impl FingerprintValidationAndData {
    /// Interpret the payload of a secured data slot read
    ///
    /// A single byte is a result byte. Anything longer is the slot contents,
    /// which the card only releases after a match.
    pub fn from_secured_read(payload: Bytes) -> Result<Self> {
        match payload.as_ref() {
            [byte] => Ok(Self {
                matched: FingerprintMatch::from_result_byte(*byte)?,
                data: Bytes::new(),
            }),
            [] => Err(Error::ResponseTooShort {
                expected: 1,
                actual: 0,
            }),
            _ => Ok(Self {
                matched: FingerprintMatch::Matched,
                data: payload,
            }),
        }
    }

    /// Whether the finger matched
    pub const fn is_match(&self) -> bool {
        self.matched.is_match()
    }
}
