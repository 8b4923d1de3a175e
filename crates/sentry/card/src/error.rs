use sentry_apdu_core::{StatusWord, TransportError};

use crate::secure_channel::{ChannelError, KeyAgreementError};
use crate::types::DataSlot;

/// Result type for SentryCard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for SentryCard operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Transport-related errors
    #[error(transparent)]
    Transport(TransportError),

    /// Command encoding or response framing errors
    #[error(transparent)]
    Apdu(sentry_apdu_core::Error),

    /// The card answered with a status word the current step cannot handle
    #[error("Card returned status {0}: {desc}", desc = .0.description())]
    Status(StatusWord),

    //
    // Input validation
    //
    /// Enroll code with fewer than 4 or more than 6 digits
    #[error("Enroll code must have 4 to 6 digits, got {0}")]
    CodeLengthOutOfBounds(usize),

    /// Enroll code digit above 9
    #[error("Enroll code digit out of range: {0}")]
    CodeDigitOutOfBounds(u8),

    /// Payload larger than the data slot
    #[error("{len} bytes do not fit the {slot} data slot")]
    DataSizeNotSupported {
        /// Target slot
        slot: DataSlot,
        /// Rejected payload length
        len: usize,
    },

    /// Finger index outside 1..=2
    #[error("Invalid finger index: {0}")]
    InvalidFingerIndex(u8),

    //
    // Flow outcomes
    //
    /// The freshly enrolled finger did not verify, restart its enrollment
    #[error("Enrolled fingerprint failed verification, enrollment must restart")]
    EnrollVerification,

    /// Verification needs a card in verification mode
    #[error("Card is not enrolled")]
    NotEnrolled,

    /// Enrollment needs a card in enrollment mode
    #[error("Card is already enrolled")]
    EnrollModeNotAvailable,

    //
    // Secure channel
    //
    /// Authentication init returned a non-success status
    #[error("Secure channel initialization failed with status {0}")]
    SecureChannelInitialization(StatusWord),

    /// The applet predates secure messaging
    #[error("Secure communication not supported by the applet")]
    SecureCommunicationNotSupported,

    /// Key agreement backend failure
    #[error(transparent)]
    KeyAgreement(#[from] KeyAgreementError),

    /// Wrap or unwrap failure
    #[error(transparent)]
    Channel(#[from] ChannelError),

    //
    // Firmware or protocol mismatch
    //
    /// Enrollment status shorter than its layout
    #[error("Enrollment status buffer too small: expected {expected} bytes, got {actual}")]
    EnrollmentStatusBufferTooSmall {
        /// Minimum length of the layout
        expected: usize,
        /// Received length
        actual: usize,
    },

    /// Enrollment status with an unknown layout version
    #[error("Unsupported enroll applet version: {0}")]
    UnsupportedEnrollAppletVersion(u8),

    /// Malformed OS version response
    #[error("Invalid card OS version response: {0}")]
    CardOsVersion(&'static str),

    /// Response payload shorter than the operation needs
    #[error("Response too short: expected {expected} bytes, got {actual}")]
    ResponseTooShort {
        /// Minimum payload length
        expected: usize,
        /// Received length
        actual: usize,
    },

    //
    // Applet outcomes
    //
    /// Verify applet missing from the card
    #[error("Verify applet is not installed")]
    VerifyAppletNotInstalled,

    /// Verify applet too old for this stack
    #[error("Unsupported verify applet version {major}.{minor}")]
    VerifyAppletWrongVersion {
        /// Major version reported
        major: u8,
        /// Minor version reported
        minor: u8,
    },

    /// Biometric verification is not available
    #[error("CVM applet not available")]
    CvmAppletNotAvailable,

    /// Biometric verification is blocked
    #[error("CVM applet is blocked")]
    CvmAppletBlocked,

    /// The sensor did not run a match
    #[error("No fingerprint match was performed")]
    NoMatchPerformed,

    /// Unknown CVM result byte
    #[error("CVM applet error: {0:#04x}")]
    CvmAppletError(u8),
}

impl Error {
    /// Status word carried by this error
    pub fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::Status(sw) | Self::SecureChannelInitialization(sw) => Some(*sw),
            _ => None,
        }
    }

    /// Transport failure carried by this error
    pub const fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) | Self::Apdu(sentry_apdu_core::Error::Transport(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

impl From<sentry_apdu_core::Error> for Error {
    fn from(error: sentry_apdu_core::Error) -> Self {
        match error {
            sentry_apdu_core::Error::Transport(e) => Self::Transport(e),
            other => Self::Apdu(other),
        }
    }
}

impl From<StatusWord> for Error {
    fn from(status: StatusWord) -> Self {
        Self::Status(status)
    }
}
