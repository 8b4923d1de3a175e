//! Secure channel for the enroll applet
//!
//! Commands are encrypted with AES-128-CBC under an IV derived from the message
//! counter, and authenticated with an AES-CMAC chained over every command of
//! the session. Responses carry a truncated CMAC under the response MAC key.

mod crypto;
mod key_agreement;
mod session;

pub use key_agreement::{AuthInitReply, KeyAgreement, KeyAgreementError, SessionInit, SessionKeys};
pub use session::Session;

/// Failures while wrapping or unwrapping secure channel messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Response MAC did not verify
    #[error("Response MAC mismatch")]
    MacMismatch,

    /// Decrypted data did not end in ISO 7816 padding
    #[error("Invalid padding")]
    InvalidPadding,

    /// Encrypted data is not a whole number of blocks
    #[error("Invalid encrypted data length: {0}")]
    InvalidLength(usize),

    /// Session key has the wrong size
    #[error("Invalid key length")]
    InvalidKeyLength,

    /// Wrapped response shorter than a MAC and a status word
    #[error("Wrapped response too short: {0} bytes")]
    ResponseTooShort(usize),

    /// Wrapped command does not fit an extended APDU
    #[error("Command too long to wrap: {0} bytes")]
    CommandTooLong(usize),

    /// Authentication init reply has an unexpected layout
    #[error("Malformed authentication init reply: {0}")]
    MalformedAuthReply(&'static str),
}
