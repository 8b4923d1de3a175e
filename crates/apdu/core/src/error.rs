//! Core error type for APDU operations
//!
//! This module provides the error type shared by command encoding, response
//! parsing and transport exchanges. Status words are not errors at this level,
//! callers decide what a non-success status means for their flow.

use crate::transport::TransportError;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    //
    // Transport related errors
    //
    /// Error raised by the card transport
    #[error(transparent)]
    Transport(#[from] TransportError),

    //
    // Response related errors
    //
    /// Response shorter than a status word
    #[error("Response too short: {0} bytes")]
    ResponseTooShort(usize),

    //
    // Command related errors
    //
    /// Invalid command length
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    //
    // General errors
    //
    /// Other error with static message
    #[error("{0}")]
    Other(&'static str),
}

impl Error {
    /// Create a new error with a static message
    pub const fn other(message: &'static str) -> Self {
        Self::Other(message)
    }
}
