//! Core types and traits for APDU (Application Protocol Data Unit) operations
//!
//! This crate provides the foundational types for working with smart card
//! APDU commands and responses according to ISO/IEC 7816-4.
//!
//! ## Overview
//!
//! - [`Command`] builds command APDUs in short or extended length form
//! - [`Response`] splits a response APDU into payload and [`StatusWord`]
//! - [`CardTransport`] is the async exchange capability a card backend implements
//!
//! With the `mock` feature enabled, [`transport::MockTransport`] replays
//! scripted responses for tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod error;
pub mod response;
pub mod transport;

pub use command::{Command, ExpectedLength, LengthEncoding};
pub use error::Error;
pub use response::Response;
pub use response::status::StatusWord;
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    // Core types
    pub use crate::{Bytes, BytesMut, Error};

    // Command related
    pub use crate::command::{Command, ExpectedLength, LengthEncoding};

    // Response related
    pub use crate::Response;
    pub use crate::response::status::{StatusWord, common as status};

    // Transport layer
    pub use crate::transport::{CardTransport, TransportError};
}
