//! Client protocol stack for biometric SentryCard applets
//!
//! The card hosts three applets: an enroll applet that records fingerprints
//! and reports biometric status, a CVM applet that matches fingers, and a
//! verify applet with data slots gated by a fingerprint match.
//!
//! ## Overview
//!
//! - [`SentryCard`] runs the enrollment, verification and data slot flows,
//!   repeating an attempt on transient sensor or link conditions
//! - [`BiometricLink`] owns the transport and the channel state, wrapping
//!   every exchange once a secure channel is open
//! - [`Session`] implements the AES-CBC and CMAC secure messaging, fed by a
//!   [`KeyAgreement`] backend supplied by the caller
//! - [`commands`] builds every command APDU the applets understand
//!
//! Progress is reported through an [`EventListener`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

mod biometrics;
pub mod commands;
mod config;
pub mod constants;
mod error;
mod events;
mod retry;
mod secure_channel;
mod sentry;
pub mod status;
mod types;

pub use biometrics::{Applet, BiometricLink};
pub use commands::EnrollCode;
pub use config::SentryConfig;
pub use error::{Error, Result};
pub use events::{EventListener, SessionEvent};
pub use retry::{Attempt, RetryPolicy, RetryReason, RetryState};
pub use secure_channel::{
    AuthInitReply, ChannelError, KeyAgreement, KeyAgreementError, Session, SessionInit,
    SessionKeys,
};
pub use sentry::SentryCard;
pub use types::{
    BiometricMode, CardVersionInfo, DataSlot, EnrollmentStatus, FingerCounters, FingerTouches,
    FingerprintMatch, FingerprintValidationAndData, Version, VersionInfo,
};

pub use sentry_apdu_core::{CardTransport, StatusWord, TransportError};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::{
        DataSlot, EnrollmentStatus, Error, EventListener, FingerprintMatch, KeyAgreement, Result,
        SentryCard, SentryConfig, SessionEvent,
    };
    pub use sentry_apdu_core::prelude::*;
}
