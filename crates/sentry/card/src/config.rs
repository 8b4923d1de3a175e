//! Configuration for the SentryCard orchestrator

use crate::constants::DEFAULT_NO_MATCH_RETRY_LIMIT;
use crate::retry::RetryPolicy;

/// SentryCard session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SentryConfig {
    /// Wrap enroll applet commands in the secure channel
    pub use_secure_channel: bool,

    /// Also open a secure channel on the verify applet
    pub secure_verify_applet: bool,

    /// Log every command and response at DEBUG instead of TRACE
    pub verbose: bool,

    /// Consecutive "no match performed" results retried before failing
    pub no_match_retry_limit: u32,

    /// Total reconnects allowed per operation, unbounded when `None`
    pub transient_retry_limit: Option<u32>,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            use_secure_channel: true,
            secure_verify_applet: false,
            verbose: false,
            no_match_retry_limit: DEFAULT_NO_MATCH_RETRY_LIMIT,
            transient_retry_limit: None,
        }
    }
}

impl SentryConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether enroll applet traffic is wrapped
    pub const fn with_secure_channel(mut self, enabled: bool) -> Self {
        self.use_secure_channel = enabled;
        self
    }

    /// Set whether verify applet traffic is wrapped
    pub const fn with_secure_verify_applet(mut self, enabled: bool) -> Self {
        self.secure_verify_applet = enabled;
        self
    }

    /// Set verbose APDU logging
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the consecutive "no match performed" budget
    pub const fn with_no_match_retry_limit(mut self, limit: u32) -> Self {
        self.no_match_retry_limit = limit;
        self
    }

    /// Set the total reconnect budget
    pub const fn with_transient_retry_limit(mut self, limit: Option<u32>) -> Self {
        self.transient_retry_limit = limit;
        self
    }

    /// Retry budget derived from this configuration
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            no_match_limit: self.no_match_retry_limit,
            transient_limit: self.transient_retry_limit,
        }
    }
}
