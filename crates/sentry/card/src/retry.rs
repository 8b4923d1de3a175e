//! Retry state machine for the biometric flows
//!
//! Every attempt of a flow ends in an [`Attempt`]. Transient sensor and link
//! conditions become [`Attempt::Retry`] until their budget runs out, anything
//! else ends the flow.

use crate::status::{RetryableCondition, StatusOutcome, interpret};
use crate::Error;

/// Why an attempt is being repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RetryReason {
    /// `67 49`
    #[display("host interface timeout")]
    HostInterfaceTimeout,
    /// `6F 87`
    #[display("no precise diagnosis")]
    NoPreciseDiagnosis,
    /// `67 47`
    #[display("poor image quality")]
    PoorImageQuality,
    /// `67 48`
    #[display("user timeout expired")]
    UserTimeout,
    /// `67 45`
    #[display("finger removed")]
    FingerRemoved,
    /// The CVM reported that no match was attempted
    #[display("no match attempted")]
    NoMatchAttempted,
    /// The card left the field
    #[display("connection lost")]
    ConnectionLost,
}

impl From<RetryableCondition> for RetryReason {
    fn from(condition: RetryableCondition) -> Self {
        match condition {
            RetryableCondition::FingerRemoved => Self::FingerRemoved,
            RetryableCondition::PoorImageQuality => Self::PoorImageQuality,
            RetryableCondition::UserTimeout => Self::UserTimeout,
            RetryableCondition::HostInterfaceTimeout => Self::HostInterfaceTimeout,
            RetryableCondition::NoPreciseDiagnosis => Self::NoPreciseDiagnosis,
        }
    }
}

impl RetryReason {
    /// Classify an error, `None` when it is fatal
    pub fn classify(error: &Error) -> Option<Self> {
        if matches!(error, Error::NoMatchPerformed) {
            return Some(Self::NoMatchAttempted);
        }
        if error.transport_error().is_some_and(|e| e.is_connection_lost()) {
            return Some(Self::ConnectionLost);
        }
        match interpret(error.status_word()?) {
            StatusOutcome::Retryable(condition) => Some(condition.into()),
            _ => None,
        }
    }
}

/// Result of one attempt of a flow
#[derive(Debug)]
pub enum Attempt<T> {
    /// The flow finished
    Complete(T),
    /// Reconnect and run the attempt again
    Retry(RetryReason),
    /// The flow failed
    Fatal(Error),
}

/// Retry budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive "no match attempted" retries allowed
    pub no_match_limit: u32,
    /// Total retries allowed, unbounded when `None`
    pub transient_limit: Option<u32>,
}

/// Retry bookkeeping for one operation
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    no_match_streak: u32,
    retries: u32,
}

impl RetryState {
    /// Start with fresh counters
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            no_match_streak: 0,
            retries: 0,
        }
    }

    /// Retries granted so far
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Turn the result of an attempt into the next step
    ///
    /// A retryable error becomes fatal once its budget is spent, carrying the
    /// error of the last attempt.
    pub fn evaluate<T>(&mut self, result: Result<T, Error>) -> Attempt<T> {
        let error = match result {
            Ok(value) => return Attempt::Complete(value),
            Err(error) => error,
        };

        match RetryReason::classify(&error) {
            Some(reason) if self.allow(reason) => Attempt::Retry(reason),
            _ => Attempt::Fatal(error),
        }
    }

    fn allow(&mut self, reason: RetryReason) -> bool {
        if reason == RetryReason::NoMatchAttempted {
            self.no_match_streak += 1;
            if self.no_match_streak > self.policy.no_match_limit {
                return false;
            }
        } else {
            self.no_match_streak = 0;
        }

        if self
            .policy
            .transient_limit
            .is_some_and(|limit| self.retries >= limit)
        {
            return false;
        }
        self.retries += 1;
        true
    }
}
