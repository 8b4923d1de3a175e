//! Status interpreter
//!
//! Maps a status word to the outcome the orchestrator acts on. Status words
//! with a flow-specific meaning (`69 85`, `6D 00`, `6A 82`) are classified as
//! fatal here and inspected directly by the flows that give them meaning.

use sentry_apdu_core::StatusWord;

/// Detail carried by a warning status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningDetail {
    /// `63 CX`: verification failed, X retries left
    RetriesRemaining(u8),
    /// `63 00`: no match found
    NoMatch,
}

/// Sensor conditions that clear on their own when the step is repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RetryableCondition {
    /// `67 45`
    #[display("finger removed")]
    FingerRemoved,
    /// `67 47`
    #[display("poor image quality")]
    PoorImageQuality,
    /// `67 48`
    #[display("user timeout expired")]
    UserTimeout,
    /// `67 49`
    #[display("host interface timeout")]
    HostInterfaceTimeout,
    /// `6F 87`
    #[display("no precise diagnosis")]
    NoPreciseDiagnosis,
}

/// Semantic outcome of a response status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// `90 00`
    Success,
    /// Processing completed with a warning
    Warning(WarningDetail),
    /// A transient hardware condition
    Retryable(RetryableCondition),
    /// Anything else, with the raw status word kept for diagnostics
    Fatal(StatusWord),
}

impl StatusOutcome {
    /// Whether the command completed normally
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Classify a status word
pub const fn interpret(sw: StatusWord) -> StatusOutcome {
    match (sw.sw1, sw.sw2) {
        (0x90, 0x00) => StatusOutcome::Success,
        (0x63, 0x00) => StatusOutcome::Warning(WarningDetail::NoMatch),
        (0x63, n) if (n & 0xF0) == 0xC0 => {
            StatusOutcome::Warning(WarningDetail::RetriesRemaining(n & 0x0F))
        }
        (0x67, 0x45) => StatusOutcome::Retryable(RetryableCondition::FingerRemoved),
        (0x67, 0x47) => StatusOutcome::Retryable(RetryableCondition::PoorImageQuality),
        (0x67, 0x48) => StatusOutcome::Retryable(RetryableCondition::UserTimeout),
        (0x67, 0x49) => StatusOutcome::Retryable(RetryableCondition::HostInterfaceTimeout),
        (0x6F, 0x87) => StatusOutcome::Retryable(RetryableCondition::NoPreciseDiagnosis),
        _ => StatusOutcome::Fatal(sw),
    }
}

/// Whether this status asks for the one-time code setup
pub const fn requires_setup(sw: StatusWord) -> bool {
    sw.is_conditions_not_satisfied()
}
