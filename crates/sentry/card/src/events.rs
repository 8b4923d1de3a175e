//! Progress events reported while a flow runs

use crate::retry::RetryReason;

/// Something the caller may want to show the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionEvent {
    /// The card is connected and the flow is starting
    Connected,
    /// A transient condition dropped the link, the step will be repeated
    TransientDisconnect(RetryReason),
    /// The flow has finished with the card
    Disconnected,
    /// The sensor is waiting for a finger
    AwaitingFingerprint,
    /// A touch was processed
    EnrollmentProgress {
        /// Finger being enrolled, 1-based
        finger: u8,
        /// Touches recorded for this finger
        step: u8,
        /// Touches this finger needs in total
        total: u8,
        /// Whether this event follows a touch made in this session
        new_touch: bool,
    },
    /// The current finger is done and the next one starts
    FingerTransition {
        /// Finger to enroll next, 1-based
        next_finger: u8,
    },
    /// Every finger is enrolled
    EnrollmentComplete,
}

/// Receiver for [`SessionEvent`]s
///
/// Implemented for any `Fn(SessionEvent)` closure.
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: SessionEvent);
}

impl<F> EventListener for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: SessionEvent) {
        self(event)
    }
}
