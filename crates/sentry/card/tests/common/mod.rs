//! Common test utilities
#![allow(dead_code)]

mod card;
mod ecdh;

use std::sync::{Arc, Mutex};

pub use card::{Sensor, SimulatedCard, VerifyApplet, bcd};
pub use ecdh::EcdhBackend;
use sentry_card::{SentryCard, SentryConfig, SessionEvent};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client for `card` with code 1234
pub fn sentry(card: SimulatedCard, config: SentryConfig) -> SentryCard<SimulatedCard, EcdhBackend> {
    init_tracing();
    let backend = EcdhBackend::new(card.public_key());
    SentryCard::new(card, backend, &[1, 2, 3, 4], config).expect("valid enroll code")
}

/// Shared log of every event a client reported
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<SessionEvent>>>);

impl EventLog {
    pub fn listener(&self) -> impl Fn(SessionEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |event| events.lock().unwrap().push(event)
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

/// `sentry` with an event log attached
pub fn sentry_with_events(
    card: SimulatedCard,
    config: SentryConfig,
) -> (SentryCard<SimulatedCard, EcdhBackend>, EventLog) {
    let log = EventLog::default();
    let client = sentry(card, config).with_listener(log.listener());
    (client, log)
}
