//! SentryCard orchestrator
//!
//! [`SentryCard`] drives the enrollment, verification and data storage flows
//! over a [`BiometricLink`]. Enrollment and verification run under the retry
//! state machine: transient sensor or link conditions reconnect and repeat
//! the attempt, while progress already recorded on the card is kept.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use sentry_apdu_core::CardTransport;
use sentry_apdu_core::response::status::common::NO_MATCH;
use tracing::{debug, info, warn};

use crate::biometrics::BiometricLink;
use crate::commands::{EnrollCode, check_slot_size};
use crate::config::SentryConfig;
use crate::events::{EventListener, SessionEvent};
use crate::retry::{Attempt, RetryReason, RetryState};
use crate::secure_channel::KeyAgreement;
use crate::types::{
    CardVersionInfo, DataSlot, EnrollmentStatus, FingerprintMatch, FingerprintValidationAndData,
};
use crate::{Error, Result};

/// Run `$attempt` until it completes, fails fatally or exhausts its budget
macro_rules! with_retry {
    ($card:ident, $attempt:expr) => {{
        let mut retry = RetryState::new($card.config.retry_policy());
        loop {
            match retry.evaluate($attempt) {
                Attempt::Complete(value) => break Ok(value),
                Attempt::Fatal(error) => break Err(error),
                Attempt::Retry(reason) => {
                    if let Err(error) = $card.recover(reason).await {
                        break Err(error);
                    }
                }
            }
        }
    }};
}

/// Client for one SentryCard
pub struct SentryCard<T, K> {
    link: BiometricLink<T, K>,
    config: SentryConfig,
    code: EnrollCode,
    listener: Option<Arc<dyn EventListener>>,
}

impl<T: fmt::Debug, K: fmt::Debug> fmt::Debug for SentryCard<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentryCard")
            .field("link", &self.link)
            .field("config", &self.config)
            .field("code", &self.code)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl<T, K> SentryCard<T, K>
where
    T: CardTransport,
    K: KeyAgreement,
{
    /// Create a client, validating the enroll code up front
    pub fn new(transport: T, agreement: K, code: &[u8], config: SentryConfig) -> Result<Self> {
        Ok(Self {
            link: BiometricLink::new(transport, agreement, config.verbose),
            config,
            code: EnrollCode::new(code)?,
            listener: None,
        })
    }

    /// Report progress to `listener`
    pub fn with_listener(mut self, listener: impl EventListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Active configuration
    pub const fn config(&self) -> &SentryConfig {
        &self.config
    }

    /// Channel-aware link to the card
    pub const fn link(&self) -> &BiometricLink<T, K> {
        &self.link
    }

    /// Release the transport and key agreement backend
    pub fn into_parts(self) -> (T, K) {
        self.link.into_parts()
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(listener) = &self.listener {
            listener.on_event(event);
        }
    }

    async fn start(&mut self) -> Result<()> {
        self.link.connect().await?;
        self.emit(SessionEvent::Connected);
        Ok(())
    }

    fn finish(&mut self) {
        self.link.disconnect();
        self.emit(SessionEvent::Disconnected);
    }

    async fn recover(&mut self, reason: RetryReason) -> Result<()> {
        info!(%reason, "Transient condition, reconnecting");
        self.emit(SessionEvent::TransientDisconnect(reason));
        self.link.reconnect().await
    }

    async fn initialize_enroll(&mut self) -> Result<EnrollmentStatus> {
        self.link
            .initialize_enroll(&self.code, self.config.use_secure_channel)
            .await?;
        self.link.enrollment_status().await
    }

    async fn initialize_verify(&mut self) -> Result<()> {
        self.link
            .initialize_verify(self.config.secure_verify_applet)
            .await
    }

    /// Versions of the card OS and every applet
    pub async fn card_software_versions(&mut self) -> Result<CardVersionInfo> {
        let result = self.card_software_versions_inner().await;
        self.finish();
        result
    }

    async fn card_software_versions_inner(&mut self) -> Result<CardVersionInfo> {
        self.start().await?;
        let os = self.link.os_version().await?;
        let verify = self.link.verify_applet_version().await?;
        let enroll = self.link.enroll_applet_version().await?;
        let cvm = self.link.cvm_applet_version().await?;
        Ok(CardVersionInfo {
            os,
            enroll,
            cvm,
            verify,
        })
    }

    /// Current enrollment status
    pub async fn enrollment_status(&mut self) -> Result<EnrollmentStatus> {
        let result = match self.start().await {
            Ok(()) => self.initialize_enroll().await,
            Err(error) => Err(error),
        };
        self.finish();
        result
    }

    /// Match the finger on the sensor against the enrolled fingerprints
    ///
    /// Fails with [`Error::NotEnrolled`] while the card is still enrolling.
    pub async fn validate_fingerprint(&mut self) -> Result<FingerprintMatch> {
        let result = with_retry!(self, self.validate_attempt().await);
        self.finish();
        result
    }

    async fn validate_attempt(&mut self) -> Result<FingerprintMatch> {
        self.start().await?;
        let status = self.initialize_enroll().await?;
        if !status.is_enrolled() {
            return Err(Error::NotEnrolled);
        }

        self.initialize_verify().await?;
        self.emit(SessionEvent::AwaitingFingerprint);
        self.link.fingerprint_verification().await
    }

    /// Enroll every remaining finger
    ///
    /// With `restart`, the first touch erases the recorded biometric data and
    /// enrollment starts over. This is the recovery for
    /// [`Error::EnrollVerification`].
    pub async fn enroll_fingerprint(&mut self, restart: bool) -> Result<()> {
        let mut restart = restart;
        let result = with_retry!(self, self.enroll_attempt(&mut restart).await);
        self.finish();
        result
    }

    async fn enroll_attempt(&mut self, restart: &mut bool) -> Result<()> {
        self.start().await?;
        let status = self.initialize_enroll().await?;
        if status.is_enrolled() {
            return Err(Error::EnrollModeNotAvailable);
        }

        self.enroll_fingers(status, restart).await?;
        self.emit(SessionEvent::EnrollmentComplete);
        Ok(())
    }

    /// Enroll any remaining fingers, then store `data` behind a fingerprint match
    ///
    /// Payloads up to 255 bytes go to the small slot, larger ones to the huge
    /// slot. A finger that does not match surfaces as status `63 00`.
    pub async fn enroll_and_store(&mut self, restart: bool, data: Option<&[u8]>) -> Result<()> {
        if let Some(data) = data {
            check_slot_size(DataSlot::for_len(data.len()), data.len())?;
        }

        let mut restart = restart;
        let result = with_retry!(self, self.enroll_and_store_attempt(&mut restart, data).await);
        self.finish();
        result
    }

    async fn enroll_and_store_attempt(
        &mut self,
        restart: &mut bool,
        data: Option<&[u8]>,
    ) -> Result<()> {
        self.start().await?;
        let status = self.initialize_enroll().await?;
        if !status.is_enrolled() {
            self.enroll_fingers(status, restart).await?;
            self.emit(SessionEvent::EnrollmentComplete);
        }

        if let Some(data) = data {
            self.initialize_verify().await?;
            self.emit(SessionEvent::AwaitingFingerprint);
            let result = self
                .link
                .write_secured(DataSlot::for_len(data.len()), data)
                .await?;
            if !result.is_match() {
                return Err(Error::Status(NO_MATCH));
            }
        }
        Ok(())
    }

    async fn enroll_fingers(&mut self, status: EnrollmentStatus, restart: &mut bool) -> Result<()> {
        let last_finger = status
            .max_fingers
            .clamp(1, u8::try_from(status.fingers.len()).unwrap_or(u8::MAX));
        let mut finger = status.next_finger.max(1);
        let mut status = status;

        loop {
            let touches = *status
                .finger(finger)
                .ok_or(Error::InvalidFingerIndex(finger))?;
            let total = touches
                .enrolled_touches
                .saturating_add(touches.remaining_touches);
            let mut remaining = if *restart {
                total
            } else {
                touches.remaining_touches
            };
            debug!(finger, remaining, total, "Enrolling finger");
            self.emit(SessionEvent::EnrollmentProgress {
                finger,
                step: total.saturating_sub(remaining),
                total,
                new_touch: false,
            });

            while remaining > 0 {
                remaining = self.link.process_fingerprint(finger, *restart).await?;
                *restart = false;
                self.emit(SessionEvent::EnrollmentProgress {
                    finger,
                    step: total.saturating_sub(remaining),
                    total,
                    new_touch: true,
                });
            }

            self.emit(SessionEvent::EnrollmentProgress {
                finger,
                step: total,
                total,
                new_touch: false,
            });
            self.link.verify_enrolled_fingerprint().await?;
            info!(finger, "Finger enrolled");

            if finger >= last_finger {
                return Ok(());
            }
            finger += 1;
            self.emit(SessionEvent::FingerTransition {
                next_finger: finger,
            });
            status = self.link.enrollment_status().await?;
            if status.is_enrolled() {
                return Ok(());
            }
        }
    }

    /// Write the small slot without a fingerprint match
    pub async fn store_data_unsecure(&mut self, data: &[u8]) -> Result<()> {
        check_slot_size(DataSlot::Small, data.len())?;
        let result = self.store_data_unsecure_inner(data).await;
        self.finish();
        result
    }

    async fn store_data_unsecure_inner(&mut self, data: &[u8]) -> Result<()> {
        self.start().await?;
        self.initialize_verify().await?;
        self.link.write_unsecured(data).await
    }

    /// Read the small slot without a fingerprint match
    pub async fn retrieve_data_unsecure(&mut self) -> Result<Bytes> {
        let result = self.retrieve_data_unsecure_inner().await;
        self.finish();
        result
    }

    async fn retrieve_data_unsecure_inner(&mut self) -> Result<Bytes> {
        self.start().await?;
        self.initialize_verify().await?;
        self.link.read_unsecured().await
    }

    /// Write a slot once the finger on the sensor matches
    pub async fn store_data_secure(&mut self, data: &[u8], slot: DataSlot) -> Result<FingerprintMatch> {
        check_slot_size(slot, data.len())?;
        let result = self.store_data_secure_inner(data, slot).await;
        self.finish();
        result
    }

    async fn store_data_secure_inner(&mut self, data: &[u8], slot: DataSlot) -> Result<FingerprintMatch> {
        self.prepare_secured_slot().await?;
        self.link.write_secured(slot, data).await
    }

    /// Read a slot once the finger on the sensor matches
    pub async fn retrieve_data_secure(&mut self, slot: DataSlot) -> Result<FingerprintValidationAndData> {
        let result = self.retrieve_data_secure_inner(slot).await;
        self.finish();
        result
    }

    async fn retrieve_data_secure_inner(
        &mut self,
        slot: DataSlot,
    ) -> Result<FingerprintValidationAndData> {
        self.prepare_secured_slot().await?;
        self.link.read_secured(slot).await
    }

    async fn prepare_secured_slot(&mut self) -> Result<()> {
        self.start().await?;
        let status = self.initialize_enroll().await?;
        if !status.is_enrolled() {
            return Err(Error::NotEnrolled);
        }
        self.initialize_verify().await?;
        self.emit(SessionEvent::AwaitingFingerprint);
        Ok(())
    }

    /// Erase all biometric data, development cards only
    pub async fn reset_biometric_data(&mut self) -> Result<()> {
        warn!("Resetting biometric data");
        let result = match self.start().await {
            Ok(()) => self.link.reset_biometric_data().await,
            Err(error) => Err(error),
        };
        self.finish();
        result
    }
}
