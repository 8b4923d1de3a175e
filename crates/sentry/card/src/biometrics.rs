//! Applet operations over a channel-aware link
//!
//! [`BiometricLink`] owns the transport, the key agreement backend and the
//! channel state. Selecting an applet always discards the current session, and
//! every exchange on a secured applet is wrapped and unwrapped transparently.

use std::mem;

use sentry_apdu_core::{CardTransport, Command, Response, StatusWord, TransportError};
use tracing::{Level, debug, info, trace, warn};

use crate::commands::{self, EnrollCode};
use crate::constants::{CVM_AID, ENROLL_AID, MIN_VERIFY_APPLET_VERSION, VERIFY_AID};
use crate::secure_channel::{KeyAgreement, Session};
use crate::status::{StatusOutcome, WarningDetail, interpret, requires_setup};
use crate::types::{
    DataSlot, EnrollmentStatus, FingerprintMatch, FingerprintValidationAndData, VersionInfo,
};
use crate::{Error, Result};

/// Applets resident on a SentryCard
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Applet {
    /// Enrollment and biometric status
    #[display("enroll")]
    Enroll,
    /// Cardholder verification method
    #[display("cvm")]
    Cvm,
    /// Data slots gated by a fingerprint match
    #[display("verify")]
    Verify,
}

impl Applet {
    /// Application identifier
    pub const fn aid(self) -> &'static [u8] {
        match self {
            Self::Enroll => ENROLL_AID,
            Self::Cvm => CVM_AID,
            Self::Verify => VERIFY_AID,
        }
    }
}

#[derive(Debug, Default)]
enum ChannelState {
    #[default]
    Disconnected,
    Connected,
    Selected(Applet),
    Secured { applet: Applet, session: Session },
}

impl ChannelState {
    const fn applet(&self) -> Option<Applet> {
        match self {
            Self::Selected(applet) | Self::Secured { applet, .. } => Some(*applet),
            _ => None,
        }
    }
}

/// Transport plus channel state for one card
#[derive(Debug)]
pub struct BiometricLink<T, K> {
    transport: T,
    agreement: K,
    state: ChannelState,
    verbose: bool,
}

impl<T, K> BiometricLink<T, K>
where
    T: CardTransport,
    K: KeyAgreement,
{
    /// Create a link, nothing is sent until the first operation
    pub fn new(transport: T, agreement: K, verbose: bool) -> Self {
        Self {
            transport,
            agreement,
            state: ChannelState::Disconnected,
            verbose,
        }
    }

    /// Underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the transport and key agreement backend
    pub fn into_parts(self) -> (T, K) {
        (self.transport, self.agreement)
    }

    /// Currently selected applet
    pub const fn applet(&self) -> Option<Applet> {
        self.state.applet()
    }

    /// Secure channel session of the selected applet
    pub const fn session(&self) -> Option<&Session> {
        match &self.state {
            ChannelState::Secured { session, .. } => Some(session),
            _ => None,
        }
    }

    /// Whether exchanges are wrapped
    pub const fn is_secured(&self) -> bool {
        matches!(self.state, ChannelState::Secured { .. })
    }

    /// Make sure the transport is up
    pub async fn connect(&mut self) -> Result<()> {
        if !self.transport.is_connected() {
            self.transport.reset().await?;
        }
        if matches!(self.state, ChannelState::Disconnected) {
            self.state = ChannelState::Connected;
        }
        Ok(())
    }

    /// Drop the channel state and re-establish the physical connection
    pub async fn reconnect(&mut self) -> Result<()> {
        self.state = ChannelState::Disconnected;
        self.transport.reset().await?;
        self.state = ChannelState::Connected;
        debug!("Reconnected to card");
        Ok(())
    }

    /// Forget the selected applet and its session
    pub fn disconnect(&mut self) {
        self.state = ChannelState::Disconnected;
    }

    async fn transmit(&mut self, command: &Command) -> Result<Response> {
        let bytes = command.to_bytes();
        let raw = self.transport.transmit_raw(&bytes).await?;
        if self.verbose {
            debug!(command = %hex::encode(&bytes), response = %hex::encode(&raw), "APDU exchange");
        } else {
            trace!(command = %hex::encode(&bytes), response = %hex::encode(&raw), "APDU exchange");
        }
        Ok(Response::from_bytes(&raw)?)
    }

    /// Send a command, wrapping it when the applet is secured
    ///
    /// Status errors leave the channel usable. Any other failure, including
    /// dropping the future mid-exchange, leaves the link disconnected so a
    /// stale session is never resumed.
    pub async fn exchange(&mut self, command: &Command) -> Result<Response> {
        match mem::take(&mut self.state) {
            ChannelState::Disconnected => Err(TransportError::Connection.into()),
            ChannelState::Secured {
                applet,
                mut session,
            } => {
                let wrapped = session.wrap(command)?;
                let response = self.transmit(&wrapped).await?;
                let response = if response.is_success() && response.payload().is_some() {
                    session.unwrap(&response)?
                } else {
                    response
                };
                self.state = ChannelState::Secured { applet, session };
                Ok(response)
            }
            state => {
                let response = self.transmit(command).await?;
                self.state = state;
                Ok(response)
            }
        }
    }

    /// Send a command and fail on any non-success status
    pub async fn exchange_checked(&mut self, command: &Command) -> Result<Response> {
        let response = self.exchange(command).await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            log_status(command, status);
            Err(Error::Status(status))
        }
    }

    /// Select an applet, discarding any session of the previous one
    pub async fn select(&mut self, applet: Applet) -> Result<Response> {
        self.connect().await?;
        self.state = ChannelState::Connected;

        let response = self.exchange_checked(&commands::select(applet.aid())).await?;
        self.state = ChannelState::Selected(applet);
        debug!(%applet, "Applet selected");
        Ok(response)
    }

    /// Run a fresh key agreement with the selected applet
    pub async fn open_secure_channel(&mut self) -> Result<()> {
        let applet = self
            .state
            .applet()
            .ok_or(Error::Apdu(sentry_apdu_core::Error::other("No applet selected")))?;

        self.state = ChannelState::Disconnected;
        match Session::open(&mut self.transport, &self.agreement).await {
            Ok(session) => {
                self.state = ChannelState::Secured { applet, session };
                Ok(())
            }
            Err(error) => {
                if error.transport_error().is_none() {
                    self.state = ChannelState::Selected(applet);
                }
                Err(error)
            }
        }
    }

    /// Select the enroll applet and open the secure channel when asked
    pub async fn select_enroll(&mut self, secure: bool) -> Result<Response> {
        let response = self.select(Applet::Enroll).await?;
        if secure {
            self.open_secure_channel().await?;
        }
        Ok(response)
    }

    /// Select the enroll applet and unlock it with the enroll code
    ///
    /// A card without a code answers the verification with `69 85`. The code
    /// is then set, the one-time setup is run and the applet is reselected.
    pub async fn initialize_enroll(&mut self, code: &EnrollCode, secure: bool) -> Result<()> {
        self.select_enroll(secure).await?;

        let status = self
            .exchange(&commands::get_enroll_status(self.is_secured()))
            .await?
            .status();
        if status.is_success() {
            return Ok(());
        }
        if !requires_setup(status) {
            return Err(Error::Status(status));
        }

        debug!("Verifying enroll code");
        let status = self.exchange(&commands::verify_code(code)).await?.status();
        match interpret(status) {
            StatusOutcome::Success => return Ok(()),
            StatusOutcome::Warning(WarningDetail::RetriesRemaining(retries)) => {
                warn!(retries, "Enroll code rejected");
                return Err(Error::Status(status));
            }
            _ if !requires_setup(status) => return Err(Error::Status(status)),
            _ => {}
        }

        info!("No enroll code on card, running first time setup");
        self.exchange_checked(&commands::set_code(code)).await?;
        for command in commands::setup_sequence() {
            self.exchange_checked(&command).await?;
        }

        self.select_enroll(secure).await?;
        self.exchange_checked(&commands::verify_code(code)).await?;
        Ok(())
    }

    /// Query the enroll applet status
    pub async fn enrollment_status(&mut self) -> Result<EnrollmentStatus> {
        let command = commands::get_enroll_status(self.is_secured());
        let response = self.exchange_checked(&command).await?;
        let status = EnrollmentStatus::parse(response.data())?;
        debug!(mode = %status.mode, next_finger = status.next_finger, "Enrollment status");
        Ok(status)
    }

    /// Record one touch for `finger` and return the touches it still needs
    pub async fn process_fingerprint(&mut self, finger: u8, restart: bool) -> Result<u8> {
        let command = if restart {
            commands::restart_and_process_fingerprint(finger)?
        } else {
            commands::process_fingerprint(finger)?
        };
        self.exchange_checked(&command).await?;

        let status = self.enrollment_status().await?;
        let remaining = status
            .finger(finger)
            .ok_or(Error::InvalidFingerIndex(finger))?
            .remaining_touches;
        debug!(finger, remaining, "Touch recorded");
        Ok(remaining)
    }

    /// Check the last touch against the freshly enrolled finger
    pub async fn verify_enrolled_fingerprint(&mut self) -> Result<()> {
        match self
            .exchange_checked(&commands::verify_enrolled_fingerprint())
            .await
        {
            Err(Error::Status(status))
                if interpret(status) == StatusOutcome::Warning(WarningDetail::NoMatch) =>
            {
                Err(Error::EnrollVerification)
            }
            other => other.map(drop),
        }
    }

    /// Select the verify applet and check that it is usable
    pub async fn initialize_verify(&mut self, secure: bool) -> Result<()> {
        let info = self.verify_applet_version().await?;
        let version = match info.version {
            Some(version) if info.installed => version,
            _ => return Err(Error::VerifyAppletNotInstalled),
        };
        let (min_major, min_minor) = MIN_VERIFY_APPLET_VERSION;
        if version.major <= min_major && version.minor < min_minor {
            return Err(Error::VerifyAppletWrongVersion {
                major: version.major,
                minor: version.minor,
            });
        }

        if secure {
            self.open_secure_channel().await?;
        }
        Ok(())
    }

    /// Wait for a finger and match it
    pub async fn fingerprint_verification(&mut self) -> Result<FingerprintMatch> {
        let response = self
            .exchange_checked(&commands::get_fingerprint_verification())
            .await?;
        let result = FingerprintMatch::from_verification(response.data())?;
        debug!(%result, "Fingerprint verification");
        Ok(result)
    }

    /// Read the small slot without a fingerprint match
    pub async fn read_unsecured(&mut self) -> Result<bytes::Bytes> {
        let response = self
            .exchange_checked(&commands::get_data(DataSlot::Small, false))
            .await?;
        Ok(response.payload().clone().unwrap_or_default())
    }

    /// Write the small slot without a fingerprint match
    pub async fn write_unsecured(&mut self, data: &[u8]) -> Result<()> {
        let command = commands::set_data(DataSlot::Small, false, data)?;
        self.exchange_checked(&command).await?;
        Ok(())
    }

    /// Read a slot, the card matches a finger first
    pub async fn read_secured(&mut self, slot: DataSlot) -> Result<FingerprintValidationAndData> {
        let response = self
            .exchange_checked(&commands::get_data(slot, true))
            .await?;
        FingerprintValidationAndData::from_secured_read(response.payload().clone().unwrap_or_default())
    }

    /// Write a slot, the card matches a finger first
    pub async fn write_secured(&mut self, slot: DataSlot, data: &[u8]) -> Result<FingerprintMatch> {
        let command = commands::set_data(slot, true, data)?;
        let response = self.exchange_checked(&command).await?;
        match response.data() {
            [byte] => FingerprintMatch::from_result_byte(*byte),
            _ => Ok(FingerprintMatch::Matched),
        }
    }

    /// Query the card OS version, no applet needs to be selected
    pub async fn os_version(&mut self) -> Result<VersionInfo> {
        self.connect().await?;
        self.state = ChannelState::Connected;
        let response = self.exchange_checked(&commands::get_os_version()).await?;
        VersionInfo::parse_os(response.data())
    }

    /// Version of the enroll applet, read from its select response
    pub async fn enroll_applet_version(&mut self) -> Result<VersionInfo> {
        match self.select_for_version(Applet::Enroll).await? {
            Some(response) => Ok(VersionInfo::parse_enroll_select(response.data())),
            None => Ok(VersionInfo::not_installed()),
        }
    }

    /// Version of the CVM applet, read from its select response
    pub async fn cvm_applet_version(&mut self) -> Result<VersionInfo> {
        match self.select_for_version(Applet::Cvm).await? {
            Some(response) => Ok(VersionInfo::parse_cvm_select(response.data())),
            None => Ok(VersionInfo::not_installed()),
        }
    }

    /// Version of the verify applet
    ///
    /// `6D 00` on the version query is read as "not installed". The card
    /// gives the same answer for a genuinely unsupported instruction.
    pub async fn verify_applet_version(&mut self) -> Result<VersionInfo> {
        if self.select_for_version(Applet::Verify).await?.is_none() {
            return Ok(VersionInfo::not_installed());
        }

        let response = self.exchange(&commands::get_applet_version()).await?;
        let status = response.status();
        if status.is_instruction_not_supported() {
            return Ok(VersionInfo::not_installed());
        }
        if !status.is_success() {
            return Err(Error::Status(status));
        }
        Ok(VersionInfo::parse_verify(response.data()))
    }

    async fn select_for_version(&mut self, applet: Applet) -> Result<Option<Response>> {
        match self.select(applet).await {
            Ok(response) => Ok(Some(response)),
            Err(Error::Status(status)) if status.is_file_not_found() => {
                debug!(%applet, "Applet not installed");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Erase all biometric data, honoured by development cards only
    pub async fn reset_biometric_data(&mut self) -> Result<()> {
        self.connect().await?;
        self.state = ChannelState::Connected;
        self.exchange_checked(&commands::reset_biometric_data()).await?;
        warn!("Biometric data reset");
        Ok(())
    }
}

fn log_status(command: &Command, status: StatusWord) {
    let ins = command.instruction();
    let level = status.tracing_level();
    if level == Level::DEBUG {
        debug!(ins, %status, "Command completed");
    } else if level == Level::INFO {
        info!(ins, %status, desc = status.description(), "Command warning");
    } else {
        warn!(ins, %status, desc = status.description(), "Command failed");
    }
}
