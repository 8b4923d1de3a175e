//! Session management for the SentryCard secure channel.
//!
//! A [`Session`] is created by a fresh key agreement every time an applet is
//! selected and is dropped as a whole when the applet changes.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use sentry_apdu_core::{CardTransport, Command, LengthEncoding, Response, command::SHORT_MAX_DATA};
use tracing::{debug, trace};
use zeroize::Zeroize;

use super::crypto::{Block, cmac, decrypt_padded, encrypt_block, encrypt_padded, verify_cmac};
use super::key_agreement::{AuthInitReply, KeyAgreement, SessionKeys};
use super::ChannelError;
use crate::constants::{BLOCK_SIZE, MAC_LENGTH};
use crate::{Error, Result};

/// Shortest wrapped response: a MAC and the status word
const MIN_WRAPPED_RESPONSE: usize = MAC_LENGTH + 2;

/// Keys used by the wrapping scheme
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
struct Keys {
    enc: Block,
    cmac: Block,
    rmac: Block,
}

impl Keys {
    const fn new(keys: &SessionKeys) -> Self {
        Self {
            enc: keys.enc,
            cmac: keys.cmac,
            rmac: keys.rmac,
        }
    }
}

/// Session state for the secure channel
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Session {
    /// Session keys derived by the key agreement backend
    keys: Keys,
    /// MAC chaining value, replaced by every wrap
    chaining: Block,
    /// Message counter, incremented by every wrap
    counter: Block,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("counter", &hex::encode(self.counter))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start a session from derived keys with a zeroed counter
    pub fn new(keys: &SessionKeys) -> Self {
        Self {
            keys: Keys::new(keys),
            chaining: keys.chaining,
            counter: [0; BLOCK_SIZE],
        }
    }

    /// Run the authentication init exchange against the selected applet
    ///
    /// `6D 00` means the applet predates secure messaging and is reported as
    /// [`Error::SecureCommunicationNotSupported`] so callers can fall back.
    pub async fn open<T, K>(transport: &mut T, agreement: &K) -> Result<Self>
    where
        T: CardTransport + ?Sized,
        K: KeyAgreement + ?Sized,
    {
        let init = agreement.begin_session().await?;

        debug!("Sending authentication init");
        let raw = transport.transmit_raw(&init.command).await?;
        let response = Response::from_bytes(&raw)?;

        let status = response.status();
        if status.is_instruction_not_supported() {
            return Err(Error::SecureCommunicationNotSupported);
        }
        if !status.is_success() {
            return Err(Error::SecureChannelInitialization(status));
        }

        let reply = AuthInitReply::parse(response.data())?;
        let keys = agreement
            .derive_session_keys(&reply, &init.shared_secret, &init.private_key)
            .await?;

        debug!("Secure channel established");
        Ok(Self::new(&keys))
    }

    /// Current MAC chaining value
    pub const fn chaining(&self) -> &Block {
        &self.chaining
    }

    /// Current message counter
    pub const fn counter(&self) -> &Block {
        &self.counter
    }

    /// Encrypt and MAC a command
    ///
    /// Advances the counter and replaces the chaining value.
    pub fn wrap(&mut self, command: &Command) -> std::result::Result<Command, ChannelError> {
        increment_counter(&mut self.counter);

        let plain = command.data();
        let encrypted = if plain.is_empty() {
            Vec::new()
        } else {
            let iv = encrypt_block(&self.keys.enc, &self.counter);
            encrypt_padded(&self.keys.enc, &iv, plain)?
        };

        let wrapped_len = encrypted.len() + MAC_LENGTH;
        let extended = command.effective_encoding() == LengthEncoding::Extended
            || wrapped_len > SHORT_MAX_DATA;
        let length_field = length_field(wrapped_len, extended)?;

        let header = [command.cla, command.ins, command.p1, command.p2];
        self.chaining = cmac(
            &self.keys.cmac,
            &[
                self.chaining.as_slice(),
                header.as_slice(),
                length_field.as_slice(),
                encrypted.as_slice(),
            ],
        )?;

        let mut data = BytesMut::with_capacity(wrapped_len);
        data.put_slice(&encrypted);
        data.put_slice(&self.chaining[..MAC_LENGTH]);

        let mut wrapped = Command::new(command.cla, command.ins, command.p1, command.p2)
            .with_data(data.freeze());
        wrapped.le = command.le;
        if extended {
            wrapped = wrapped.extended();
        }

        trace!(counter = %hex::encode(self.counter), "Wrapped command");
        Ok(wrapped)
    }

    /// Verify and decrypt a response
    ///
    /// The chaining value is left untouched: it stays the one produced by
    /// the wrap of the command this response answers.
    pub fn unwrap(&self, response: &Response) -> std::result::Result<Response, ChannelError> {
        let payload = response.data();
        if payload.len() + 2 < MIN_WRAPPED_RESPONSE {
            return Err(ChannelError::ResponseTooShort(payload.len() + 2));
        }

        let (encrypted, mac) = payload.split_at(payload.len() - MAC_LENGTH);
        let sw = response.status().to_bytes();
        verify_cmac(
            &self.keys.rmac,
            &[self.chaining.as_slice(), encrypted, sw.as_slice()],
            mac,
        )?;

        if encrypted.is_empty() {
            return Ok(Response::error(response.status()));
        }

        let mut counter = self.counter;
        counter[0] = 0x80;
        let iv = encrypt_block(&self.keys.enc, &counter);
        let plain = decrypt_padded(&self.keys.enc, &iv, encrypted)?;

        Ok(Response::new(Some(Bytes::from(plain)), response.status()))
    }
}

/// Big-endian increment of bytes 15 down to 1, byte 0 is never carried into
fn increment_counter(counter: &mut Block) {
    for byte in counter[1..].iter_mut().rev() {
        if *byte == 0xFF {
            *byte = 0;
        } else {
            *byte += 1;
            break;
        }
    }
}

fn length_field(len: usize, extended: bool) -> std::result::Result<Vec<u8>, ChannelError> {
    if extended {
        let len = u16::try_from(len).map_err(|_| ChannelError::CommandTooLong(len))?;
        let [hi, lo] = len.to_be_bytes();
        Ok(vec![0x00, hi, lo])
    } else {
        let len = u8::try_from(len).map_err(|_| ChannelError::CommandTooLong(len))?;
        Ok(vec![len])
    }
}
