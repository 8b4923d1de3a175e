//! Key agreement capability consumed by the secure channel
//!
//! The elliptic-curve exchange and key derivation are provided by a backend
//! implementing [`KeyAgreement`]. The channel decides when it is invoked and
//! what it is fed, the backend owns the cryptography.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use zeroize::Zeroize;

use super::ChannelError;
use crate::constants::{BLOCK_SIZE, PUBLIC_KEY_LENGTH, SECRET_LENGTH};

/// Failures reported by a key agreement backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyAgreementError {
    /// The local key pair could not be generated
    #[error("Key generation failed")]
    KeyGeneration,
    /// The shared secret could not be computed or expanded
    #[error("Shared secret extraction failed")]
    SharedSecretExtraction,
}

/// Material produced when a new session is started
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SessionInit {
    /// Authentication init command to send to the card
    pub command: Vec<u8>,
    /// Ephemeral private key
    pub private_key: [u8; SECRET_LENGTH],
    /// Ephemeral public key, uncompressed without the `04` prefix
    pub public_key: [u8; PUBLIC_KEY_LENGTH],
    /// Shared secret seed
    pub shared_secret: [u8; SECRET_LENGTH],
}

impl fmt::Debug for SessionInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInit")
            .field("command", &hex::encode(&self.command))
            .field("public_key", &hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}

/// Keys and initial chaining value derived for a session
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SessionKeys {
    /// Response key, derived but not used by the wrapping scheme
    pub respt: [u8; BLOCK_SIZE],
    /// Encryption key
    pub enc: [u8; BLOCK_SIZE],
    /// Command MAC key
    pub cmac: [u8; BLOCK_SIZE],
    /// Response MAC key
    pub rmac: [u8; BLOCK_SIZE],
    /// Initial chaining value
    pub chaining: [u8; BLOCK_SIZE],
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}

/// Card reply to the authentication init command
///
/// Layout: `5F 49 41 04 <64 byte public key> 86 10 <16 byte receipt>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInitReply {
    raw: Bytes,
}

impl AuthInitReply {
    const KEY_TAG: [u8; 4] = [0x5F, 0x49, 0x41, 0x04];
    const RECEIPT_TAG: [u8; 2] = [0x86, 0x10];
    const KEY_OFFSET: usize = Self::KEY_TAG.len();
    const RECEIPT_TAG_OFFSET: usize = Self::KEY_OFFSET + PUBLIC_KEY_LENGTH;
    const RECEIPT_OFFSET: usize = Self::RECEIPT_TAG_OFFSET + Self::RECEIPT_TAG.len();
    /// Length of a well formed reply
    pub const LENGTH: usize = Self::RECEIPT_OFFSET + BLOCK_SIZE;

    /// Validate the framing of a reply
    pub fn parse(payload: &[u8]) -> Result<Self, ChannelError> {
        if payload.len() < Self::LENGTH {
            return Err(ChannelError::MalformedAuthReply("reply too short"));
        }
        if payload[..Self::KEY_OFFSET] != Self::KEY_TAG {
            return Err(ChannelError::MalformedAuthReply("missing public key tag"));
        }
        if payload[Self::RECEIPT_TAG_OFFSET..Self::RECEIPT_OFFSET] != Self::RECEIPT_TAG {
            return Err(ChannelError::MalformedAuthReply("missing receipt tag"));
        }
        Ok(Self {
            raw: Bytes::copy_from_slice(&payload[..Self::LENGTH]),
        })
    }

    /// Card ephemeral public key, uncompressed without the `04` prefix
    pub fn card_public_key(&self) -> &[u8] {
        &self.raw[Self::KEY_OFFSET..Self::RECEIPT_TAG_OFFSET]
    }

    /// Receipt the card computed over the exchange
    pub fn receipt(&self) -> &[u8] {
        &self.raw[Self::RECEIPT_OFFSET..Self::LENGTH]
    }

    /// The reply exactly as received
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// Key agreement and session key derivation backend
///
/// Errors are passed through to the caller unchanged.
#[async_trait]
pub trait KeyAgreement: Send + Sync + fmt::Debug {
    /// Generate an ephemeral key pair and the authentication init command
    async fn begin_session(&self) -> Result<SessionInit, KeyAgreementError>;

    /// Derive the session keys from the card reply and the local secrets
    async fn derive_session_keys(
        &self,
        reply: &AuthInitReply,
        shared_secret: &[u8; SECRET_LENGTH],
        private_key: &[u8; SECRET_LENGTH],
    ) -> Result<SessionKeys, KeyAgreementError>;
}
