//! ECDH key agreement backend over secp256k1
//!
//! The host pairs an ephemeral key with the card's static key to get the
//! shared secret seed, then with the card's ephemeral key from the reply.
//! Both secrets are hashed into the session keys and a receipt the card
//! proves it derived the same keys with.

use async_trait::async_trait;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey, ecdh::diffie_hellman};
use rand_v8::rngs::OsRng;
use sentry_card::{AuthInitReply, KeyAgreement, KeyAgreementError, SessionInit, SessionKeys};
use sha2::{Digest, Sha256};

/// Header of the authentication init command understood by the simulated card
pub const AUTH_INIT_HEADER: [u8; 4] = [0x80, 0x88, 0x00, 0x00];

pub type Block = [u8; 16];

/// Uncompressed public key without the `04` prefix
pub fn public_bytes(secret: &SecretKey) -> [u8; 64] {
    let point = secret.public_key().to_encoded_point(false);
    let mut out = [0u8; 64];
    out.copy_from_slice(&point.as_bytes()[1..]);
    out
}

/// Raw x coordinate of the shared point
pub fn shared_secret(secret: &SecretKey, public: &[u8]) -> Option<[u8; 32]> {
    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(public);
    let public = PublicKey::from_sec1_bytes(&sec1).ok()?;

    let shared = diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    Some(out)
}

/// Session keys both sides derive from the two shared secrets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub respt: Block,
    pub enc: Block,
    pub cmac: Block,
    pub rmac: Block,
    pub chaining: Block,
    pub receipt: Block,
}

impl KeyMaterial {
    pub fn derive(seed: &[u8; 32], ephemeral: &[u8; 32]) -> Self {
        let block = |label: u8| -> [u8; 32] {
            let digest = Sha256::new()
                .chain_update(seed)
                .chain_update(ephemeral)
                .chain_update([label])
                .finalize();
            let mut out = [0u8; 32];
            out.copy_from_slice(&digest);
            out
        };
        let half = |bytes: &[u8]| -> Block {
            let mut out = [0u8; 16];
            out.copy_from_slice(&bytes[..16]);
            out
        };

        let (first, second, third) = (block(1), block(2), block(3));
        Self {
            respt: half(&first[..16]),
            enc: half(&first[16..]),
            cmac: half(&second[..16]),
            rmac: half(&second[16..]),
            chaining: half(&third[..16]),
            receipt: half(&third[16..]),
        }
    }

    pub fn session_keys(&self) -> SessionKeys {
        SessionKeys {
            respt: self.respt,
            enc: self.enc,
            cmac: self.cmac,
            rmac: self.rmac,
            chaining: self.chaining,
        }
    }
}

/// Host side of the key agreement
#[derive(Debug, Clone)]
pub struct EcdhBackend {
    card_public_key: [u8; 64],
}

impl EcdhBackend {
    /// Backend provisioned with the static key of a card
    pub const fn new(card_public_key: [u8; 64]) -> Self {
        Self { card_public_key }
    }
}

#[async_trait]
impl KeyAgreement for EcdhBackend {
    async fn begin_session(&self) -> Result<SessionInit, KeyAgreementError> {
        let secret = SecretKey::random(&mut OsRng);
        let public_key = public_bytes(&secret);
        let seed = shared_secret(&secret, &self.card_public_key)
            .ok_or(KeyAgreementError::SharedSecretExtraction)?;

        let mut command = AUTH_INIT_HEADER.to_vec();
        command.push(65);
        command.push(0x04);
        command.extend_from_slice(&public_key);

        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(&secret.to_bytes());

        Ok(SessionInit {
            command,
            private_key,
            public_key,
            shared_secret: seed,
        })
    }

    async fn derive_session_keys(
        &self,
        reply: &AuthInitReply,
        shared_secret_seed: &[u8; 32],
        private_key: &[u8; 32],
    ) -> Result<SessionKeys, KeyAgreementError> {
        let secret = SecretKey::from_slice(private_key).map_err(|_| KeyAgreementError::KeyGeneration)?;
        let ephemeral = shared_secret(&secret, reply.card_public_key())
            .ok_or(KeyAgreementError::SharedSecretExtraction)?;

        let material = KeyMaterial::derive(shared_secret_seed, &ephemeral);
        if material.receipt[..] != *reply.receipt() {
            return Err(KeyAgreementError::SharedSecretExtraction);
        }
        Ok(material.session_keys())
    }
}
