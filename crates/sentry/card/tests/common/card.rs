//! In-memory SentryCard
//!
//! Plays the card side of every applet: AID selection, the secure channel
//! with its own counter and chaining value, the enroll code, a two finger
//! enrollment record, the verify applet slots and a scripted sensor.

use std::collections::VecDeque;

use aes::Aes128;
use async_trait::async_trait;
use bytes::Bytes;
use cipher::block_padding::Iso7816;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use cmac::{Cmac, Mac};
use k256::SecretKey;
use rand_v8::rngs::OsRng;
use sentry_card::constants::{CVM_AID, ENROLL_AID, VERIFY_AID};
use sentry_card::{CardTransport, TransportError};
use sentry_apdu_core::{Command, LengthEncoding};

use super::ecdh::{AUTH_INIT_HEADER, Block, KeyMaterial, public_bytes, shared_secret};

/// Enroll applet select response, version 2.1
pub const ENROLL_SELECT: &[u8] = b"IDEX Enroll  2.1.0";
/// CVM applet select response, version 1.4
pub const CVM_SELECT: &[u8] = b"CDCVM\x01ver 1.4 ";

const OK: u16 = 0x9000;
const MATCH: u8 = 0xA5;
const MAC_LENGTH: usize = 8;

/// What the sensor does the next time a finger is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensor {
    /// A clean touch; a match when the CVM asks
    Touch,
    /// The CVM reports this result byte
    Result(u8),
    /// The command fails with this status word
    Status(u16),
    /// The card leaves the field mid-command
    LoseConnection,
}

/// How the verify applet presents itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyApplet {
    /// Not on the card, select answers `6A 82`
    Missing,
    /// Selectable, but the version query answers `6D 00`
    NoVersion,
    /// Reports this version
    Installed { major: u8, minor: u8 },
}

/// Enrollment record of one finger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimFinger {
    pub enrolled: u8,
    pub remaining: u8,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimApplet {
    Enroll,
    Cvm,
    Verify,
}

/// Card side of the secure channel
#[derive(Debug, Clone)]
struct CardSession {
    enc: Block,
    cmac: Block,
    rmac: Block,
    chaining: Block,
    counter: Block,
}

impl CardSession {
    fn new(material: &KeyMaterial) -> Self {
        Self {
            enc: material.enc,
            cmac: material.cmac,
            rmac: material.rmac,
            chaining: material.chaining,
            counter: [0; 16],
        }
    }

    /// Check the MAC of a wrapped command and return its plaintext data
    fn unwrap_command(&mut self, command: &Command) -> Option<Vec<u8>> {
        for byte in self.counter[1..].iter_mut().rev() {
            let (next, carry) = byte.overflowing_add(1);
            *byte = next;
            if !carry {
                break;
            }
        }

        let data = command.data();
        if data.len() < MAC_LENGTH {
            return None;
        }
        let (encrypted, mac) = data.split_at(data.len() - MAC_LENGTH);
        let length_field = match command.encoding {
            LengthEncoding::Extended => {
                let [hi, lo] = (data.len() as u16).to_be_bytes();
                vec![0x00, hi, lo]
            }
            LengthEncoding::Short => vec![data.len() as u8],
        };
        let header = [command.cla, command.ins, command.p1, command.p2];

        let chaining = cmac(
            &self.cmac,
            &[self.chaining.as_slice(), header.as_slice(), length_field.as_slice(), encrypted],
        );
        if chaining[..MAC_LENGTH] != *mac {
            return None;
        }
        self.chaining = chaining;

        if encrypted.is_empty() {
            return Some(Vec::new());
        }
        let iv = aes_block(&self.enc, &self.counter);
        cbc_decrypt(&self.enc, &iv, encrypted)
    }

    fn wrap_response(&self, data: &[u8], sw: u16) -> Vec<u8> {
        let encrypted = if data.is_empty() {
            Vec::new()
        } else {
            let mut counter = self.counter;
            counter[0] = 0x80;
            cbc_encrypt(&self.enc, &aes_block(&self.enc, &counter), data)
        };
        let sw = sw.to_be_bytes();
        let mac = cmac(&self.rmac, &[self.chaining.as_slice(), encrypted.as_slice(), sw.as_slice()]);

        let mut out = encrypted;
        out.extend_from_slice(&mac[..MAC_LENGTH]);
        out.extend_from_slice(&sw);
        out
    }
}

/// A SentryCard on the end of a [`CardTransport`]
#[derive(Debug)]
pub struct SimulatedCard {
    static_key: SecretKey,
    connected: bool,
    selected: Option<SimApplet>,
    session: Option<CardSession>,
    code: Option<[u8; 8]>,
    code_verified: bool,
    touches_per_finger: u8,
    fail_enroll_verification: bool,
    sensor: VecDeque<Sensor>,

    /// Reconnects requested by the host
    pub resets: usize,
    /// Secure channel sessions established
    pub sessions_opened: usize,
    /// Fingers the card enrolls
    pub max_fingers: u8,
    /// Enrollment records
    pub fingers: [SimFinger; 2],
    /// Verify applet presence and version
    pub verify_applet: VerifyApplet,
    /// Whether the verify applet accepts authentication init
    pub verify_secure: bool,
    /// Small data slot
    pub small_slot: Vec<u8>,
    /// Huge data slot
    pub huge_slot: Vec<u8>,
    /// Commands as received
    pub raw_log: Vec<Bytes>,
    /// Commands with their data unwrapped
    pub plain_log: Vec<Vec<u8>>,
}

impl Default for SimulatedCard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCard {
    /// One finger card with code 1234, two touches per finger and verify applet 1.3
    pub fn new() -> Self {
        let mut card = Self {
            static_key: SecretKey::random(&mut OsRng),
            connected: true,
            selected: None,
            session: None,
            code: Some(bcd(&[1, 2, 3, 4])),
            code_verified: false,
            touches_per_finger: 2,
            fail_enroll_verification: false,
            sensor: VecDeque::new(),
            resets: 0,
            sessions_opened: 0,
            max_fingers: 1,
            fingers: [SimFinger::default(); 2],
            verify_applet: VerifyApplet::Installed { major: 1, minor: 3 },
            verify_secure: false,
            small_slot: Vec::new(),
            huge_slot: Vec::new(),
            raw_log: Vec::new(),
            plain_log: Vec::new(),
        };
        card.clear_fingers();
        card
    }

    /// A card that has never had an enroll code set
    pub fn without_code(mut self) -> Self {
        self.code = None;
        self
    }

    /// Change the finger count and the touches each finger needs
    pub fn with_fingers(mut self, max_fingers: u8, touches: u8) -> Self {
        self.max_fingers = max_fingers;
        self.touches_per_finger = touches;
        self.clear_fingers();
        self
    }

    /// Every finger already enrolled
    pub fn enrolled(mut self) -> Self {
        for finger in &mut self.fingers {
            *finger = SimFinger {
                enrolled: self.touches_per_finger,
                remaining: 0,
                done: true,
            };
        }
        self
    }

    /// Queue sensor outcomes, consumed one per finger request
    pub fn script(mut self, events: impl IntoIterator<Item = Sensor>) -> Self {
        self.sensor.extend(events);
        self
    }

    /// Answer the next enrolled fingerprint check with `63 00`
    pub fn fail_enroll_verification(mut self) -> Self {
        self.fail_enroll_verification = true;
        self
    }

    pub fn with_verify_applet(mut self, applet: VerifyApplet) -> Self {
        self.verify_applet = applet;
        self
    }

    pub fn with_secure_verify_applet(mut self) -> Self {
        self.verify_secure = true;
        self
    }

    /// Static public key the host backend is provisioned with
    pub fn public_key(&self) -> [u8; 64] {
        public_bytes(&self.static_key)
    }

    /// Chaining value and counter of the live session
    pub fn session_state(&self) -> Option<(Block, Block)> {
        self.session.as_ref().map(|s| (s.chaining, s.counter))
    }

    /// Whether the active fingers are all enrolled
    pub fn is_enrolled(&self) -> bool {
        self.active_fingers().iter().all(|f| f.done)
    }

    /// Sensor outcomes not consumed yet
    pub fn pending_sensor_events(&self) -> usize {
        self.sensor.len()
    }

    /// Unwrapped commands with the given instruction
    pub fn commands_with_ins(&self, ins: u8) -> Vec<&Vec<u8>> {
        self.plain_log.iter().filter(|c| c[1] == ins).collect()
    }

    fn active_fingers(&self) -> &[SimFinger] {
        let count = usize::from(self.max_fingers.clamp(1, 2));
        &self.fingers[..count]
    }

    fn clear_fingers(&mut self) {
        for finger in &mut self.fingers {
            *finger = SimFinger {
                enrolled: 0,
                remaining: self.touches_per_finger,
                done: false,
            };
        }
    }

    fn next_sensor(&mut self, default: Sensor) -> Sensor {
        self.sensor.pop_front().unwrap_or(default)
    }

    fn lose_connection(&mut self) -> TransportError {
        self.connected = false;
        self.selected = None;
        self.session = None;
        self.code_verified = false;
        TransportError::ConnectionLost
    }

    fn process(&mut self, raw: &[u8]) -> Result<Vec<u8>, TransportError> {
        let Ok(command) = Command::from_bytes(raw) else {
            return Ok(status(0x6700));
        };

        if command.cla == 0x00 && command.ins == 0xA4 {
            self.plain_log.push(raw.to_vec());
            return Ok(self.select(command.data()));
        }
        if [command.cla, command.ins, command.p1, command.p2] == AUTH_INIT_HEADER {
            self.plain_log.push(raw.to_vec());
            return Ok(self.authenticate(command.data()));
        }

        // Card OS commands never go through the applet session
        let os_command = matches!(command.cla, 0xB1 | 0xED);
        let session = if os_command { None } else { self.session.take() };
        let Some(mut session) = session else {
            self.plain_log.push(raw.to_vec());
            let (data, sw) = self.dispatch(&command, command.data())?;
            return Ok(response(&data, sw));
        };

        let Some(plain) = session.unwrap_command(&command) else {
            return Ok(status(0x6982));
        };
        let mut logged = vec![command.cla, command.ins, command.p1, command.p2];
        logged.extend_from_slice(&plain);
        self.plain_log.push(logged);

        let (data, sw) = self.dispatch(&command, &plain)?;
        let reply = if sw == OK {
            session.wrap_response(&data, sw)
        } else {
            status(sw)
        };
        self.session = Some(session);
        Ok(reply)
    }

    fn select(&mut self, aid: &[u8]) -> Vec<u8> {
        self.session = None;
        self.code_verified = false;
        self.selected = None;

        let (applet, reply) = if aid == ENROLL_AID {
            (SimApplet::Enroll, ENROLL_SELECT)
        } else if aid == CVM_AID {
            (SimApplet::Cvm, CVM_SELECT)
        } else if aid == VERIFY_AID && self.verify_applet != VerifyApplet::Missing {
            (SimApplet::Verify, &[][..])
        } else {
            return status(0x6A82);
        };
        self.selected = Some(applet);
        response(reply, OK)
    }

    fn authenticate(&mut self, data: &[u8]) -> Vec<u8> {
        let accepts = match self.selected {
            Some(SimApplet::Enroll) => true,
            Some(SimApplet::Verify) => self.verify_secure,
            _ => false,
        };
        if !accepts {
            return status(0x6D00);
        }
        if data.len() != 65 || data[0] != 0x04 {
            return status(0x6A80);
        }

        let host_key = &data[1..];
        let Some(seed) = shared_secret(&self.static_key, host_key) else {
            return status(0x6A80);
        };
        let ephemeral_key = SecretKey::random(&mut OsRng);
        let Some(ephemeral) = shared_secret(&ephemeral_key, host_key) else {
            return status(0x6A80);
        };
        let material = KeyMaterial::derive(&seed, &ephemeral);

        let mut reply = vec![0x5F, 0x49, 0x41, 0x04];
        reply.extend_from_slice(&public_bytes(&ephemeral_key));
        reply.extend_from_slice(&[0x86, 0x10]);
        reply.extend_from_slice(&material.receipt);

        self.session = Some(CardSession::new(&material));
        self.sessions_opened += 1;
        response(&reply, OK)
    }

    fn dispatch(&mut self, command: &Command, data: &[u8]) -> Result<(Vec<u8>, u16), TransportError> {
        match (command.cla, command.ins, command.p1, command.p2) {
            (0xB1, 0x05, 0x40, 0x00) => return Ok((os_version(), OK)),
            (0xED, 0x57, 0xC1, 0x00) => {
                self.clear_fingers();
                return Ok((Vec::new(), OK));
            }
            _ => {}
        }

        match self.selected {
            Some(SimApplet::Enroll) => self.enroll_applet(command, data),
            Some(SimApplet::Verify) => self.verify_applet(command, data),
            Some(SimApplet::Cvm) | None => Ok((Vec::new(), 0x6D00)),
        }
    }

    fn enroll_applet(&mut self, command: &Command, data: &[u8]) -> Result<(Vec<u8>, u16), TransportError> {
        match (command.ins, command.p1, command.p2) {
            (0x59, 0x04, 0x00) if self.code_verified => Ok((self.status_record(), OK)),
            (0x59, 0x04, 0x00) => Ok((Vec::new(), 0x6985)),
            (0x20, 0x00, 0x80) => {
                let sw = match self.code {
                    None => 0x6985,
                    Some(code) if code[..] == *data => {
                        self.code_verified = true;
                        OK
                    }
                    Some(_) => 0x63C2,
                };
                Ok((Vec::new(), sw))
            }
            (0xE2, 0x08, 0x00) => {
                if let [0x90, 0x00, 0x08, code @ ..] = data {
                    let mut packed = [0u8; 8];
                    packed.copy_from_slice(code);
                    self.code = Some(packed);
                }
                Ok((Vec::new(), OK))
            }
            (0xE2, 0x88, 0x00) => Ok((Vec::new(), OK)),
            (0x59, 0x03, 0x00) if self.code_verified => self.touch(data),
            (0x59, 0x00, 0x00) => {
                if std::mem::take(&mut self.fail_enroll_verification) {
                    // The recorded touches stay, but the finger is not usable
                    for finger in &mut self.fingers {
                        finger.done = false;
                    }
                    Ok((Vec::new(), 0x6300))
                } else {
                    Ok((Vec::new(), OK))
                }
            }
            _ => Ok((Vec::new(), 0x6985)),
        }
    }

    fn touch(&mut self, data: &[u8]) -> Result<(Vec<u8>, u16), TransportError> {
        let (restart, index) = match data {
            [mode, finger @ 1..=2] => (*mode == 0x06, usize::from(*finger) - 1),
            _ => return Ok((Vec::new(), 0x6A80)),
        };

        match self.next_sensor(Sensor::Touch) {
            Sensor::Status(sw) => return Ok((Vec::new(), sw)),
            Sensor::LoseConnection => return Err(self.lose_connection()),
            Sensor::Touch | Sensor::Result(_) => {}
        }

        if restart {
            self.clear_fingers();
        }
        let finger = &mut self.fingers[index];
        finger.enrolled = finger.enrolled.saturating_add(1);
        finger.remaining = finger.remaining.saturating_sub(1);
        finger.done = finger.remaining == 0;
        Ok((Vec::new(), OK))
    }

    /// Version 1 enrollment status layout
    fn status_record(&self) -> Vec<u8> {
        let mut data = vec![0u8; 51];
        data[0] = 1;
        data[31] = self.max_fingers;
        for (i, finger) in self.fingers.iter().enumerate() {
            let base = 32 + 8 * i;
            data[base] = finger.enrolled;
            data[base + 1] = finger.remaining;
            data[base + 5] = match (finger.done, finger.enrolled) {
                (true, _) => 2,
                (false, 0) => 0,
                (false, _) => 1,
            };
        }
        let next = self
            .active_fingers()
            .iter()
            .position(|f| !f.done)
            .unwrap_or(self.active_fingers().len() - 1);
        data[49] = next as u8 + 1;
        data[50] = u8::from(self.is_enrolled());
        data
    }

    fn verify_applet(&mut self, command: &Command, data: &[u8]) -> Result<(Vec<u8>, u16), TransportError> {
        match (command.ins, command.p1, command.p2) {
            (0xCA, 0x5F, 0xC1) => Ok(match self.verify_applet {
                VerifyApplet::Installed { major, minor } => {
                    (vec![0x5F, 0xC1, 0x02, major, minor], OK)
                }
                _ => (Vec::new(), 0x6D00),
            }),
            (0xB6, 0x01, 0x00) => Ok(match self.match_finger()? {
                Ok(result) => (vec![result], OK),
                Err(sw) => (Vec::new(), sw),
            }),
            (0xCA, 0x5F, 0xB0) => Ok((self.small_slot.clone(), OK)),
            (0xDA, 0x5F, 0xB0) => {
                self.small_slot = data.to_vec();
                Ok((Vec::new(), OK))
            }
            (0xCB, 0x01, slot @ (0xD0 | 0xC2)) => Ok(match self.match_finger()? {
                Ok(MATCH) => {
                    let stored = if slot == 0xD0 { &self.small_slot } else { &self.huge_slot };
                    // An empty slot is released as the bare match byte
                    let reply = if stored.is_empty() { vec![MATCH] } else { stored.clone() };
                    (reply, OK)
                }
                Ok(result) => (vec![result], OK),
                Err(sw) => (Vec::new(), sw),
            }),
            (0xDB, 0x01, slot @ (0xD0 | 0xC2)) => Ok(match self.match_finger()? {
                Ok(MATCH) => {
                    if slot == 0xD0 {
                        self.small_slot = data.to_vec();
                    } else {
                        self.huge_slot = data.to_vec();
                    }
                    (vec![MATCH], OK)
                }
                Ok(result) => (vec![result], OK),
                Err(sw) => (Vec::new(), sw),
            }),
            _ => Ok((Vec::new(), 0x6D00)),
        }
    }

    /// CVM result byte, or the status word the sensor failed with
    fn match_finger(&mut self) -> Result<Result<u8, u16>, TransportError> {
        match self.next_sensor(Sensor::Touch) {
            Sensor::Touch => Ok(Ok(MATCH)),
            Sensor::Result(byte) => Ok(Ok(byte)),
            Sensor::Status(sw) => Ok(Err(sw)),
            Sensor::LoseConnection => Err(self.lose_connection()),
        }
    }
}

#[async_trait]
impl CardTransport for SimulatedCard {
    async fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Connection);
        }
        self.raw_log.push(Bytes::copy_from_slice(command));
        self.process(command).map(Bytes::from)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        self.resets += 1;
        self.selected = None;
        self.session = None;
        self.code_verified = false;
        Ok(())
    }
}

/// Pack an enroll code the way the card stores it
pub fn bcd(digits: &[u8]) -> [u8; 8] {
    let mut out = [0xFF; 8];
    out[0] = 0x20 | digits.len() as u8;
    for (i, digit) in digits.iter().enumerate() {
        let byte = &mut out[1 + i / 2];
        if i % 2 == 0 {
            *byte = (digit << 4) | 0x0F;
        } else {
            *byte = (*byte & 0xF0) | digit;
        }
    }
    out
}

fn os_version() -> Vec<u8> {
    let mut data = vec![0xFE, 0x45, 0x7F, 0x00, 0x41, 0x9F, 0x01, 0x05];
    data.extend_from_slice(b"JCOP4");
    data.extend_from_slice(&[0x9F, 0x02, 0x05]);
    data.extend_from_slice(b"2.3.1");
    data
}

fn status(sw: u16) -> Vec<u8> {
    sw.to_be_bytes().to_vec()
}

fn response(data: &[u8], sw: u16) -> Vec<u8> {
    let mut out = data.to_vec();
    out.extend_from_slice(&sw.to_be_bytes());
    out
}

fn aes_block(key: &Block, input: &Block) -> Block {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(input);
    cipher.encrypt_block(&mut block);
    let mut out = [0u8; 16];
    out.copy_from_slice(&block);
    out
}

fn cbc_encrypt(key: &Block, iv: &Block, data: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; data.len() + 16 - data.len() % 16];
    buffer[..data.len()].copy_from_slice(data);
    let len = cbc::Encryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_mut::<Iso7816>(&mut buffer, data.len())
        .expect("buffer has room for a padding block")
        .len();
    buffer.truncate(len);
    buffer
}

fn cbc_decrypt(key: &Block, iv: &Block, data: &[u8]) -> Option<Vec<u8>> {
    let mut buffer = data.to_vec();
    cbc::Decryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_mut::<Iso7816>(&mut buffer)
        .ok()
        .map(<[u8]>::to_vec)
}

fn cmac(key: &Block, parts: &[&[u8]]) -> Block {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).expect("AES-128 key");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}
