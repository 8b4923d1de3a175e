//! Command encoder for the SentryCard applets
//!
//! Every builder here is pure: it validates its inputs and returns the exact
//! command bytes, without touching the transport.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use sentry_apdu_core::Command;

use crate::constants::{CODE_BUFFER_LENGTH, MAX_CODE_LENGTH, MAX_FINGER_INDEX, MIN_CODE_LENGTH};
use crate::types::DataSlot;
use crate::{Error, Result};

/// Class byte of the enroll applet commands
const ENROLL_CLA: u8 = 0x84;
/// Class byte of the enroll status query on cards without secure messaging
const PLAIN_CLA: u8 = 0x00;
/// Class byte of proprietary commands
const PROPRIETARY_CLA: u8 = 0x80;

/// A validated enroll code of 4 to 6 decimal digits
#[derive(Clone, PartialEq, Eq)]
pub struct EnrollCode(Vec<u8>);

impl EnrollCode {
    /// Validate the digits of an enroll code
    ///
    /// Each element is a single digit value (0-9), not an ASCII character.
    pub fn new(digits: &[u8]) -> Result<Self> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&digits.len()) {
            return Err(Error::CodeLengthOutOfBounds(digits.len()));
        }
        if let Some(&digit) = digits.iter().find(|&&d| d > 9) {
            return Err(Error::CodeDigitOutOfBounds(digit));
        }
        Ok(Self(digits.to_vec()))
    }

    /// The code digits
    pub fn digits(&self) -> &[u8] {
        &self.0
    }

    /// Pack the code into the 8 byte BCD buffer sent to the card
    ///
    /// Byte 0 holds `0x20 + digit count`, digits follow two per byte with the
    /// high nibble first, and unused nibbles stay `F`.
    pub fn to_bcd(&self) -> [u8; CODE_BUFFER_LENGTH] {
        let mut buffer = [0xFF; CODE_BUFFER_LENGTH];
        buffer[0] = 0x20 + self.0.len() as u8;

        for (index, &digit) in self.0.iter().enumerate() {
            let byte = &mut buffer[1 + index / 2];
            if index % 2 == 0 {
                *byte = (*byte & 0x0F) | (digit << 4);
            } else {
                *byte = (*byte & 0xF0) | digit;
            }
        }

        buffer
    }

    /// Recover a code from its BCD buffer
    pub fn from_bcd(buffer: &[u8]) -> Result<Self> {
        let Some((&header, packed)) = buffer.split_first() else {
            return Err(Error::CodeLengthOutOfBounds(0));
        };
        let count = header.wrapping_sub(0x20) as usize;
        if count > packed.len() * 2 {
            return Err(Error::CodeLengthOutOfBounds(count));
        }

        let digits: Vec<u8> = (0..count)
            .map(|index| {
                let byte = packed[index / 2];
                if index % 2 == 0 { byte >> 4 } else { byte & 0x0F }
            })
            .collect();

        Self::new(&digits)
    }
}

impl TryFrom<&[u8]> for EnrollCode {
    type Error = Error;

    fn try_from(digits: &[u8]) -> Result<Self> {
        Self::new(digits)
    }
}

// The code is a secret, keep it out of logs
impl fmt::Debug for EnrollCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnrollCode(<{} digits>)", self.0.len())
    }
}

/// Check a finger index against the supported range
pub const fn check_finger(finger: u8) -> Result<u8> {
    if finger >= 1 && finger <= MAX_FINGER_INDEX {
        Ok(finger)
    } else {
        Err(Error::InvalidFingerIndex(finger))
    }
}

/// Check a payload against the capacity of a data slot
pub const fn check_slot_size(slot: DataSlot, len: usize) -> Result<()> {
    if len > slot.capacity() {
        Err(Error::DataSizeNotSupported { slot, len })
    } else {
        Ok(())
    }
}

/// `00 A4 04 00 <len> <aid> 00`
pub fn select(aid: &'static [u8]) -> Command {
    Command::new_with_data_and_le(0x00, 0xA4, 0x04, 0x00, Bytes::from_static(aid), 0x00)
}

/// `80 20 00 80 08 <bcd>`
pub fn verify_code(code: &EnrollCode) -> Command {
    Command::new_with_data(PROPRIETARY_CLA, 0x20, 0x00, 0x80, code.to_bcd().to_vec())
}

/// `80 E2 08 00 0B 90 00 08 <bcd>`
pub fn set_code(code: &EnrollCode) -> Command {
    let mut data = BytesMut::with_capacity(3 + CODE_BUFFER_LENGTH);
    data.put_slice(&[0x90, 0x00, 0x08]);
    data.put_slice(&code.to_bcd());
    Command::new_with_data(PROPRIETARY_CLA, 0xE2, 0x08, 0x00, data.freeze())
}

/// The provisioning commands run once after the code has been set
pub fn setup_sequence() -> [Command; 4] {
    let write = |data: &'static [u8]| {
        Command::new_with_data(PROPRIETARY_CLA, 0xE2, 0x08, 0x00, Bytes::from_static(data))
    };
    [
        write(&[0x90, 0x08, 0x01, 0x03]),
        write(&[0x90, 0x13, 0x01, 0xCB]),
        write(&[0x90, 0x15, 0x01, 0xFF]),
        Command::new_with_le(PROPRIETARY_CLA, 0xE2, 0x88, 0x00, 0x00),
    ]
}

/// `84 59 04 00 01 00`, or `00 59 04 00 01 00` without secure messaging
pub fn get_enroll_status(secure: bool) -> Command {
    let cla = if secure { ENROLL_CLA } else { PLAIN_CLA };
    Command::new_with_data(cla, 0x59, 0x04, 0x00, Bytes::from_static(&[0x00]))
}

/// `84 59 03 00 02 00 <finger>`
pub fn process_fingerprint(finger: u8) -> Result<Command> {
    let finger = check_finger(finger)?;
    Ok(Command::new_with_data(ENROLL_CLA, 0x59, 0x03, 0x00, vec![0x00, finger]))
}

/// `84 59 03 00 02 06 <finger>`
pub fn restart_and_process_fingerprint(finger: u8) -> Result<Command> {
    let finger = check_finger(finger)?;
    Ok(Command::new_with_data(ENROLL_CLA, 0x59, 0x03, 0x00, vec![0x06, finger]))
}

/// `84 59 00 00 01 00`
pub fn verify_enrolled_fingerprint() -> Command {
    Command::new_with_data(ENROLL_CLA, 0x59, 0x00, 0x00, Bytes::from_static(&[0x00]))
}

/// `80 B6 01 00 00`
pub const fn get_fingerprint_verification() -> Command {
    Command::new_with_le(PROPRIETARY_CLA, 0xB6, 0x01, 0x00, 0x00)
}

/// Read a data slot
///
/// The small slot has an unsecured (`80 CA 5F B0 FF`) and a secured
/// (`80 CB 01 D0 FF`) form. The huge slot is always secured and uses an
/// extended Le (`80 CB 01 C2 00 0F FF`).
pub fn get_data(slot: DataSlot, secured: bool) -> Command {
    match (slot, secured) {
        (DataSlot::Small, false) => Command::new_with_le(PROPRIETARY_CLA, 0xCA, 0x5F, 0xB0, 0xFF),
        (DataSlot::Small, true) => Command::new_with_le(PROPRIETARY_CLA, 0xCB, 0x01, 0xD0, 0xFF),
        (DataSlot::Huge, _) => {
            Command::new_with_le(PROPRIETARY_CLA, 0xCB, 0x01, 0xC2, 0x0FFF).extended()
        }
    }
}

/// Write a data slot, failing before encoding when the payload is too large
pub fn set_data(slot: DataSlot, secured: bool, data: &[u8]) -> Result<Command> {
    check_slot_size(slot, data.len())?;
    let payload = Bytes::copy_from_slice(data);

    Ok(match (slot, secured) {
        (DataSlot::Small, false) => {
            Command::new_with_data(PROPRIETARY_CLA, 0xDA, 0x5F, 0xB0, payload)
        }
        (DataSlot::Small, true) => {
            Command::new_with_data(PROPRIETARY_CLA, 0xDB, 0x01, 0xD0, payload)
        }
        (DataSlot::Huge, _) => {
            Command::new_with_data(PROPRIETARY_CLA, 0xDB, 0x01, 0xC2, payload).extended()
        }
    })
}

/// `B1 05 40 00 00`
pub const fn get_os_version() -> Command {
    Command::new_with_le(0xB1, 0x05, 0x40, 0x00, 0x00)
}

/// `80 CA 5F C1 00`
pub const fn get_applet_version() -> Command {
    Command::new_with_le(PROPRIETARY_CLA, 0xCA, 0x5F, 0xC1, 0x00)
}

/// `ED 57 C1 00 01 00`, honoured only by development cards
pub fn reset_biometric_data() -> Command {
    Command::new_with_data(0xED, 0x57, 0xC1, 0x00, Bytes::from_static(&[0x00]))
}
