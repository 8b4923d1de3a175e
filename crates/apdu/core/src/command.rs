//! APDU command definitions
//!
//! This module provides the command type used to build ISO/IEC 7816-4
//! command APDUs, in both short and extended length form.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

/// Expected length type for APDU commands
///
/// The value is stored exactly as it is encoded on the wire, so a short
/// `Le` of `00` is represented as `0`.
pub type ExpectedLength = u16;

/// Largest payload a short APDU can carry
pub const SHORT_MAX_DATA: usize = 255;

/// Largest payload an extended APDU can carry
pub const EXTENDED_MAX_DATA: usize = 65_535;

/// How the Lc and Le fields of a command are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthEncoding {
    /// One byte Lc, one byte Le
    #[default]
    Short,
    /// `00` marker followed by two byte Lc and Le fields
    Extended,
}

/// Generic APDU command structure
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
    /// Length field encoding
    pub encoding: LengthEncoding,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
            encoding: LengthEncoding::Short,
        }
    }

    /// Create a new command with expected response length (Le)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: Some(le),
            encoding: LengthEncoding::Short,
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Create a new command with both data and expected length
    pub fn new_with_data_and_le<T: Into<Bytes>>(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: T,
        le: ExpectedLength,
    ) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data).with_le(le)
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Force extended length encoding
    pub const fn extended(mut self) -> Self {
        self.encoding = LengthEncoding::Extended;
        self
    }

    /// Command class (CLA)
    pub const fn class(&self) -> u8 {
        self.cla
    }

    /// Instruction code (INS)
    pub const fn instruction(&self) -> u8 {
        self.ins
    }

    /// First parameter (P1)
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    /// Second parameter (P2)
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    /// Command payload, empty when the command carries no data
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Expected response length (optional)
    pub const fn expected_length(&self) -> Option<ExpectedLength> {
        self.le
    }

    /// The encoding that will actually be used on the wire
    ///
    /// Payloads longer than a short APDU allows are always sent extended.
    pub fn effective_encoding(&self) -> LengthEncoding {
        if self.data().len() > SHORT_MAX_DATA || self.le.is_some_and(|le| le > 0xFF) {
            LengthEncoding::Extended
        } else {
            self.encoding
        }
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        // Header (CLA, INS, P1, P2) is always 4 bytes
        let mut length = 4;
        let data_len = self.data().len();

        match self.effective_encoding() {
            LengthEncoding::Short => {
                if data_len > 0 {
                    length += 1 + data_len;
                }
                if self.le.is_some() {
                    length += 1;
                }
            }
            LengthEncoding::Extended => {
                if data_len > 0 {
                    length += 3 + data_len;
                }
                if self.le.is_some() {
                    length += if data_len > 0 { 2 } else { 3 };
                }
            }
        }

        length
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        let data = self.data();
        match self.effective_encoding() {
            LengthEncoding::Short => {
                if !data.is_empty() {
                    buffer.put_u8(data.len() as u8);
                    buffer.put_slice(data);
                }
                if let Some(le) = self.le {
                    buffer.put_u8(le as u8);
                }
            }
            LengthEncoding::Extended => {
                if !data.is_empty() {
                    buffer.put_u8(0x00);
                    buffer.put_u16(data.len() as u16);
                    buffer.put_slice(data);
                }
                if let Some(le) = self.le {
                    if data.is_empty() {
                        buffer.put_u8(0x00);
                    }
                    buffer.put_u16(le);
                }
            }
        }

        buffer.freeze()
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 4 {
            return Err(Error::InvalidCommandLength(data.len()));
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);
        let body = &data[4..];

        match body.len() {
            0 => {}
            // Only Le present, no data
            1 => command.le = Some(body[0] as ExpectedLength),
            _ if body[0] == 0x00 => {
                command.encoding = LengthEncoding::Extended;
                if body.len() == 3 {
                    command.le = Some(u16::from_be_bytes([body[1], body[2]]));
                    return Ok(command);
                }
                if body.len() < 3 {
                    return Err(Error::InvalidCommandLength(data.len()));
                }

                let lc = u16::from_be_bytes([body[1], body[2]]) as usize;
                let rest = &body[3..];
                if rest.len() < lc {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
                command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                match &rest[lc..] {
                    [] => {}
                    [hi, lo] => command.le = Some(u16::from_be_bytes([*hi, *lo])),
                    _ => return Err(Error::InvalidCommandLength(data.len())),
                }
            }
            _ => {
                let lc = body[0] as usize;
                let rest = &body[1..];
                if rest.len() < lc {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
                command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                match &rest[lc..] {
                    [] => {}
                    [le] => command.le = Some(*le as ExpectedLength),
                    _ => return Err(Error::InvalidCommandLength(data.len())),
                }
            }
        }

        Ok(command)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("cla", &format_args!("{:#04x}", self.cla))
            .field("ins", &format_args!("{:#04x}", self.ins))
            .field("p1", &format_args!("{:#04x}", self.p1))
            .field("p2", &format_args!("{:#04x}", self.p2))
            .field("data", &hex::encode(self.data()))
            .field("le", &self.le)
            .field("encoding", &self.encoding)
            .finish()
    }
}
