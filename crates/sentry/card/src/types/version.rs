use std::fmt;

use crate::{Error, Result};

/// A `major.minor.hotfix` version number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Version {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Hotfix version
    pub hotfix: u8,
}

impl Version {
    /// Create a version
    pub const fn new(major: u8, minor: u8, hotfix: u8) -> Self {
        Self {
            major,
            minor,
            hotfix,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.hotfix)
    }
}

/// Version information for an applet or the card OS
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VersionInfo {
    /// Whether the component answered at all
    ///
    /// This is inferred: an applet answering `6D 00` to a version query is
    /// reported as absent, which can also hide a genuine instruction fault.
    pub installed: bool,
    /// Version number, absent when the component does not report one
    pub version: Option<Version>,
    /// Textual form returned by the card
    pub text: Option<String>,
}

impl VersionInfo {
    /// A component that is not present on the card
    pub const fn not_installed() -> Self {
        Self {
            installed: false,
            version: None,
            text: None,
        }
    }

    /// A component that is present but reports no version
    pub const fn unknown() -> Self {
        Self {
            installed: true,
            version: None,
            text: None,
        }
    }

    /// A component with a known version
    pub const fn new(version: Version, text: Option<String>) -> Self {
        Self {
            installed: true,
            version: Some(version),
            text,
        }
    }

    /// Parse the card OS version response
    ///
    /// Layout: `FE >=40 7F 00 >=40 9F 01 <n> <n text bytes> 9F 02 05 <M> _ <m> _ <h>`
    /// with the version digits in ASCII.
    pub fn parse_os(data: &[u8]) -> Result<Self> {
        const HEADER: usize = 8;

        if data.len() < HEADER {
            return Err(Error::CardOsVersion("response too short"));
        }
        let markers_ok = data[0] == 0xFE
            && data[1] >= 0x40
            && data[2] == 0x7F
            && data[3] == 0x00
            && data[4] >= 0x40
            && data[5] == 0x9F
            && data[6] == 0x01;
        if !markers_ok {
            return Err(Error::CardOsVersion("unexpected header"));
        }

        let text_end = HEADER + usize::from(data[7]);
        let text = data
            .get(HEADER..text_end)
            .ok_or(Error::CardOsVersion("text length out of range"))?;

        let rest = &data[text_end..];
        match rest {
            [0x9F, 0x02, 0x05, major, _, minor, _, hotfix, ..] => {
                let version = Version::new(
                    ascii_digit(*major).ok_or(Error::CardOsVersion("major is not a digit"))?,
                    ascii_digit(*minor).ok_or(Error::CardOsVersion("minor is not a digit"))?,
                    ascii_digit(*hotfix).ok_or(Error::CardOsVersion("hotfix is not a digit"))?,
                );
                Ok(Self::new(version, ascii_text(text)))
            }
            _ => Err(Error::CardOsVersion("missing version tag")),
        }
    }

    /// Parse the enroll applet select response
    ///
    /// Applets before 2.0 answer with fewer than 16 bytes and no version.
    pub fn parse_enroll_select(data: &[u8]) -> Self {
        if data.len() < 16 {
            return Self::unknown();
        }
        match (ascii_digit(data[13]), ascii_digit(data[15])) {
            (Some(major), Some(minor)) => {
                Self::new(Version::new(major, minor, 0), ascii_text(data))
            }
            _ => Self::unknown(),
        }
    }

    /// Parse the CVM applet select response
    pub fn parse_cvm_select(data: &[u8]) -> Self {
        if data.len() < 13 {
            return Self::unknown();
        }
        let text = ascii_text(data).map(|text| {
            text.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.')
                .collect()
        });
        match (ascii_digit(data[10]), ascii_digit(data[12])) {
            (Some(major), Some(minor)) => Self::new(Version::new(major, minor, 0), text),
            _ => Self::unknown(),
        }
    }

    /// Parse the verify applet version payload
    ///
    /// The version sits at a different offset depending on the payload
    /// length. Any other length is treated as no usable applet.
    pub fn parse_verify(data: &[u8]) -> Self {
        let (major, minor) = match data {
            [_, _, _, major, minor] => (*major, *minor),
            [_, _, major, minor] => (*major, *minor),
            [major, minor] => (*major, *minor),
            _ => return Self::not_installed(),
        };
        Self::new(Version::new(major, minor, 0), None)
    }
}

/// Versions of every software component on a card
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CardVersionInfo {
    /// Java Card OS
    pub os: VersionInfo,
    /// Enroll applet
    pub enroll: VersionInfo,
    /// CVM applet
    pub cvm: VersionInfo,
    /// Verify applet
    pub verify: VersionInfo,
}

const fn ascii_digit(byte: u8) -> Option<u8> {
    if byte.is_ascii_digit() {
        Some(byte - b'0')
    } else {
        None
    }
}

fn ascii_text(bytes: &[u8]) -> Option<String> {
    bytes
        .is_ascii()
        .then(|| String::from_utf8_lossy(bytes).into_owned())
}
