/// Enrollment applet, also hosting the biometric verification and secure channel
pub const ENROLL_AID: &[u8] = b"\x49\x44\x45\x58\x5F\x4C\x5F\x01\x01";
/// Cardholder verification method applet
pub const CVM_AID: &[u8] = b"\xF0\x4A\x4E\x45\x54\x5F\x10\x01";
/// Verify applet, holding the data slots
pub const VERIFY_AID: &[u8] = b"\x4A\x4E\x45\x54\x5F\x01\x02\x03\x04\x05";

/// Shortest accepted enroll code
pub const MIN_CODE_LENGTH: usize = 4;
/// Longest accepted enroll code
pub const MAX_CODE_LENGTH: usize = 6;
/// Size of the packed enroll code buffer
pub const CODE_BUFFER_LENGTH: usize = 8;

/// Capacity of the small data slot
pub const SMALL_SLOT_CAPACITY: usize = 255;
/// Capacity of the huge data slot
pub const HUGE_SLOT_CAPACITY: usize = 2048;

/// Highest finger index a card supports
pub const MAX_FINGER_INDEX: u8 = 2;

/// Consecutive "no match performed" results tolerated before failing
pub const DEFAULT_NO_MATCH_RETRY_LIMIT: u32 = 3;

/// Verify applets older than this are rejected
pub const MIN_VERIFY_APPLET_VERSION: (u8, u8) = (1, 3);

/// Result bytes reported by the CVM for a fingerprint match
pub mod cvm_result {
    /// Biometric verification is not available
    pub const NOT_AVAILABLE: u8 = 0x00;
    /// Biometric verification is blocked
    pub const BLOCKED: u8 = 0x01;
    /// The sensor did not perform a match
    pub const NO_MATCH_PERFORMED: u8 = 0x7D;
    /// Fingerprint matched
    pub const MATCH: u8 = 0xA5;
    /// Fingerprint did not match
    pub const NO_MATCH: u8 = 0x5A;
}

/// Length of the secure channel message counter and chaining value
pub const BLOCK_SIZE: usize = 16;
/// Length of the truncated MAC appended to wrapped messages
pub const MAC_LENGTH: usize = 8;
/// Length of an uncompressed public key without the `04` prefix
pub const PUBLIC_KEY_LENGTH: usize = 64;
/// Length of an ECDH private key or shared secret
pub const SECRET_LENGTH: usize = 32;
