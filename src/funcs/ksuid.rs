//! K-sortable unique identifiers.
//!
//! 20 bytes: a 4-byte big-endian timestamp (seconds since `EPOCH`) followed
//! by 16 random bytes, rendered as 27 base62 characters. Lexical order of
//! the string matches creation order at one-second resolution.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

/// 2014-05-13T16:53:20Z
pub const EPOCH: u64 = 1_400_000_000;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ENCODED_LEN: usize = 27;
const RAW_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ksuid([u8; RAW_LEN]);

impl Ksuid {
    /// A new identifier for the current time.
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(EPOCH);
        let timestamp = now.saturating_sub(EPOCH).min(u32::MAX as u64) as u32;

        let mut payload = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut payload);
        Self::from_parts(timestamp, payload)
    }

    pub fn from_parts(timestamp: u32, payload: [u8; 16]) -> Self {
        let mut raw = [0u8; RAW_LEN];
        raw[..4].copy_from_slice(&timestamp.to_be_bytes());
        raw[4..].copy_from_slice(&payload);
        Self(raw)
    }

    /// Seconds since `EPOCH`.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut out = [ALPHABET[0]; ENCODED_LEN];
        let mut digits: Vec<u8> = self.0.to_vec();
        let mut pos = ENCODED_LEN;

        // Long division of the big-endian number by 62 until it is zero.
        while digits.iter().any(|d| *d != 0) && pos > 0 {
            let mut remainder: u32 = 0;
            for digit in digits.iter_mut() {
                let acc = (remainder << 8) | u32::from(*digit);
                *digit = (acc / 62) as u8;
                remainder = acc % 62;
            }
            pos -= 1;
            out[pos] = ALPHABET[remainder as usize];
        }
        out
    }
}

impl Default for Ksuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Ksuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.encode();
        f.write_str(std::str::from_utf8(&encoded).map_err(|_| fmt::Error)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(Ksuid::from_parts(0, [0; 16]).to_string(), "0".repeat(27));
        assert_eq!(
            Ksuid::from_parts(u32::MAX, [0xff; 16]).to_string(),
            "aWgEPTl1tmebfsQzFP4bxwgy80V"
        );
    }

    #[test]
    fn test_new_is_well_formed_and_ordered() {
        let a = Ksuid::from_parts(100, [0xff; 16]).to_string();
        let b = Ksuid::from_parts(101, [0x00; 16]).to_string();
        assert!(a < b);

        let id = Ksuid::new();
        assert_eq!(id.to_string().len(), 27);
        assert!(id.timestamp() > 0);
        assert_ne!(Ksuid::new(), Ksuid::new());
    }
}
