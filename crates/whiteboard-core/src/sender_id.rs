//! SenderId: identifies one bus (one tab session) on the wire.
//!
//! Wraps a random u64 and displays as a 16-character hex string. Every
//! message a bus sends carries its id so the bus can recognise its own
//! broadcasts when they come back around.
//!
//! Older peers send free-form ids such as `sender_<ms>_<random>`. Those are
//! folded into a u64 with FNV-1a, so the same foreign id always maps to the
//! same `SenderId`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SenderIdError {
    #[error("Invalid sender ID: empty")]
    Empty,
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] std::num::ParseIntError),
}

/// Session-stable identifier of a message sender.
///
/// # Examples
/// ```
/// use whiteboard_core::SenderId;
///
/// let id = SenderId::generate();
/// let parsed: SenderId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(u64);

impl SenderId {
    /// Generate a new random sender ID. Never returns zero.
    pub fn generate() -> Self {
        use rand::Rng;
        loop {
            let id: u64 = rand::rng().random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SenderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SenderId {
    type Err = SenderIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SenderIdError::Empty);
        }

        // Native format: 16 hex chars
        if s.len() == 16 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            let id = u64::from_str_radix(&s.to_ascii_lowercase(), 16)?;
            return Ok(Self(id));
        }

        // Anything else is a legacy id; hash it
        Ok(Self(fnv1a_hash(s)))
    }
}

/// FNV-1a hash for foreign sender ids. Stable across Rust versions.
fn fnv1a_hash(s: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl From<u64> for SenderId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// Hex string on the wire, same as in logs
impl serde::Serialize for SenderId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for SenderId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
