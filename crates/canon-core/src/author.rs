//! Author identity
//!
//! An author is an opaque 128-bit peer identifier. Authors are ordered
//! lexicographically on their two signed 64-bit halves so that every peer
//! sorts revisions identically.

use std::fmt;

/// Peer identity - the author of a revision
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Author {
    pub msb: i64,
    pub lsb: i64,
}

impl Author {
    /// Lowest possible author, reserved for system-local events
    pub const MIN: Author = Author {
        msb: i64::MIN,
        lsb: i64::MIN,
    };

    /// Highest possible author, reserved for horizons and system-local events
    pub const MAX: Author = Author {
        msb: i64::MAX,
        lsb: i64::MAX,
    };

    /// Author substituted for periodic firings and bootstrap actions
    pub const SYSTEM: Author = Author::MIN;

    #[inline]
    pub const fn new(msb: i64, lsb: i64) -> Self {
        Author { msb, lsb }
    }

    #[inline]
    pub fn from_u128(id: u128) -> Self {
        Author {
            msb: (id >> 64) as u64 as i64,
            lsb: id as u64 as i64,
        }
    }

    #[inline]
    pub fn as_u128(self) -> u128 {
        ((self.msb as u64 as u128) << 64) | (self.lsb as u64 as u128)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.msb.to_le_bytes());
        out[8..].copy_from_slice(&self.lsb.to_le_bytes());
        out
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut msb = [0u8; 8];
        let mut lsb = [0u8; 8];
        msb.copy_from_slice(&bytes[..8]);
        lsb.copy_from_slice(&bytes[8..]);
        Author {
            msb: i64::from_le_bytes(msb),
            lsb: i64::from_le_bytes(lsb),
        }
    }

    /// Reserved authors never originate replicated calls
    #[inline]
    pub fn is_reserved(self) -> bool {
        self == Author::MIN || self == Author::MAX
    }
}

impl fmt::Debug for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Author::MIN => write!(f, "Author(MIN)"),
            Author::MAX => write!(f, "Author(MAX)"),
            _ => write!(f, "Author({:016x}{:016x})", self.msb as u64, self.lsb as u64),
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.msb as u64, self.lsb as u64)
    }
}
