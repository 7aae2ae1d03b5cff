//! Revisions - the total order every replicated call is placed in
//!
//! A revision compares by timestep, then inner counter, then author. The
//! inner counter is assigned by the author and is unique per timestep.

use std::fmt;

use crate::{Author, ReplicaError, ReplicaResult};

/// Wire size of an encoded revision: i64 + i16 + 128-bit author
pub const REVISION_BYTES: usize = 26;

/// Ordering key of a replicated call
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision {
    pub timestep: i64,
    pub inner: i16,
    pub author: Author,
}

impl Revision {
    pub const MIN: Revision = Revision::new(i64::MIN, i16::MIN, Author::MIN);
    pub const MAX: Revision = Revision::new(i64::MAX, i16::MAX, Author::MAX);

    #[inline]
    pub const fn new(timestep: i64, inner: i16, author: Author) -> Self {
        Revision {
            timestep,
            inner,
            author,
        }
    }

    /// Greatest revision at a timestep. Everything an author can issue at
    /// `timestep` sorts at or below it.
    #[inline]
    pub const fn ceiling(timestep: i64) -> Self {
        Revision::new(timestep, i16::MAX, Author::MAX)
    }

    /// Least revision at a timestep
    #[inline]
    pub const fn floor(timestep: i64) -> Self {
        Revision::new(timestep, i16::MIN, Author::MIN)
    }

    /// The revision this author issues next at the same timestep
    pub fn next_inner(self) -> ReplicaResult<Self> {
        let inner = self
            .inner
            .checked_add(1)
            .ok_or(ReplicaError::InnerOverflow {
                timestep: self.timestep,
                author: self.author,
            })?;
        Ok(Revision { inner, ..self })
    }

    pub fn to_bytes(self) -> [u8; REVISION_BYTES] {
        let mut out = [0u8; REVISION_BYTES];
        out[..8].copy_from_slice(&self.timestep.to_le_bytes());
        out[8..10].copy_from_slice(&self.inner.to_le_bytes());
        out[10..].copy_from_slice(&self.author.to_bytes());
        out
    }

    pub fn from_bytes(bytes: [u8; REVISION_BYTES]) -> Self {
        let mut timestep = [0u8; 8];
        let mut inner = [0u8; 2];
        let mut author = [0u8; 16];
        timestep.copy_from_slice(&bytes[..8]);
        inner.copy_from_slice(&bytes[8..10]);
        author.copy_from_slice(&bytes[10..]);
        Revision {
            timestep: i64::from_le_bytes(timestep),
            inner: i16::from_le_bytes(inner),
            author: Author::from_bytes(author),
        }
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev({}.{}@{:?})", self.timestep, self.inner, self.author)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.timestep, self.inner, self.author)
    }
}
