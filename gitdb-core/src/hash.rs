//! Content ids and the canonical object hash.

use std::fmt;

use sha1::{Digest, Sha1};

use crate::object::ObjectType;

/// Size of an object id in bytes.
pub const ID_SIZE: usize = 20;

/// A fixed 20-byte content identifier.
///
/// The all-zero value is distinguished and means "absent"; see
/// [`ObjectId::ZERO`] and [`ObjectId::is_zero`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; ID_SIZE]);

impl ObjectId {
    /// The distinguished absent id.
    pub const ZERO: ObjectId = ObjectId([0; ID_SIZE]);

    /// Builds an id from exactly [`ID_SIZE`] raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let raw: [u8; ID_SIZE] = bytes.try_into().map_err(|_| crate::Error::InvalidId)?;
        Ok(ObjectId(raw))
    }

    /// Parses a 40-character lowercase or uppercase hex string.
    pub fn from_hex(hex: &str) -> crate::Result<Self> {
        let hex = hex.as_bytes();
        if hex.len() != ID_SIZE * 2 {
            return Err(crate::Error::InvalidId);
        }
        let mut raw = [0u8; ID_SIZE];
        for (i, out) in raw.iter_mut().enumerate() {
            let hi = val(hex[i * 2])?;
            let lo = val(hex[i * 2 + 1])?;
            *out = (hi << 4) | lo;
        }
        Ok(ObjectId(raw))
    }

    /// Computes the id of an object from its type and payload using the
    /// canonical framing `"<type> <len>\0<payload>"`.
    pub fn for_object(kind: ObjectType, data: &[u8]) -> Self {
        let mut hasher = Hasher::new(kind, data.len() as u64);
        hasher.update(data);
        hasher.finalize()
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// First byte of the id; indexes the pack-index fanout table.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

fn val(c: u8) -> crate::Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(crate::Error::InvalidId),
    }
}

impl From<[u8; ID_SIZE]> for ObjectId {
    fn from(raw: [u8; ID_SIZE]) -> Self {
        ObjectId(raw)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

/// Streaming hasher over the canonical object framing.
///
/// Seeded with `"<type> <size>\0"`, then fed the payload bytes.
pub struct Hasher {
    inner: Sha1,
}

impl Hasher {
    pub fn new(kind: ObjectType, size: u64) -> Self {
        let mut inner = Sha1::new();
        inner.update(kind.name().as_bytes());
        inner.update(b" ");
        inner.update(size.to_string().as_bytes());
        inner.update(b"\0");
        Hasher { inner }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> ObjectId {
        ObjectId(self.inner.finalize().into())
    }
}
