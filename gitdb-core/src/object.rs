//! Object model: typed, hash-identified blobs.

use std::fmt;
use std::io;

use crate::hash::ObjectId;

/// The type of an object as stored or queried.
///
/// `OfsDelta` and `RefDelta` only exist on disk inside packs; once a delta
/// chain is resolved the object's effective type is that of the chain's
/// root. `Any` is a query-only wildcard and never the type of a concrete
/// object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
    OfsDelta,
    RefDelta,
    Any,
}

impl ObjectType {
    /// True for the on-disk delta variants.
    pub fn is_delta(self) -> bool {
        matches!(self, ObjectType::OfsDelta | ObjectType::RefDelta)
    }

    /// True for types that may appear as a standalone (loose) object.
    pub fn is_standard(self) -> bool {
        matches!(
            self,
            ObjectType::Commit | ObjectType::Tree | ObjectType::Blob | ObjectType::Tag
        )
    }

    /// The ASCII name used in canonical framing and loose-object headers.
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
            ObjectType::Tag => "tag",
            ObjectType::OfsDelta => "ofs-delta",
            ObjectType::RefDelta => "ref-delta",
            ObjectType::Any => "any",
        }
    }

    /// Parses a loose-object header name. Only standard types have names on
    /// disk.
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"commit" => Some(ObjectType::Commit),
            b"tree" => Some(ObjectType::Tree),
            b"blob" => Some(ObjectType::Blob),
            b"tag" => Some(ObjectType::Tag),
            _ => None,
        }
    }

    /// Decodes the 3-bit type code of a pack entry header.
    pub fn from_pack_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ObjectType::Commit),
            2 => Some(ObjectType::Tree),
            3 => Some(ObjectType::Blob),
            4 => Some(ObjectType::Tag),
            6 => Some(ObjectType::OfsDelta),
            7 => Some(ObjectType::RefDelta),
            _ => None,
        }
    }

    /// The 3-bit pack entry code, for types that can appear in a pack.
    pub fn pack_code(self) -> Option<u8> {
        match self {
            ObjectType::Commit => Some(1),
            ObjectType::Tree => Some(2),
            ObjectType::Blob => Some(3),
            ObjectType::Tag => Some(4),
            ObjectType::OfsDelta => Some(6),
            ObjectType::RefDelta => Some(7),
            ObjectType::Any => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An encoded object held fully in memory.
///
/// Freshly created objects start as `Any` with no contents; callers set the
/// type and declared size, then append payload bytes through [`io::Write`].
#[derive(Debug, Clone)]
pub struct MemoryObject {
    kind: ObjectType,
    size: u64,
    contents: Vec<u8>,
}

impl Default for MemoryObject {
    fn default() -> Self {
        MemoryObject {
            kind: ObjectType::Any,
            size: 0,
            contents: Vec::new(),
        }
    }
}

impl MemoryObject {
    /// Builds a complete object in one step; the declared size is the
    /// payload length.
    pub fn new(kind: ObjectType, contents: Vec<u8>) -> Self {
        MemoryObject {
            kind,
            size: contents.len() as u64,
            contents,
        }
    }

    /// The canonical id of this object, computed from type and contents.
    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(self.kind, &self.contents)
    }

    pub fn object_type(&self) -> ObjectType {
        self.kind
    }

    pub fn set_object_type(&mut self, kind: ObjectType) {
        self.kind = kind;
    }

    /// Declared plaintext size. Usually equals `data().len()` once fully
    /// written.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn data(&self) -> &[u8] {
        &self.contents
    }

    pub fn into_data(self) -> Vec<u8> {
        self.contents
    }
}

impl io::Write for MemoryObject {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.contents.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
