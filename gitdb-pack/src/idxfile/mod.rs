//! Pack index (`.idx` v2) decoding, encoding, and lookup.
//!
//! The on-disk layout is: magic, version, a 256-entry cumulative fanout
//! keyed by the first hash byte, the sorted hash table, a CRC-32 per entry,
//! 31-bit offsets (top bit routes to a 64-bit large-offset table), the pack
//! checksum, and finally a SHA-1 of the index itself.

mod writer;

pub use writer::Writer;

use std::collections::HashMap;
use std::io::Read;
use std::sync::OnceLock;

use sha1::{Digest, Sha1};

use gitdb_core::{ObjectId, ID_SIZE};

use crate::error::{Error, Result};

/// Magic bytes opening a v2 index: `\377tOc`.
pub const SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];
/// The only supported index version.
pub const VERSION: u32 = 2;

const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// One index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub id: ObjectId,
    pub crc32: u32,
    pub offset: u64,
}

/// An in-memory pack index mapping hashes to offsets and back.
pub struct Index {
    fanout: [u32; 256],
    ids: Vec<ObjectId>,
    crcs: Vec<u32>,
    offsets: Vec<u64>,
    pack_checksum: ObjectId,
    by_offset: OnceLock<HashMap<u64, usize>>,
}

impl Index {
    /// Builds an index from unsorted entries and the pack checksum.
    pub fn from_entries(mut entries: Vec<Entry>, pack_checksum: ObjectId) -> Self {
        entries.sort_by(|a, b| a.id.cmp(&b.id));

        let mut fanout = [0u32; 256];
        for entry in &entries {
            fanout[entry.id.first_byte() as usize] += 1;
        }
        for bucket in 1..256 {
            fanout[bucket] += fanout[bucket - 1];
        }

        Index {
            fanout,
            ids: entries.iter().map(|e| e.id).collect(),
            crcs: entries.iter().map(|e| e.crc32).collect(),
            offsets: entries.iter().map(|e| e.offset).collect(),
            pack_checksum,
            by_offset: OnceLock::new(),
        }
    }

    /// Decodes a v2 index from raw bytes, verifying its trailing checksum.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        if cursor.take(4)? != SIGNATURE.as_slice() {
            return Err(Error::CorruptIndex("bad signature"));
        }
        if cursor.read_u32()? != VERSION {
            return Err(Error::CorruptIndex("unsupported version"));
        }

        let mut fanout = [0u32; 256];
        for bucket in fanout.iter_mut() {
            *bucket = cursor.read_u32()?;
        }
        if fanout.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::CorruptIndex("fanout not monotonic"));
        }
        let count = fanout[255] as usize;

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(ObjectId::from_bytes(cursor.take(ID_SIZE)?).map_err(|_| {
                Error::CorruptIndex("short hash table")
            })?);
        }
        if ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::CorruptIndex("hash table not sorted"));
        }

        let mut crcs = Vec::with_capacity(count);
        for _ in 0..count {
            crcs.push(cursor.read_u32()?);
        }

        let mut raw_offsets = Vec::with_capacity(count);
        for _ in 0..count {
            raw_offsets.push(cursor.read_u32()?);
        }

        // Everything between the 31-bit offsets and the two trailing hashes
        // is the large-offset table.
        let remaining = cursor.remaining();
        if remaining < 2 * ID_SIZE {
            return Err(Error::CorruptIndex("missing trailer"));
        }
        let large_count = (remaining - 2 * ID_SIZE) / 8;
        let mut large = Vec::with_capacity(large_count);
        for _ in 0..large_count {
            large.push(cursor.read_u64()?);
        }

        let mut offsets = Vec::with_capacity(count);
        for &raw in &raw_offsets {
            if raw & LARGE_OFFSET_FLAG != 0 {
                let index = (raw & !LARGE_OFFSET_FLAG) as usize;
                let offset = *large
                    .get(index)
                    .ok_or(Error::CorruptIndex("large offset out of range"))?;
                offsets.push(offset);
            } else {
                offsets.push(u64::from(raw));
            }
        }

        let pack_checksum = ObjectId::from_bytes(cursor.take(ID_SIZE)?)
            .map_err(|_| Error::CorruptIndex("missing pack checksum"))?;
        let recorded = ObjectId::from_bytes(cursor.take(ID_SIZE)?)
            .map_err(|_| Error::CorruptIndex("missing index checksum"))?;

        let digest: [u8; ID_SIZE] = Sha1::digest(&data[..data.len() - ID_SIZE]).into();
        if recorded != ObjectId::from(digest) {
            return Err(Error::CorruptIndex("index checksum mismatch"));
        }

        Ok(Index {
            fanout,
            ids,
            crcs,
            offsets,
            pack_checksum,
            by_offset: OnceLock::new(),
        })
    }

    /// Reads and decodes an index from a reader.
    pub fn from_reader(mut r: impl Read) -> Result<Self> {
        let mut data = Vec::new();
        r.read_to_end(&mut data)?;
        Self::parse(&data)
    }

    /// Encodes this index as v2 bytes, returning the index checksum.
    pub fn encode(&self, out: &mut impl std::io::Write) -> Result<ObjectId> {
        let mut buf = Vec::with_capacity(1032 + self.ids.len() * (ID_SIZE + 8) + 2 * ID_SIZE);
        buf.extend_from_slice(&SIGNATURE);
        buf.extend_from_slice(&VERSION.to_be_bytes());
        for bucket in self.fanout {
            buf.extend_from_slice(&bucket.to_be_bytes());
        }
        for id in &self.ids {
            buf.extend_from_slice(id.as_bytes());
        }
        for crc in &self.crcs {
            buf.extend_from_slice(&crc.to_be_bytes());
        }

        let mut large = Vec::new();
        for &offset in &self.offsets {
            if offset <= u64::from(u32::MAX >> 1) {
                buf.extend_from_slice(&(offset as u32).to_be_bytes());
            } else {
                let raw = LARGE_OFFSET_FLAG | large.len() as u32;
                buf.extend_from_slice(&raw.to_be_bytes());
                large.push(offset);
            }
        }
        for offset in large {
            buf.extend_from_slice(&offset.to_be_bytes());
        }

        buf.extend_from_slice(self.pack_checksum.as_bytes());
        let digest: [u8; ID_SIZE] = Sha1::digest(&buf).into();
        let checksum = ObjectId::from(digest);
        buf.extend_from_slice(checksum.as_bytes());

        out.write_all(&buf)?;
        Ok(checksum)
    }

    pub fn count(&self) -> u32 {
        self.ids.len() as u32
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.find_offset(id).is_some()
    }

    /// Offset of the entry with the given hash.
    pub fn find_offset(&self, id: ObjectId) -> Option<u64> {
        self.position(id).map(|pos| self.offsets[pos])
    }

    /// Hash of the entry at the given offset.
    pub fn find_hash(&self, offset: u64) -> Option<ObjectId> {
        let map = self.by_offset.get_or_init(|| {
            self.offsets
                .iter()
                .enumerate()
                .map(|(pos, &offset)| (offset, pos))
                .collect()
        });
        map.get(&offset).map(|&pos| self.ids[pos])
    }

    /// CRC-32 of the raw pack entry with the given hash.
    pub fn find_crc32(&self, id: ObjectId) -> Option<u32> {
        self.position(id).map(|pos| self.crcs[pos])
    }

    /// Binary search within the fanout bucket of the id's first byte.
    fn position(&self, id: ObjectId) -> Option<usize> {
        let bucket = id.first_byte() as usize;
        let end = self.fanout[bucket] as usize;
        let start = if bucket == 0 {
            0
        } else {
            self.fanout[bucket - 1] as usize
        };
        self.ids[start..end].binary_search(&id).ok().map(|pos| pos + start)
    }

    /// Entries in hash order.
    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        (0..self.ids.len()).map(|pos| Entry {
            id: self.ids[pos],
            crc32: self.crcs[pos],
            offset: self.offsets[pos],
        })
    }

    /// Entries sorted by pack offset; the order objects appear in the pack.
    pub fn entries_by_offset(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self.entries().collect();
        entries.sort_by_key(|e| e.offset);
        entries
    }

    /// Checksum of the pack this index describes.
    pub fn pack_checksum(&self) -> ObjectId {
        self.pack_checksum
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::CorruptIndex("unexpected end of index"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes(raw.try_into().expect("4-byte slice")))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let raw = self.take(8)?;
        Ok(u64::from_be_bytes(raw.try_into().expect("8-byte slice")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdb_core::ObjectType;

    fn sample_entries() -> Vec<Entry> {
        [b"one".as_slice(), b"two", b"three", b"four"]
            .iter()
            .enumerate()
            .map(|(i, data)| Entry {
                id: ObjectId::for_object(ObjectType::Blob, data),
                crc32: 0x1000 + i as u32,
                offset: 12 + (i as u64) * 40,
            })
            .collect()
    }

    #[test]
    fn lookup_both_directions() {
        let entries = sample_entries();
        let index = Index::from_entries(entries.clone(), ObjectId::ZERO);
        assert_eq!(index.count(), 4);
        for entry in &entries {
            assert_eq!(index.find_offset(entry.id), Some(entry.offset));
            assert_eq!(index.find_hash(entry.offset), Some(entry.id));
            assert_eq!(index.find_crc32(entry.id), Some(entry.crc32));
        }
        let missing = ObjectId::for_object(ObjectType::Blob, b"absent");
        assert_eq!(index.find_offset(missing), None);
        assert_eq!(index.find_hash(9999), None);
    }

    #[test]
    fn encode_parse_roundtrip() {
        let pack_checksum = ObjectId::for_object(ObjectType::Blob, b"pack");
        let index = Index::from_entries(sample_entries(), pack_checksum);
        let mut encoded = Vec::new();
        index.encode(&mut encoded).unwrap();

        let decoded = Index::parse(&encoded).unwrap();
        assert_eq!(decoded.count(), 4);
        assert_eq!(decoded.pack_checksum(), pack_checksum);
        for entry in sample_entries() {
            assert_eq!(decoded.find_offset(entry.id), Some(entry.offset));
            assert_eq!(decoded.find_crc32(entry.id), Some(entry.crc32));
        }
    }

    #[test]
    fn large_offsets_roundtrip() {
        let mut entries = sample_entries();
        entries[2].offset = (1u64 << 31) + 17;
        entries[3].offset = (1u64 << 40) + 3;
        let index = Index::from_entries(entries.clone(), ObjectId::ZERO);

        let mut encoded = Vec::new();
        index.encode(&mut encoded).unwrap();
        let decoded = Index::parse(&encoded).unwrap();
        for entry in &entries {
            assert_eq!(decoded.find_offset(entry.id), Some(entry.offset));
        }
    }

    #[test]
    fn rejects_corrupt_input() {
        assert!(matches!(
            Index::parse(b"nope"),
            Err(Error::CorruptIndex(_))
        ));

        let index = Index::from_entries(sample_entries(), ObjectId::ZERO);
        let mut encoded = Vec::new();
        index.encode(&mut encoded).unwrap();

        // Flip a byte in the CRC table; the trailing checksum must catch it.
        encoded[1032 + 4 * ID_SIZE] ^= 0xff;
        assert!(matches!(
            Index::parse(&encoded),
            Err(Error::CorruptIndex("index checksum mismatch"))
        ));

        // Truncation inside the trailer.
        let short = &encoded[..encoded.len() - ID_SIZE - 1];
        assert!(Index::parse(short).is_err());
    }

    #[test]
    fn entries_by_offset_follow_pack_order() {
        let index = Index::from_entries(sample_entries(), ObjectId::ZERO);
        let offsets: Vec<u64> = index.entries_by_offset().iter().map(|e| e.offset).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);
    }
}
