//! Random-access reads from an indexed pack.
//!
//! Where the parser consumes a whole pack once, this reader serves point
//! lookups: object by hash, object by offset, plaintext size without
//! materialising payloads, and delta-form reads for consumers that stream
//! deltas as-is. Reconstructed objects land in a shared hash-keyed LRU so
//! repeated reads against the same bases stay cheap.

use std::io::{Read, Seek};
use std::sync::Arc;

use gitdb_core::cache::ObjectLru;
use gitdb_core::{MemoryObject, ObjectId, ObjectType};

use crate::delta;
use crate::error::{Error, Result};
use crate::idxfile::{Entry, Index};
use crate::scanner::Scanner;

/// Upper bound on how much of a delta stream is inflated to read its size
/// header (two varints).
const DELTA_SIZE_PREFIX: usize = 32;

/// Delta chains deeper than this are treated as corruption; a crafted pack
/// could otherwise send the chain walk in circles.
const MAX_CHAIN_DEPTH: usize = 4096;

/// An object left in delta form, as stored in the pack.
#[derive(Debug, Clone)]
pub struct DeltaObject {
    /// Id of the object this delta reconstructs, per the pack index.
    pub id: ObjectId,
    /// Id of the base object the delta applies to.
    pub base: ObjectId,
    /// Disk type: `OfsDelta` or `RefDelta`.
    pub kind: ObjectType,
    /// Declared inflated length of the instruction stream.
    pub size: u64,
    /// The inflated delta instruction stream.
    pub data: Vec<u8>,
}

/// Result of a delta-form read: entries that are not deltas come back whole.
#[derive(Debug, Clone)]
pub enum PackedObject {
    Full(MemoryObject),
    Delta(DeltaObject),
}

impl PackedObject {
    pub fn object_type(&self) -> ObjectType {
        match self {
            PackedObject::Full(obj) => obj.object_type(),
            PackedObject::Delta(delta) => delta.kind,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            PackedObject::Full(obj) => obj.size(),
            PackedObject::Delta(delta) => delta.size,
        }
    }
}

/// Reads objects out of one pack through its index.
pub struct PackReader<F: Read + Seek> {
    index: Arc<Index>,
    file: F,
    cache: Arc<ObjectLru>,
}

impl<F: Read + Seek> PackReader<F> {
    pub fn new(index: Arc<Index>, file: F, cache: Arc<ObjectLru>) -> Self {
        PackReader { index, file, cache }
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    /// Full read of the object with the given id.
    pub fn object_by_id(&mut self, id: ObjectId) -> Result<MemoryObject> {
        if let Some(obj) = self.cache.get(id) {
            return Ok((*obj).clone());
        }
        let offset = self.index.find_offset(id).ok_or(Error::ObjectNotFound)?;
        self.object_at_offset(offset)
    }

    /// Full read of the entry at the given offset, following its delta
    /// chain.
    pub fn object_at_offset(&mut self, offset: u64) -> Result<MemoryObject> {
        if let Some(id) = self.index.find_hash(offset) {
            if let Some(obj) = self.cache.get(id) {
                return Ok((*obj).clone());
            }
        }

        let mut scanner = Scanner::new(&mut self.file);
        // Delta streams gathered on the way down, innermost last.
        let mut chain: Vec<Vec<u8>> = Vec::new();
        let mut cursor = offset;
        let (kind, base) = loop {
            if chain.len() > MAX_CHAIN_DEPTH {
                return Err(Error::CorruptDelta("delta chain too deep"));
            }
            scanner.seek_from_start(cursor)?;
            let header = scanner.next_object_header()?;
            match (header.kind, header.base_offset, header.base_id) {
                (ObjectType::OfsDelta, Some(base_offset), _) => {
                    let mut raw = Vec::new();
                    scanner.next_object(&mut raw)?;
                    chain.push(raw);
                    if let Some(cached) = self
                        .index
                        .find_hash(base_offset)
                        .and_then(|base_id| self.cache.get(base_id))
                    {
                        break (cached.object_type(), cached.data().to_vec());
                    }
                    cursor = base_offset;
                }
                (ObjectType::RefDelta, _, Some(base_id)) => {
                    let mut raw = Vec::new();
                    scanner.next_object(&mut raw)?;
                    chain.push(raw);
                    if let Some(cached) = self.cache.get(base_id) {
                        break (cached.object_type(), cached.data().to_vec());
                    }
                    match self.index.find_offset(base_id) {
                        Some(base_offset) => cursor = base_offset,
                        None => return Err(Error::ObjectNotFound),
                    }
                }
                (ObjectType::OfsDelta | ObjectType::RefDelta, _, _) => {
                    return Err(Error::CorruptDelta("delta entry without a base reference"));
                }
                (kind, _, _) => {
                    let mut data = Vec::with_capacity(header.length as usize);
                    scanner.next_object(&mut data)?;
                    break (kind, data);
                }
            }
        };

        let mut data = base;
        for raw in chain.iter().rev() {
            data = delta::apply(&data, raw)?;
        }

        let obj = Arc::new(MemoryObject::new(kind, data));
        self.cache.put(obj.clone());
        Ok((*obj).clone())
    }

    /// Plaintext size of the object with the given id.
    pub fn size_by_id(&mut self, id: ObjectId) -> Result<u64> {
        if let Some(obj) = self.cache.get(id) {
            return Ok(obj.size());
        }
        let offset = self.index.find_offset(id).ok_or(Error::ObjectNotFound)?;
        self.size_at_offset(offset)
    }

    /// Plaintext size of the entry at the given offset.
    ///
    /// For deltas the declared result length of the outermost delta is the
    /// object's size; only a bounded prefix of the instruction stream is
    /// inflated to read it.
    pub fn size_at_offset(&mut self, offset: u64) -> Result<u64> {
        let mut scanner = Scanner::new(&mut self.file);
        scanner.seek_from_start(offset)?;
        let header = scanner.next_object_header()?;
        if !header.kind.is_delta() {
            return Ok(header.length);
        }
        let mut prefix = Vec::new();
        scanner.next_object_limited(&mut prefix, DELTA_SIZE_PREFIX)?;
        let (_, result_size, _) = delta::delta_sizes(&prefix)?;
        Ok(result_size)
    }

    /// Reads the entry with the given id without resolving its delta chain.
    ///
    /// Deltas come back as [`PackedObject::Delta`] carrying the inflated
    /// instruction stream and the base id; anything else is read whole.
    pub fn delta_object_by_id(&mut self, id: ObjectId) -> Result<PackedObject> {
        let offset = self.index.find_offset(id).ok_or(Error::ObjectNotFound)?;
        let header = {
            let mut scanner = Scanner::new(&mut self.file);
            scanner.seek_from_start(offset)?;
            scanner.next_object_header()?
        };

        let base = match (header.kind, header.base_offset, header.base_id) {
            (ObjectType::RefDelta, _, Some(base_id)) => base_id,
            (ObjectType::OfsDelta, Some(base_offset), _) => self
                .index
                .find_hash(base_offset)
                .ok_or(Error::ObjectNotFound)?,
            _ => return self.object_at_offset(offset).map(PackedObject::Full),
        };

        let mut data = Vec::with_capacity(header.length as usize);
        let mut scanner = Scanner::new(&mut self.file);
        scanner.seek_from_start(offset)?;
        scanner.next_object_header()?;
        scanner.next_object(&mut data)?;

        Ok(PackedObject::Delta(DeltaObject {
            id,
            base,
            kind: header.kind,
            size: header.length,
            data,
        }))
    }

    /// Iterates the pack's objects in offset order, fully resolved and
    /// filtered by type. Discovering an object's type requires walking the
    /// pack, so filtering cannot be served from the index alone.
    pub fn objects(&mut self, filter: ObjectType) -> Objects<'_, F> {
        let entries = self.index.entries_by_offset().into_iter();
        Objects {
            reader: self,
            entries,
            filter,
        }
    }
}

/// Iterator over a pack's resolved objects. See [`PackReader::objects`].
pub struct Objects<'r, F: Read + Seek> {
    reader: &'r mut PackReader<F>,
    entries: std::vec::IntoIter<Entry>,
    filter: ObjectType,
}

impl<F: Read + Seek> Iterator for Objects<'_, F> {
    type Item = Result<MemoryObject>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.entries.next()?;
            match self.reader.object_at_offset(entry.offset) {
                Ok(obj) => {
                    if self.filter == ObjectType::Any || obj.object_type() == self.filter {
                        return Some(Ok(obj));
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;
    use crate::idxfile::Writer;
    use crate::parser::Parser;
    use sha1::{Digest, Sha1};
    use std::io::Cursor;

    fn deflate(data: &[u8]) -> Vec<u8> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// blob "hello\n", an OFS delta appending " world\n", and a REF delta
    /// onto the blob appending " again\n".
    fn chained_pack() -> (Vec<u8>, ObjectId) {
        let base = b"hello\n";
        let base_id = ObjectId::for_object(ObjectType::Blob, base);

        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&3u32.to_be_bytes());

        let base_offset = pack.len() as u64;
        pack.extend_from_slice(&encode::entry_header(3, base.len() as u64));
        pack.extend_from_slice(&deflate(base));

        let mut delta = encode::varint(6);
        delta.extend_from_slice(&encode::varint(13));
        delta.extend_from_slice(&[0x80 | 0x10, 6, 7]);
        delta.extend_from_slice(b" world\n");

        let ofs_offset = pack.len() as u64;
        pack.extend_from_slice(&encode::entry_header(6, delta.len() as u64));
        pack.extend_from_slice(&encode::ofs_distance(ofs_offset - base_offset));
        pack.extend_from_slice(&deflate(&delta));

        let mut ref_delta = encode::varint(6);
        ref_delta.extend_from_slice(&encode::varint(13));
        ref_delta.extend_from_slice(&[0x80 | 0x10, 6, 7]);
        ref_delta.extend_from_slice(b" again\n");

        pack.extend_from_slice(&encode::entry_header(7, ref_delta.len() as u64));
        pack.extend_from_slice(base_id.as_bytes());
        pack.extend_from_slice(&deflate(&ref_delta));

        let digest: [u8; 20] = Sha1::digest(&pack).into();
        pack.extend_from_slice(&digest);
        (pack, base_id)
    }

    fn index_for(pack: &[u8]) -> Arc<Index> {
        let mut writer = Writer::new();
        let scanner = Scanner::new(Cursor::new(pack.to_vec()));
        let parser = Parser::new(scanner, vec![&mut writer]).unwrap();
        parser.parse().unwrap();
        Arc::new(writer.into_index().unwrap())
    }

    fn reader_for(pack: Vec<u8>) -> PackReader<Cursor<Vec<u8>>> {
        let index = index_for(&pack);
        PackReader::new(index, Cursor::new(pack), Arc::new(ObjectLru::default()))
    }

    #[test]
    fn resolves_chains_by_id() {
        let (pack, base_id) = chained_pack();
        let mut reader = reader_for(pack);

        let base = reader.object_by_id(base_id).unwrap();
        assert_eq!(base.data(), b"hello\n");

        let world_id = ObjectId::for_object(ObjectType::Blob, b"hello\n world\n");
        let world = reader.object_by_id(world_id).unwrap();
        assert_eq!(world.object_type(), ObjectType::Blob);
        assert_eq!(world.data(), b"hello\n world\n");

        let again_id = ObjectId::for_object(ObjectType::Blob, b"hello\n again\n");
        let again = reader.object_by_id(again_id).unwrap();
        assert_eq!(again.data(), b"hello\n again\n");

        let missing = ObjectId::for_object(ObjectType::Blob, b"missing");
        assert!(matches!(
            reader.object_by_id(missing),
            Err(Error::ObjectNotFound)
        ));
    }

    #[test]
    fn sizes_without_materialising() {
        let (pack, base_id) = chained_pack();
        let mut reader = reader_for(pack);

        assert_eq!(reader.size_by_id(base_id).unwrap(), 6);
        let world_id = ObjectId::for_object(ObjectType::Blob, b"hello\n world\n");
        assert_eq!(reader.size_by_id(world_id).unwrap(), 13);
    }

    #[test]
    fn delta_form_read_keeps_the_delta() {
        let (pack, base_id) = chained_pack();
        let mut reader = reader_for(pack);

        let world_id = ObjectId::for_object(ObjectType::Blob, b"hello\n world\n");
        match reader.delta_object_by_id(world_id).unwrap() {
            PackedObject::Delta(delta) => {
                assert_eq!(delta.kind, ObjectType::OfsDelta);
                assert_eq!(delta.base, base_id);
                let applied = crate::delta::apply(b"hello\n", &delta.data).unwrap();
                assert_eq!(applied, b"hello\n world\n");
            }
            PackedObject::Full(_) => panic!("expected delta form"),
        }

        match reader.delta_object_by_id(base_id).unwrap() {
            PackedObject::Full(obj) => assert_eq!(obj.data(), b"hello\n"),
            PackedObject::Delta(_) => panic!("expected full object"),
        }
    }

    #[test]
    fn iterates_resolved_objects_in_offset_order() {
        let (pack, _) = chained_pack();
        let mut reader = reader_for(pack);

        let objects: Vec<MemoryObject> = reader
            .objects(ObjectType::Blob)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0].data(), b"hello\n");
        assert_eq!(objects[1].data(), b"hello\n world\n");
        assert_eq!(objects[2].data(), b"hello\n again\n");

        assert_eq!(reader.objects(ObjectType::Commit).count(), 0);
    }
}
