//! Shared fixtures: byte-level pack assembly and an in-memory store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use gitdb_core::{EncodedObjectStore, MemoryObject, ObjectId, ObjectType};
use gitdb_pack::{encode, Observer, Result};

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// One entry to be placed in a built pack.
pub enum PackEntry {
    Base(ObjectType, Vec<u8>),
    /// Offset delta against the entry at the given index in the build list.
    OfsDelta { base: usize, delta: Vec<u8> },
    /// Reference delta against an arbitrary (possibly external) id.
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

/// Assembles a complete pack, returning its bytes and each entry's offset.
pub fn build_pack(entries: &[PackEntry]) -> (Vec<u8>, Vec<u64>) {
    let mut pack = Vec::new();
    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        let offset = pack.len() as u64;
        offsets.push(offset);
        match entry {
            PackEntry::Base(kind, data) => {
                let code = kind.pack_code().unwrap();
                pack.extend_from_slice(&encode::entry_header(code, data.len() as u64));
                pack.extend_from_slice(&deflate(data));
            }
            PackEntry::OfsDelta { base, delta } => {
                pack.extend_from_slice(&encode::entry_header(6, delta.len() as u64));
                pack.extend_from_slice(&encode::ofs_distance(offset - offsets[*base]));
                pack.extend_from_slice(&deflate(delta));
            }
            PackEntry::RefDelta { base, delta } => {
                pack.extend_from_slice(&encode::entry_header(7, delta.len() as u64));
                pack.extend_from_slice(base.as_bytes());
                pack.extend_from_slice(&deflate(delta));
            }
        }
    }

    let digest: [u8; 20] = Sha1::digest(&pack).into();
    pack.extend_from_slice(&digest);
    (pack, offsets)
}

/// A delta that copies the whole base and appends `insert`.
pub fn append_delta(base: &[u8], insert: &[u8]) -> Vec<u8> {
    assert!(base.len() < 0x10000 && !base.is_empty());
    assert!(insert.len() <= 127);
    let mut delta = encode::varint(base.len() as u64);
    delta.extend_from_slice(&encode::varint((base.len() + insert.len()) as u64));
    delta.push(0x80 | 0x10 | 0x20);
    delta.push((base.len() & 0xff) as u8);
    delta.push((base.len() >> 8) as u8);
    delta.push(insert.len() as u8);
    delta.extend_from_slice(insert);
    delta
}

/// Observer that records every event for later assertions.
#[derive(Default)]
pub struct Events {
    pub headers: Vec<u32>,
    pub object_headers: Vec<(ObjectType, u64, u64)>,
    pub contents: Vec<(ObjectId, u64, u32, Vec<u8>)>,
    pub footers: Vec<ObjectId>,
}

impl Observer for Events {
    fn on_header(&mut self, count: u32) -> Result<()> {
        self.headers.push(count);
        Ok(())
    }

    fn on_inflated_object_header(&mut self, kind: ObjectType, size: u64, offset: u64) -> Result<()> {
        self.object_headers.push((kind, size, offset));
        Ok(())
    }

    fn on_inflated_object_content(
        &mut self,
        id: ObjectId,
        offset: u64,
        crc32: u32,
        content: &[u8],
    ) -> Result<()> {
        self.contents.push((id, offset, crc32, content.to_vec()));
        Ok(())
    }

    fn on_footer(&mut self, checksum: ObjectId) -> Result<()> {
        self.footers.push(checksum);
        Ok(())
    }
}

/// Thread-safe in-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectId, MemoryObject>>,
}

impl MemoryStore {
    pub fn insert(&self, kind: ObjectType, data: &[u8]) -> ObjectId {
        let obj = MemoryObject::new(kind, data.to_vec());
        let id = obj.id();
        self.objects.lock().unwrap().insert(id, obj);
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<MemoryObject> {
        self.objects.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

impl EncodedObjectStore for MemoryStore {
    fn set_encoded_object(&self, obj: MemoryObject) -> gitdb_core::Result<ObjectId> {
        if obj.object_type().is_delta() {
            return Err(gitdb_core::Error::InvalidType(obj.object_type()));
        }
        let id = obj.id();
        self.objects.lock().unwrap().insert(id, obj);
        Ok(id)
    }

    fn encoded_object(&self, kind: ObjectType, id: ObjectId) -> gitdb_core::Result<MemoryObject> {
        let obj = self.get(id).ok_or(gitdb_core::Error::ObjectNotFound)?;
        if kind != ObjectType::Any && obj.object_type() != kind {
            return Err(gitdb_core::Error::ObjectNotFound);
        }
        Ok(obj)
    }

    fn has_encoded_object(&self, id: ObjectId) -> gitdb_core::Result<()> {
        self.get(id).map(|_| ()).ok_or(gitdb_core::Error::ObjectNotFound)
    }

    fn encoded_object_size(&self, id: ObjectId) -> gitdb_core::Result<u64> {
        self.get(id)
            .map(|obj| obj.size())
            .ok_or(gitdb_core::Error::ObjectNotFound)
    }
}
