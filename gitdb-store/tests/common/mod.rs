//! Byte-level pack assembly for storage tests.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use gitdb_core::{ObjectId, ObjectType};
use gitdb_pack::encode;

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub enum PackEntry {
    Base(ObjectType, Vec<u8>),
    OfsDelta { base: usize, delta: Vec<u8> },
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

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
