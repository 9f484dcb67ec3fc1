//! Streaming packfile scanner.
//!
//! The scanner owns positioning within a pack: it reads the header, decodes
//! per-entry type/size headers, inflates payloads while accounting for the
//! exact number of compressed bytes consumed (zlib streams signal their own
//! end, so the raw read may run ahead), keeps a per-entry CRC-32 and a
//! rolling SHA-1 of everything before the trailer, and seeks when the source
//! permits.

use std::io::{Read, Seek, SeekFrom};

use flate2::{Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};

use gitdb_core::{ObjectId, ObjectType, ID_SIZE};

use crate::error::{Error, Result};

/// Magic bytes opening every pack.
pub const SIGNATURE: [u8; 4] = *b"PACK";
/// The only supported pack version.
pub const VERSION: u32 = 2;

const READ_BUF_SIZE: usize = 32 * 1024;
const INFLATE_CHUNK: usize = 32 * 1024;

/// A decoded pack entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// As-stored type; may be a delta variant.
    pub kind: ObjectType,
    /// Absolute byte offset of the entry within the pack.
    pub offset: u64,
    /// Declared inflated payload length.
    pub length: u64,
    /// Absolute offset of the base entry, for offset deltas.
    pub base_offset: Option<u64>,
    /// Base object id, for reference deltas.
    pub base_id: Option<ObjectId>,
}

/// Recorded and recomputed trailer hashes, as returned by
/// [`Scanner::checksum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum {
    /// The 20-byte trailer as stored in the pack.
    pub recorded: ObjectId,
    /// The running SHA-1 of every byte before the trailer.
    pub computed: ObjectId,
}

trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

enum Source<'a> {
    Seekable(Box<dyn ReadSeek + 'a>),
    Stream(Box<dyn Read + 'a>),
}

impl Read for Source<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Source::Seekable(r) => r.read(buf),
            Source::Stream(r) => r.read(buf),
        }
    }
}

/// Reads a pack from a byte source.
///
/// Seekability is established at construction and immutable afterwards:
/// [`Scanner::new`] sources can be repositioned with
/// [`seek_from_start`](Scanner::seek_from_start), while
/// [`Scanner::from_stream`] sources are forward-only.
pub struct Scanner<'a> {
    src: Source<'a>,
    buf: Vec<u8>,
    pos: usize,
    cap: usize,
    offset: u64,
    sha: Sha1,
    hashing: bool,
    crc: crc32fast::Hasher,
}

impl<'a> Scanner<'a> {
    /// Creates a scanner over a seekable source.
    pub fn new(src: impl Read + Seek + 'a) -> Self {
        Self::with_source(Source::Seekable(Box::new(src)))
    }

    /// Creates a scanner over a forward-only stream.
    pub fn from_stream(src: impl Read + 'a) -> Self {
        Self::with_source(Source::Stream(Box::new(src)))
    }

    fn with_source(src: Source<'a>) -> Self {
        Scanner {
            src,
            buf: vec![0; READ_BUF_SIZE],
            pos: 0,
            cap: 0,
            offset: 0,
            sha: Sha1::new(),
            hashing: true,
            crc: crc32fast::Hasher::new(),
        }
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self.src, Source::Seekable(_))
    }

    /// Absolute offset of the next unconsumed byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the pack header, leaving the cursor at the first object entry.
    pub fn header(&mut self) -> Result<(u32, u32)> {
        let mut magic = [0u8; 4];
        self.read_exact_into(&mut magic, true)?;
        if magic != SIGNATURE {
            return Err(Error::BadSignature);
        }
        let version = self.read_u32()?;
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let count = self.read_u32()?;
        Ok((version, count))
    }

    /// Decodes the next entry header and resets the per-entry CRC-32.
    pub fn next_object_header(&mut self) -> Result<ObjectHeader> {
        self.crc = crc32fast::Hasher::new();
        let offset = self.offset;

        let mut byte = self.read_byte()?;
        let code = (byte >> 4) & 0x07;
        let mut length = u64::from(byte & 0x0f);
        let mut shift = 4;
        while byte & 0x80 != 0 {
            byte = self.read_byte()?;
            length |= u64::from(byte & 0x7f) << shift;
            shift += 7;
        }

        let kind = ObjectType::from_pack_code(code).ok_or(Error::UnsupportedObjectType(code))?;
        let mut header = ObjectHeader {
            kind,
            offset,
            length,
            base_offset: None,
            base_id: None,
        };
        match kind {
            ObjectType::OfsDelta => {
                // The base always precedes the delta, so the distance is
                // strictly positive and within the pack.
                let distance = self.read_base_distance()?;
                let base = offset
                    .checked_sub(distance)
                    .filter(|&base| base < offset)
                    .ok_or(Error::CorruptDelta("offset delta base out of range"))?;
                header.base_offset = Some(base);
            }
            ObjectType::RefDelta => {
                let mut raw = [0u8; ID_SIZE];
                self.read_exact_into(&mut raw, true)?;
                header.base_id = Some(ObjectId::from(raw));
            }
            _ => {}
        }
        Ok(header)
    }

    /// Inflates the current entry's payload, appending to `dst`.
    ///
    /// Returns the number of bytes written and the finalized CRC-32 covering
    /// the raw entry (header, base reference, compressed payload). The
    /// cursor lands on the first byte after the deflate stream.
    pub fn next_object(&mut self, dst: &mut Vec<u8>) -> Result<(u64, u32)> {
        let start_len = dst.len();
        let mut z = Decompress::new(true);
        loop {
            if dst.capacity() == dst.len() {
                dst.reserve(INFLATE_CHUNK);
            }
            self.fill()?;
            let input = &self.buf[self.pos..self.cap];
            let at_eof = input.is_empty();
            let before = z.total_in();
            let status = z
                .decompress_vec(input, dst, FlushDecompress::None)
                .map_err(|e| Error::Inflate(e.to_string()))?;
            let consumed = (z.total_in() - before) as usize;
            self.advance(consumed, true);
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if at_eof {
                        return Err(Error::UnexpectedEof);
                    }
                }
            }
        }
        let written = (dst.len() - start_len) as u64;
        Ok((written, self.crc.clone().finalize()))
    }

    /// Inflates at most `limit` bytes of the current entry's payload, then
    /// abandons the deflate stream.
    ///
    /// Used to peek at delta size headers without materialising payloads.
    /// The cursor position is unspecified afterwards; callers must seek
    /// before touching the scanner again.
    pub fn next_object_limited(&mut self, dst: &mut Vec<u8>, limit: usize) -> Result<()> {
        let mut z = Decompress::new(true);
        while dst.len() < limit {
            if dst.capacity() == dst.len() {
                dst.reserve(limit);
            }
            self.fill()?;
            let input = &self.buf[self.pos..self.cap];
            if input.is_empty() {
                return Err(Error::UnexpectedEof);
            }
            let before = z.total_in();
            let status = z
                .decompress_vec(input, dst, FlushDecompress::None)
                .map_err(|e| Error::Inflate(e.to_string()))?;
            let consumed = (z.total_in() - before) as usize;
            self.advance(consumed, false);
            if status == Status::StreamEnd {
                break;
            }
        }
        Ok(())
    }

    /// Repositions the cursor to an absolute offset.
    ///
    /// Only valid for seekable sources. Disables the rolling hash, so the
    /// trailer can no longer be verified after seeking.
    pub fn seek_from_start(&mut self, offset: u64) -> Result<u64> {
        match &mut self.src {
            Source::Seekable(f) => {
                f.seek(SeekFrom::Start(offset))?;
                self.pos = 0;
                self.cap = 0;
                self.offset = offset;
                self.hashing = false;
                Ok(offset)
            }
            Source::Stream(_) => Err(Error::SeekUnsupported),
        }
    }

    /// Reads the 20-byte trailer and returns it together with the running
    /// hash of everything that preceded it.
    pub fn checksum(&mut self) -> Result<Checksum> {
        let digest: [u8; ID_SIZE] = self.sha.clone().finalize().into();
        let computed = ObjectId::from(digest);
        let mut raw = [0u8; ID_SIZE];
        self.read_exact_into(&mut raw, false)?;
        Ok(Checksum {
            recorded: ObjectId::from(raw),
            computed,
        })
    }

    fn read_base_distance(&mut self) -> Result<u64> {
        let mut byte = self.read_byte()?;
        let mut distance = u64::from(byte & 0x7f);
        while byte & 0x80 != 0 {
            byte = self.read_byte()?;
            distance = ((distance + 1) << 7) | u64::from(byte & 0x7f);
        }
        Ok(distance)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.read_exact_into(&mut raw, true)?;
        Ok(u32::from_be_bytes(raw))
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.fill()?;
        if self.pos == self.cap {
            return Err(Error::UnexpectedEof);
        }
        let byte = self.buf[self.pos];
        self.advance(1, true);
        Ok(byte)
    }

    fn read_exact_into(&mut self, out: &mut [u8], track: bool) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            self.fill()?;
            if self.pos == self.cap {
                return Err(Error::UnexpectedEof);
            }
            let n = (self.cap - self.pos).min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.advance(n, track);
            filled += n;
        }
        Ok(())
    }

    fn advance(&mut self, n: usize, track: bool) {
        if n == 0 {
            return;
        }
        let window = &self.buf[self.pos..self.pos + n];
        if track {
            self.crc.update(window);
            if self.hashing {
                self.sha.update(window);
            }
        }
        self.pos += n;
        self.offset += n as u64;
    }

    fn fill(&mut self) -> Result<()> {
        if self.pos < self.cap {
            return Ok(());
        }
        self.pos = 0;
        self.cap = 0;
        loop {
            match self.src.read(&mut self.buf) {
                Ok(n) => {
                    self.cap = n;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
