//! Loose-object codec.
//!
//! A loose object is the zlib compression of `"<type> <size>\0<payload>"`,
//! i.e. exactly the canonical framing that is hashed to form the object id.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use gitdb_core::{Error, Hasher, MemoryObject, ObjectId, ObjectType, Result};

const MAX_HEADER: usize = 32;

/// Streaming reader over a loose object.
///
/// The header is parsed eagerly on construction so type and size are
/// available without touching the payload.
pub struct Reader<R: Read> {
    kind: ObjectType,
    size: u64,
    z: ZlibDecoder<R>,
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R) -> Result<Self> {
        let mut z = ZlibDecoder::new(inner);

        let mut header = Vec::with_capacity(MAX_HEADER);
        let mut byte = [0u8; 1];
        loop {
            z.read_exact(&mut byte)?;
            if byte[0] == 0 {
                break;
            }
            if header.len() == MAX_HEADER {
                return Err(Error::CorruptObject("header too long"));
            }
            header.push(byte[0]);
        }

        let space = header
            .iter()
            .position(|&b| b == b' ')
            .ok_or(Error::CorruptObject("header missing separator"))?;
        let kind = ObjectType::from_name(&header[..space])
            .ok_or(Error::CorruptObject("unknown object type"))?;
        let size = std::str::from_utf8(&header[space + 1..])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::CorruptObject("malformed size"))?;

        Ok(Reader { kind, size, z })
    }

    pub fn object_type(&self) -> ObjectType {
        self.kind
    }

    /// Declared plaintext size, read from the header alone.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads the remaining payload into a complete in-memory object,
    /// verifying it matches the declared size.
    pub fn read_to_object(mut self) -> Result<MemoryObject> {
        let mut data = Vec::with_capacity(self.size as usize);
        self.z.read_to_end(&mut data)?;
        if data.len() as u64 != self.size {
            return Err(Error::CorruptObject("payload does not match declared size"));
        }
        Ok(MemoryObject::new(self.kind, data))
    }
}

impl<R: Read> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.z.read(buf)
    }
}

/// Streaming writer producing a loose object, hashing as it goes.
pub struct Writer<W: Write> {
    z: ZlibEncoder<W>,
    hasher: Hasher,
    declared: u64,
    written: u64,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W, kind: ObjectType, size: u64) -> Result<Self> {
        if !kind.is_standard() {
            return Err(Error::InvalidType(kind));
        }
        let mut z = ZlibEncoder::new(inner, Compression::default());
        write!(z, "{} {}\0", kind.name(), size)?;
        Ok(Writer {
            z,
            hasher: Hasher::new(kind, size),
            declared: size,
            written: 0,
        })
    }

    /// Finishes the compressed stream and returns the payload's id together
    /// with the underlying writer.
    pub fn finish(self) -> Result<(ObjectId, W)> {
        if self.written != self.declared {
            return Err(Error::CorruptObject("payload does not match declared size"));
        }
        let inner = self.z.finish()?;
        Ok((self.hasher.finalize(), inner))
    }
}

impl<W: Write> Write for Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.z.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.z.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let mut writer = Writer::new(Vec::new(), ObjectType::Blob, 6).unwrap();
        writer.write_all(b"hello\n").unwrap();
        let (id, encoded) = writer.finish().unwrap();
        assert_eq!(id.to_string(), "ce013625030ba8dba906f756967f9e9ca394464a");

        let reader = Reader::new(&encoded[..]).unwrap();
        assert_eq!(reader.object_type(), ObjectType::Blob);
        assert_eq!(reader.size(), 6);
        let obj = reader.read_to_object().unwrap();
        assert_eq!(obj.data(), b"hello\n");
        assert_eq!(obj.id(), id);
    }

    #[test]
    fn header_is_available_without_the_payload() {
        let mut writer = Writer::new(Vec::new(), ObjectType::Tree, 0).unwrap();
        writer.write_all(b"").unwrap();
        let (_, encoded) = writer.finish().unwrap();

        let reader = Reader::new(&encoded[..]).unwrap();
        assert_eq!(reader.object_type(), ObjectType::Tree);
        assert_eq!(reader.size(), 0);
    }

    #[test]
    fn short_write_is_rejected() {
        let mut writer = Writer::new(Vec::new(), ObjectType::Blob, 10).unwrap();
        writer.write_all(b"short").unwrap();
        assert!(matches!(
            writer.finish(),
            Err(Error::CorruptObject(_))
        ));
    }

    #[test]
    fn delta_types_cannot_be_loose() {
        assert!(matches!(
            Writer::new(Vec::new(), ObjectType::OfsDelta, 0),
            Err(Error::InvalidType(ObjectType::OfsDelta))
        ));
    }

    #[test]
    fn corrupt_headers_are_rejected() {
        fn compress(data: &[u8]) -> Vec<u8> {
            let mut z = ZlibEncoder::new(Vec::new(), Compression::default());
            z.write_all(data).unwrap();
            z.finish().unwrap()
        }

        assert!(matches!(
            Reader::new(&compress(b"blob6\0hello\n")[..]),
            Err(Error::CorruptObject("header missing separator"))
        ));
        assert!(matches!(
            Reader::new(&compress(b"sock 6\0hello\n")[..]),
            Err(Error::CorruptObject("unknown object type"))
        ));
        assert!(matches!(
            Reader::new(&compress(b"blob x\0hello\n")[..]),
            Err(Error::CorruptObject("malformed size"))
        ));
    }

    #[test]
    fn size_mismatch_on_read_is_rejected() {
        let mut z = ZlibEncoder::new(Vec::new(), Compression::default());
        z.write_all(b"blob 3\0hello\n").unwrap();
        let encoded = z.finish().unwrap();
        assert!(matches!(
            Reader::new(&encoded[..]).unwrap().read_to_object(),
            Err(Error::CorruptObject("payload does not match declared size"))
        ));
    }
}
