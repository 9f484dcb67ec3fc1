//! Pack ingestion: persist a raw pack stream and index it.

use std::io::{self, Seek, SeekFrom, Write};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::debug;

use gitdb_core::{Error, ObjectId, Result};
use gitdb_pack::{idxfile, Parser, Scanner};

use crate::storage::{map_pack_err, ObjectStorage};

/// Consumes a raw pack stream and persists it into the storage's pack
/// directory.
///
/// Bytes are spooled to a temporary file. [`close`](PackWriter::close)
/// decodes the pack to build its index, renames pack and index into place
/// under the pack checksum, and registers the pack with the storage.
/// Dropping the writer without closing discards the partial pack.
pub struct PackWriter<'s> {
    storage: &'s ObjectStorage,
    tmp: NamedTempFile,
}

impl<'s> PackWriter<'s> {
    pub(crate) fn new(storage: &'s ObjectStorage) -> Result<Self> {
        let pack_dir = storage.directory().pack_dir();
        std::fs::create_dir_all(&pack_dir)?;
        Ok(PackWriter {
            storage,
            tmp: NamedTempFile::new_in(pack_dir)?,
        })
    }

    /// Finishes the pack: index it, move it into place, register it.
    pub fn close(self) -> Result<ObjectId> {
        let PackWriter { storage, mut tmp } = self;
        tmp.as_file_mut().seek(SeekFrom::Start(0))?;

        let mut index_writer = idxfile::Writer::new();
        let scanner = Scanner::new(tmp.as_file_mut());
        let parser = Parser::new(scanner, vec![&mut index_writer]).map_err(map_pack_err)?;
        let checksum = parser.parse().map_err(map_pack_err)?;
        let index = index_writer.into_index().map_err(map_pack_err)?;

        tmp.as_file().sync_all()?;
        let pack_path = storage.directory().object_pack_path(checksum);
        tmp.persist(pack_path).map_err(|e| Error::Io(e.error))?;

        let pack_dir = storage.directory().pack_dir();
        let mut idx_tmp = NamedTempFile::new_in(pack_dir)?;
        index.encode(idx_tmp.as_file_mut()).map_err(map_pack_err)?;
        idx_tmp.as_file().sync_all()?;
        let idx_path = storage.directory().object_pack_idx_path(checksum);
        idx_tmp.persist(idx_path).map_err(|e| Error::Io(e.error))?;

        debug!(pack = %checksum, objects = index.count(), "pack ingested");
        storage.register_index(checksum, Arc::new(index))?;
        Ok(checksum)
    }
}

impl Write for PackWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}
