//! Index construction driven by parse events.

use gitdb_core::{ObjectId, ObjectType};

use crate::error::{Error, Result};
use crate::parser::Observer;

use super::{Entry, Index};

/// An [`Observer`] that collects `(hash, offset, crc32)` triples during a
/// parse and turns them into an [`Index`] once the footer arrives.
#[derive(Default)]
pub struct Writer {
    entries: Vec<Entry>,
    pack_checksum: Option<ObjectId>,
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    /// Consumes the collected events. Fails if the parse never completed,
    /// i.e. no footer was observed.
    pub fn into_index(self) -> Result<Index> {
        let pack_checksum = self
            .pack_checksum
            .ok_or(Error::CorruptIndex("parse did not complete; no pack checksum"))?;
        Ok(Index::from_entries(self.entries, pack_checksum))
    }
}

impl Observer for Writer {
    fn on_header(&mut self, count: u32) -> Result<()> {
        self.entries.reserve(count as usize);
        Ok(())
    }

    fn on_inflated_object_content(
        &mut self,
        id: ObjectId,
        offset: u64,
        crc32: u32,
        _content: &[u8],
    ) -> Result<()> {
        self.entries.push(Entry { id, crc32, offset });
        Ok(())
    }

    fn on_inflated_object_header(&mut self, _: ObjectType, _: u64, _: u64) -> Result<()> {
        Ok(())
    }

    fn on_footer(&mut self, checksum: ObjectId) -> Result<()> {
        self.pack_checksum = Some(checksum);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_is_required() {
        let writer = Writer::new();
        assert!(writer.into_index().is_err());
    }

    #[test]
    fn collects_entries_in_any_order() {
        let mut writer = Writer::new();
        writer.on_header(2).unwrap();
        let a = ObjectId::for_object(ObjectType::Blob, b"a");
        let b = ObjectId::for_object(ObjectType::Blob, b"b");
        writer.on_inflated_object_content(b, 40, 2, b"b").unwrap();
        writer.on_inflated_object_content(a, 12, 1, b"a").unwrap();
        writer.on_footer(ObjectId::ZERO).unwrap();

        let index = writer.into_index().unwrap();
        assert_eq!(index.find_offset(a), Some(12));
        assert_eq!(index.find_offset(b), Some(40));
        assert_eq!(index.find_hash(40), Some(b));
    }
}
