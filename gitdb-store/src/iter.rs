//! Lazy iteration over every object in a storage.

use std::collections::HashSet;
use std::fs::File;

use gitdb_core::{MemoryObject, ObjectId, ObjectType, Result};
use gitdb_pack::idxfile::Entry;
use gitdb_pack::PackReader;

use crate::storage::{map_pack_err, ObjectStorage};

/// Pull-based iterator over loose objects followed by each pack's objects.
///
/// Loose objects come first; pack objects whose hash was already yielded
/// are skipped, so an object stored both loose and packed appears once.
/// Packs are opened lazily, one at a time.
pub struct ObjectIter<'s> {
    storage: &'s ObjectStorage,
    filter: ObjectType,
    loose: std::vec::IntoIter<ObjectId>,
    packs: std::vec::IntoIter<ObjectId>,
    current: Option<PackState>,
    seen: HashSet<ObjectId>,
}

struct PackState {
    reader: PackReader<File>,
    entries: std::vec::IntoIter<Entry>,
}

impl<'s> ObjectIter<'s> {
    pub(crate) fn new(storage: &'s ObjectStorage, filter: ObjectType) -> Result<Self> {
        let loose_ids = storage.directory().loose_objects()?;
        let seen = loose_ids.iter().copied().collect();
        let packs = storage.pack_ids()?;
        Ok(ObjectIter {
            storage,
            filter,
            loose: loose_ids.into_iter(),
            packs: packs.into_iter(),
            current: None,
            seen,
        })
    }

    fn matches(&self, obj: &MemoryObject) -> bool {
        self.filter == ObjectType::Any || obj.object_type() == self.filter
    }
}

impl Iterator for ObjectIter<'_> {
    type Item = Result<MemoryObject>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.loose.next() {
            match self.storage.loose_object_by_id(id) {
                Ok(obj) => {
                    if self.matches(&obj) {
                        return Some(Ok(obj));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }

        loop {
            if let Some(state) = self.current.as_mut() {
                while let Some(entry) = state.entries.next() {
                    if self.seen.contains(&entry.id) {
                        continue;
                    }
                    match state.reader.object_at_offset(entry.offset) {
                        Ok(obj) => {
                            if self.filter == ObjectType::Any || obj.object_type() == self.filter {
                                self.seen.insert(entry.id);
                                return Some(Ok(obj));
                            }
                        }
                        Err(e) => return Some(Err(map_pack_err(e))),
                    }
                }
                self.current = None;
            }

            let pack_id = self.packs.next()?;
            let index = match self.storage.index_for(pack_id) {
                Ok(Some(index)) => index,
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            };
            let file = match self.storage.pack_file(pack_id) {
                Ok(file) => file,
                Err(e) => return Some(Err(e.into())),
            };
            let entries = index.entries_by_offset().into_iter();
            self.current = Some(PackState {
                reader: PackReader::new(index, file, self.storage.shared_cache()),
                entries,
            });
        }
    }
}
