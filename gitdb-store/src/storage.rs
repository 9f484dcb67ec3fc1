//! Multiplexed object storage across loose files, indexed packs, and
//! alternate object directories.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use tracing::debug;

use gitdb_core::cache::ObjectLru;
use gitdb_core::{EncodedObjectStore, Error, MemoryObject, ObjectId, ObjectType, Result};
use gitdb_pack::idxfile::Index;
use gitdb_pack::{PackReader, PackedObject};

use crate::dir::ObjectDirectory;
use crate::iter::ObjectIter;
use crate::objfile;
use crate::writer::PackWriter;

/// Tunables for an [`ObjectStorage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Retain pack file descriptors across random-access reads instead of
    /// opening one per call. Retained descriptors are closed by
    /// [`ObjectStorage::close`].
    pub keep_descriptors: bool,
}

/// Converts pack-layer errors to the storage boundary taxonomy.
pub(crate) fn map_pack_err(err: gitdb_pack::Error) -> Error {
    match err {
        gitdb_pack::Error::ObjectNotFound => Error::ObjectNotFound,
        gitdb_pack::Error::Store(inner) => inner,
        other => Error::other(other),
    }
}

/// Unified read/write API over one objects directory.
///
/// Reads probe loose objects first, then every indexed pack, then each
/// alternate directory in turn. Pack indexes are loaded lazily on first
/// use and cached until [`reindex`](ObjectStorage::reindex). Safe to share
/// across threads.
pub struct ObjectStorage {
    options: Options,
    dir: ObjectDirectory,
    cache: Arc<ObjectLru>,
    indexes: RwLock<Option<HashMap<ObjectId, Arc<Index>>>>,
    descriptors: Mutex<HashMap<ObjectId, File>>,
}

impl ObjectStorage {
    pub fn new(objects_dir: impl Into<PathBuf>) -> Self {
        Self::with_cache(objects_dir, Arc::new(ObjectLru::default()))
    }

    /// Creates a storage sharing an existing delta-base cache, e.g. with
    /// the storages of alternate directories.
    pub fn with_cache(objects_dir: impl Into<PathBuf>, cache: Arc<ObjectLru>) -> Self {
        Self::with_options(objects_dir, cache, Options::default())
    }

    pub fn with_options(
        objects_dir: impl Into<PathBuf>,
        cache: Arc<ObjectLru>,
        options: Options,
    ) -> Self {
        ObjectStorage {
            options,
            dir: ObjectDirectory::new(objects_dir),
            cache,
            indexes: RwLock::new(None),
            descriptors: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &ObjectDirectory {
        &self.dir
    }

    /// Discards cached pack indexes, forcing a reload on next access.
    /// Useful when packs changed on disk behind this storage's back.
    pub fn reindex(&self) {
        *self.indexes.write().expect("index lock") = None;
        self.descriptors.lock().expect("descriptor lock").clear();
    }

    /// Closes every retained pack descriptor.
    pub fn close(&self) {
        self.descriptors.lock().expect("descriptor lock").clear();
    }

    /// Lazily loads all pack indexes. The first caller populates the map;
    /// concurrent callers block on the lock and then observe it complete.
    fn require_indexes(&self) -> Result<()> {
        if self.indexes.read().expect("index lock").is_some() {
            return Ok(());
        }
        let mut guard = self.indexes.write().expect("index lock");
        if guard.is_some() {
            return Ok(());
        }
        let mut map = HashMap::new();
        for pack_id in self.dir.object_packs()? {
            let file = self.dir.object_pack_idx(pack_id)?;
            let index = Index::from_reader(file).map_err(map_pack_err)?;
            map.insert(pack_id, Arc::new(index));
        }
        debug!(packs = map.len(), "loaded pack indexes");
        *guard = Some(map);
        Ok(())
    }

    pub(crate) fn index_for(&self, pack_id: ObjectId) -> Result<Option<Arc<Index>>> {
        self.require_indexes()?;
        let guard = self.indexes.read().expect("index lock");
        Ok(guard.as_ref().and_then(|map| map.get(&pack_id).cloned()))
    }

    pub(crate) fn pack_ids(&self) -> Result<Vec<ObjectId>> {
        self.require_indexes()?;
        let guard = self.indexes.read().expect("index lock");
        Ok(guard
            .as_ref()
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default())
    }

    /// Registers a freshly written pack without rescanning the directory.
    pub(crate) fn register_index(&self, pack_id: ObjectId, index: Arc<Index>) -> Result<()> {
        self.require_indexes()?;
        if let Some(map) = self.indexes.write().expect("index lock").as_mut() {
            map.insert(pack_id, index);
        }
        Ok(())
    }

    /// First pack containing the id. Lookup order across packs is map
    /// iteration order; first hit wins.
    fn find_in_packs(&self, id: ObjectId) -> Result<Option<(ObjectId, u64)>> {
        self.require_indexes()?;
        let guard = self.indexes.read().expect("index lock");
        if let Some(map) = guard.as_ref() {
            for (pack_id, index) in map {
                if let Some(offset) = index.find_offset(id) {
                    return Ok(Some((*pack_id, offset)));
                }
            }
        }
        Ok(None)
    }

    /// Runs `f` with a reader over the given pack, reusing a retained
    /// descriptor when the storage is configured to keep them.
    fn with_pack_reader<T>(
        &self,
        pack_id: ObjectId,
        f: impl FnOnce(&mut PackReader<&mut File>) -> gitdb_pack::Result<T>,
    ) -> Result<T> {
        let index = self.index_for(pack_id)?.ok_or(Error::ObjectNotFound)?;
        if self.options.keep_descriptors {
            let mut descriptors = self.descriptors.lock().expect("descriptor lock");
            let mut file = match descriptors.remove(&pack_id) {
                Some(file) => file,
                None => self.dir.object_pack(pack_id)?,
            };
            let result = {
                let mut reader = PackReader::new(index, &mut file, self.cache.clone());
                f(&mut reader)
            };
            descriptors.insert(pack_id, file);
            result.map_err(map_pack_err)
        } else {
            let mut file = self.dir.object_pack(pack_id)?;
            let mut reader = PackReader::new(index, &mut file, self.cache.clone());
            f(&mut reader).map_err(map_pack_err)
        }
    }

    pub(crate) fn loose_object_by_id(&self, id: ObjectId) -> Result<MemoryObject> {
        let file = match self.dir.loose_object(id) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::ObjectNotFound),
            Err(e) => return Err(e.into()),
        };
        objfile::Reader::new(file)?.read_to_object()
    }

    fn pack_object(&self, id: ObjectId) -> Result<MemoryObject> {
        match self.find_in_packs(id)? {
            Some((pack_id, _)) => self.with_pack_reader(pack_id, |reader| reader.object_by_id(id)),
            None => Err(Error::ObjectNotFound),
        }
    }

    fn lookup(&self, kind: ObjectType, id: ObjectId, visited: &mut HashSet<PathBuf>) -> Result<MemoryObject> {
        debug!(%id, "object lookup");
        let local = match self.loose_object_by_id(id) {
            Err(e) if e.is_not_found() => self.pack_object(id),
            other => other,
        };

        let obj = match local {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                debug!(%id, "not found locally, trying alternates");
                self.lookup_in_alternates(kind, id, visited)?
            }
            Err(e) => return Err(e),
        };

        if kind != ObjectType::Any && obj.object_type() != kind {
            return Err(Error::ObjectNotFound);
        }
        Ok(obj)
    }

    /// Probes each alternate as an independent storage sharing this one's
    /// delta cache. Already-visited directories are skipped so alternate
    /// graphs with cycles stay bounded.
    fn lookup_in_alternates(
        &self,
        kind: ObjectType,
        id: ObjectId,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<MemoryObject> {
        for alt_path in self.dir.alternates().unwrap_or_default() {
            let canonical = std::fs::canonicalize(&alt_path).unwrap_or_else(|_| alt_path.clone());
            if !visited.insert(canonical) {
                continue;
            }
            let alternate = ObjectStorage::with_cache(alt_path, self.cache.clone());
            match alternate.lookup(kind, id, visited) {
                Ok(obj) => return Ok(obj),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::ObjectNotFound)
    }

    fn visited_root(&self) -> HashSet<PathBuf> {
        let mut visited = HashSet::new();
        let root = self.dir.root().to_path_buf();
        visited.insert(std::fs::canonicalize(&root).unwrap_or(root));
        visited
    }

    /// Reads the object in delta form when it is stored as a delta: the
    /// instruction stream plus its base id, for consumers that stream
    /// deltas without reconstruction.
    pub fn delta_object(&self, kind: ObjectType, id: ObjectId) -> Result<PackedObject> {
        let result = match self.loose_object_by_id(id) {
            Ok(obj) => PackedObject::Full(obj),
            Err(e) if e.is_not_found() => match self.find_in_packs(id)? {
                Some((pack_id, _)) => {
                    self.with_pack_reader(pack_id, |reader| reader.delta_object_by_id(id))?
                }
                None => return Err(Error::ObjectNotFound),
            },
            Err(e) => return Err(e),
        };

        if kind != ObjectType::Any && result.object_type() != kind {
            return Err(Error::ObjectNotFound);
        }
        Ok(result)
    }

    /// Lazily iterates every object: loose first, then each pack, skipping
    /// ids already yielded.
    pub fn iter_encoded_objects(&self, kind: ObjectType) -> Result<ObjectIter<'_>> {
        ObjectIter::new(self, kind)
    }

    /// Returns a writer that persists a raw pack stream; closing it decodes
    /// the pack, writes its index, and registers the pack with this
    /// storage.
    pub fn packfile_writer(&self) -> Result<PackWriter<'_>> {
        PackWriter::new(self)
    }

    /// Visits every loose object hash until the callback breaks.
    pub fn for_each_object_hash(
        &self,
        mut f: impl FnMut(ObjectId) -> ControlFlow<()>,
    ) -> Result<()> {
        for id in self.dir.loose_objects()? {
            if let ControlFlow::Break(()) = f(id) {
                break;
            }
        }
        Ok(())
    }

    /// Modification time of a loose object's file.
    pub fn loose_object_time(&self, id: ObjectId) -> Result<SystemTime> {
        let meta = self.dir.loose_object_stat(id).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ObjectNotFound
            } else {
                Error::Io(e)
            }
        })?;
        Ok(meta.modified()?)
    }

    pub fn delete_loose_object(&self, id: ObjectId) -> Result<()> {
        self.dir.delete_loose_object(id).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ObjectNotFound
            } else {
                Error::Io(e)
            }
        })
    }

    pub fn object_packs(&self) -> Result<Vec<ObjectId>> {
        Ok(self.dir.object_packs()?)
    }

    /// Deletes a pack (and index) older than `before`, dropping any cached
    /// index and descriptor for it.
    pub fn delete_old_object_pack_and_index(
        &self,
        pack_id: ObjectId,
        before: Option<SystemTime>,
    ) -> Result<()> {
        self.dir.delete_old_object_pack_and_index(pack_id, before)?;
        if !self.dir.object_pack_path(pack_id).exists() {
            if let Some(map) = self.indexes.write().expect("index lock").as_mut() {
                map.remove(&pack_id);
            }
            self.descriptors.lock().expect("descriptor lock").remove(&pack_id);
        }
        Ok(())
    }

    pub(crate) fn shared_cache(&self) -> Arc<ObjectLru> {
        self.cache.clone()
    }

    pub(crate) fn pack_file(&self, pack_id: ObjectId) -> io::Result<File> {
        self.dir.object_pack(pack_id)
    }
}

impl EncodedObjectStore for ObjectStorage {
    fn set_encoded_object(&self, obj: MemoryObject) -> Result<ObjectId> {
        let kind = obj.object_type();
        if kind.is_delta() {
            return Err(Error::InvalidType(kind));
        }
        self.dir.write_loose_object(kind, obj.data())
    }

    fn encoded_object(&self, kind: ObjectType, id: ObjectId) -> Result<MemoryObject> {
        let mut visited = self.visited_root();
        self.lookup(kind, id, &mut visited)
    }

    fn has_encoded_object(&self, id: ObjectId) -> Result<()> {
        match self.dir.loose_object_stat(id) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match self.find_in_packs(id)? {
            Some(_) => Ok(()),
            None => Err(Error::ObjectNotFound),
        }
    }

    fn encoded_object_size(&self, id: ObjectId) -> Result<u64> {
        match self.dir.loose_object(id) {
            Ok(file) => return Ok(objfile::Reader::new(file)?.size()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match self.find_in_packs(id)? {
            Some((pack_id, _)) => self.with_pack_reader(pack_id, |reader| reader.size_by_id(id)),
            None => Err(Error::ObjectNotFound),
        }
    }
}
