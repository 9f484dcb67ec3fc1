//! Object-directory layout.
//!
//! Knows where things live under an objects directory and nothing about
//! their contents: loose objects at `<aa>/<38-hex>`, packs and indexes under
//! `pack/`, alternates listed one path per line in `info/alternates`.

use std::fs::{self, File, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;

use gitdb_core::{Error, ObjectId, ObjectType, Result};

use crate::objfile;

/// Filesystem layout of one objects directory.
#[derive(Debug, Clone)]
pub struct ObjectDirectory {
    root: PathBuf,
}

impl ObjectDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ObjectDirectory { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the loose object with the given id.
    pub fn object_path(&self, id: ObjectId) -> PathBuf {
        let hex = id.to_string();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    pub fn loose_object(&self, id: ObjectId) -> io::Result<File> {
        File::open(self.object_path(id))
    }

    pub fn loose_object_stat(&self, id: ObjectId) -> io::Result<Metadata> {
        fs::metadata(self.object_path(id))
    }

    pub fn delete_loose_object(&self, id: ObjectId) -> io::Result<()> {
        fs::remove_file(self.object_path(id))
    }

    /// Enumerates every loose object id by walking the two-hex fan
    /// directories.
    pub fn loose_objects(&self) -> io::Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let prefix = entry.file_name();
            let Some(prefix) = prefix.to_str() else { continue };
            if prefix.len() != 2 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let rest = file.file_name();
                let Some(rest) = rest.to_str() else { continue };
                if let Ok(id) = ObjectId::from_hex(&format!("{prefix}{rest}")) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Writes a loose object atomically: temp file, fsync, rename. Readers
    /// never observe a partial object.
    pub fn write_loose_object(&self, kind: ObjectType, data: &[u8]) -> Result<ObjectId> {
        fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;

        let mut writer = objfile::Writer::new(tmp.as_file_mut(), kind, data.len() as u64)?;
        writer.write_all(data)?;
        let (id, _) = writer.finish()?;

        tmp.as_file().sync_all()?;
        let path = self.object_path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(id)
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.root.join("pack")
    }

    /// Ids of every pack in the pack directory, taken from `pack-<hex>.pack`
    /// file names.
    pub fn object_packs(&self) -> io::Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(self.pack_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(hex) = name
                .strip_prefix("pack-")
                .and_then(|rest| rest.strip_suffix(".pack"))
            else {
                continue;
            };
            if let Ok(id) = ObjectId::from_hex(hex) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub fn object_pack_path(&self, id: ObjectId) -> PathBuf {
        self.pack_dir().join(format!("pack-{id}.pack"))
    }

    pub fn object_pack_idx_path(&self, id: ObjectId) -> PathBuf {
        self.pack_dir().join(format!("pack-{id}.idx"))
    }

    pub fn object_pack(&self, id: ObjectId) -> io::Result<File> {
        File::open(self.object_pack_path(id))
    }

    pub fn object_pack_idx(&self, id: ObjectId) -> io::Result<File> {
        File::open(self.object_pack_idx_path(id))
    }

    /// Deletes a pack and its index, but only when the pack's mtime is
    /// older than `before`. `None` deletes unconditionally.
    pub fn delete_old_object_pack_and_index(
        &self,
        id: ObjectId,
        before: Option<SystemTime>,
    ) -> io::Result<()> {
        let pack_path = self.object_pack_path(id);
        if let Some(before) = before {
            let modified = fs::metadata(&pack_path)?.modified()?;
            if modified >= before {
                return Ok(());
            }
        }
        fs::remove_file(pack_path)?;
        match fs::remove_file(self.object_pack_idx_path(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Object directories listed in `info/alternates`, one per line.
    /// Relative paths are resolved against this directory.
    pub fn alternates(&self) -> io::Result<Vec<PathBuf>> {
        let path = self.root.join("info").join("alternates");
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let path = PathBuf::from(line);
                if path.is_absolute() {
                    path
                } else {
                    self.root.join(path)
                }
            })
            .collect())
    }
}
