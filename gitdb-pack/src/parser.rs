//! Two-pass pack parser.
//!
//! The first pass indexes every entry: it builds an in-memory graph linking
//! each delta to its base, records offsets, CRCs and declared lengths, and
//! hashes base objects as their payloads stream by. The second pass walks
//! the entries in index order, reconstructs every object by following its
//! delta chain, and emits observer events. Reconstructed bases are held in a
//! bounded LRU so long chains do not pin the whole pack in memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use gitdb_core::cache::BufferLru;
use gitdb_core::{EncodedObjectStore, MemoryObject, ObjectId, ObjectType};

use crate::delta;
use crate::error::{Error, Result};
use crate::scanner::Scanner;

/// Receives parse events, typically to encode a pack index.
///
/// For every parsed pack an observer sees exactly one `on_header`, then
/// exactly `count` `on_inflated_object_header`/`on_inflated_object_content`
/// pairs in index order, then exactly one `on_footer`. Returning an error
/// from any callback aborts the parse and surfaces that error unchanged.
pub trait Observer {
    fn on_header(&mut self, count: u32) -> Result<()> {
        let _ = count;
        Ok(())
    }

    fn on_inflated_object_header(&mut self, kind: ObjectType, size: u64, offset: u64) -> Result<()> {
        let _ = (kind, size, offset);
        Ok(())
    }

    fn on_inflated_object_content(
        &mut self,
        id: ObjectId,
        offset: u64,
        crc32: u32,
        content: &[u8],
    ) -> Result<()> {
        let _ = (id, offset, crc32, content);
        Ok(())
    }

    fn on_footer(&mut self, checksum: ObjectId) -> Result<()> {
        let _ = checksum;
        Ok(())
    }
}

type NodeId = usize;

/// Per-entry record in the object graph. Placeholders for thin-pack bases
/// are ordinary nodes with `external_ref` set and only the id filled in.
struct ObjectInfo {
    offset: u64,
    length: u64,
    /// Resolved type; starts as the disk type and is rewritten once the
    /// delta chain's root is known.
    kind: ObjectType,
    disk_kind: ObjectType,
    external_ref: bool,
    crc32: u32,
    parent: Option<NodeId>,
    children: SmallVec<[NodeId; 2]>,
    id: ObjectId,
}

impl ObjectInfo {
    fn base(offset: u64, length: u64, kind: ObjectType) -> Self {
        ObjectInfo {
            offset,
            length,
            kind,
            disk_kind: kind,
            external_ref: false,
            crc32: 0,
            parent: None,
            children: SmallVec::new(),
            id: ObjectId::ZERO,
        }
    }

    fn delta(offset: u64, length: u64, kind: ObjectType, parent: NodeId) -> Self {
        ObjectInfo {
            parent: Some(parent),
            ..ObjectInfo::base(offset, length, kind)
        }
    }

    fn placeholder(id: ObjectId) -> Self {
        ObjectInfo {
            external_ref: true,
            id,
            ..ObjectInfo::base(0, 0, ObjectType::Any)
        }
    }
}

/// Decodes a pack and drives the registered observers.
///
/// Sources that cannot seek are supported as long as a storage sink is
/// attached: delta payloads are retained in memory during the index pass so
/// the resolve pass never has to re-read the stream.
pub struct Parser<'a> {
    scanner: Scanner<'a>,
    storage: Option<&'a dyn EncodedObjectStore>,
    observers: Vec<&'a mut dyn Observer>,
    interrupt: Option<Arc<AtomicBool>>,
    cache: BufferLru,

    count: u32,
    nodes: Vec<ObjectInfo>,
    oi: Vec<NodeId>,
    by_offset: HashMap<u64, NodeId>,
    by_hash: HashMap<ObjectId, NodeId>,
    /// Inflated delta instruction streams by entry offset; only populated
    /// when the source is not seekable.
    deltas: HashMap<u64, Arc<Vec<u8>>>,
}

impl<'a> Parser<'a> {
    /// Creates a parser without a storage sink. The scanner source must be
    /// seekable; otherwise use [`Parser::with_storage`].
    pub fn new(scanner: Scanner<'a>, observers: Vec<&'a mut dyn Observer>) -> Result<Self> {
        Self::build(scanner, None, observers)
    }

    /// Creates a parser that persists reconstructed objects to `storage`
    /// and resolves thin-pack bases from it.
    pub fn with_storage(
        scanner: Scanner<'a>,
        storage: &'a dyn EncodedObjectStore,
        observers: Vec<&'a mut dyn Observer>,
    ) -> Result<Self> {
        Self::build(scanner, Some(storage), observers)
    }

    fn build(
        scanner: Scanner<'a>,
        storage: Option<&'a dyn EncodedObjectStore>,
        observers: Vec<&'a mut dyn Observer>,
    ) -> Result<Self> {
        if !scanner.is_seekable() && storage.is_none() {
            return Err(Error::NotSeekableSource);
        }
        Ok(Parser {
            scanner,
            storage,
            observers,
            interrupt: None,
            cache: BufferLru::default(),
            count: 0,
            nodes: Vec::new(),
            oi: Vec::new(),
            by_offset: HashMap::new(),
            by_hash: HashMap::new(),
            deltas: HashMap::new(),
        })
    }

    /// Installs a flag checked at every object boundary; raising it aborts
    /// the parse with [`Error::Cancelled`].
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Replaces the default delta-base cache, e.g. to shrink its byte
    /// budget.
    pub fn with_cache(mut self, cache: BufferLru) -> Self {
        self.cache = cache;
        self
    }

    /// Runs both passes and returns the pack checksum.
    pub fn parse(mut self) -> Result<ObjectId> {
        self.init()?;
        self.index_objects()?;

        let checksum = self.scanner.checksum()?;
        if checksum.recorded != checksum.computed {
            return Err(Error::ChecksumMismatch {
                recorded: checksum.recorded,
                computed: checksum.computed,
            });
        }
        debug!(checksum = %checksum.recorded, "pack indexed");

        self.resolve_deltas()?;
        self.on_footer(checksum.recorded)?;
        Ok(checksum.recorded)
    }

    fn init(&mut self) -> Result<()> {
        let (_, count) = self.scanner.header()?;
        self.on_header(count)?;
        self.count = count;
        self.nodes.reserve(count as usize);
        self.oi.reserve(count as usize);
        self.by_offset.reserve(count as usize);
        self.by_hash.reserve(count as usize);
        Ok(())
    }

    fn index_objects(&mut self) -> Result<()> {
        debug!(count = self.count, "indexing pack entries");
        let mut buf = Vec::new();

        for _ in 0..self.count {
            self.check_interrupt()?;
            buf.clear();

            let header = self.scanner.next_object_header()?;
            let (node_id, delta) = match (header.kind, header.base_offset, header.base_id) {
                (ObjectType::OfsDelta, Some(base_offset), _) => {
                    let parent = *self
                        .by_offset
                        .get(&base_offset)
                        .ok_or(Error::ObjectNotFound)?;
                    let node_id = self.push_node(ObjectInfo::delta(
                        header.offset,
                        header.length,
                        header.kind,
                        parent,
                    ));
                    self.nodes[parent].children.push(node_id);
                    (node_id, true)
                }
                (ObjectType::RefDelta, _, Some(base_id)) => {
                    let parent = match self.by_hash.get(&base_id) {
                        Some(&parent) => parent,
                        None => {
                            // The base is not (yet) in this pack: a thin
                            // pack. Register a placeholder to be satisfied
                            // from storage at resolve time.
                            let parent = self.push_node(ObjectInfo::placeholder(base_id));
                            self.by_hash.insert(base_id, parent);
                            parent
                        }
                    };
                    let node_id = self.push_node(ObjectInfo::delta(
                        header.offset,
                        header.length,
                        header.kind,
                        parent,
                    ));
                    self.nodes[parent].children.push(node_id);
                    (node_id, true)
                }
                (ObjectType::OfsDelta | ObjectType::RefDelta, _, _) => {
                    return Err(Error::CorruptDelta("delta entry without a base reference"));
                }
                (kind, _, _) => {
                    let node_id =
                        self.push_node(ObjectInfo::base(header.offset, header.length, kind));
                    (node_id, false)
                }
            };

            let (_, crc32) = self.scanner.next_object(&mut buf)?;
            self.nodes[node_id].crc32 = crc32;
            self.nodes[node_id].length = header.length;

            if !delta {
                let id = ObjectId::for_object(header.kind, &buf);
                self.nodes[node_id].id = id;
                self.by_hash.insert(id, node_id);

                if let Some(storage) = self.storage {
                    let mut obj = MemoryObject::new(header.kind, buf.clone());
                    obj.set_size(header.length);
                    storage.set_encoded_object(obj)?;
                }
            } else if !self.scanner.is_seekable() {
                self.deltas.insert(header.offset, Arc::new(buf.clone()));
            }

            self.by_offset.insert(header.offset, node_id);
            self.oi.push(node_id);
        }

        Ok(())
    }

    fn resolve_deltas(&mut self) -> Result<()> {
        debug!(count = self.oi.len(), "resolving deltas");

        for index in 0..self.oi.len() {
            self.check_interrupt()?;
            let node_id = self.oi[index];
            let content = self.get(node_id)?;

            let (kind, length, offset, id, crc32) = {
                let node = &self.nodes[node_id];
                (node.kind, node.length, node.offset, node.id, node.crc32)
            };
            self.on_inflated_object_header(kind, length, offset)?;
            self.on_inflated_object_content(id, offset, crc32, &content)?;

            let children: Vec<NodeId> = {
                let node = &self.nodes[node_id];
                if node.kind.is_delta() {
                    Vec::new()
                } else {
                    node.children.iter().copied().collect()
                }
            };
            if !children.is_empty() {
                for child in children {
                    self.resolve_object(child, &content)?;
                }
                // Nothing downstream can need this entry's instruction
                // stream any more.
                let node = &self.nodes[node_id];
                if node.disk_kind.is_delta() && !self.scanner.is_seekable() {
                    self.deltas.remove(&node.offset);
                }
            }
        }

        Ok(())
    }

    /// Reconstructs the content of any node, recursing through delta
    /// parents as needed.
    fn get(&mut self, node_id: NodeId) -> Result<Arc<Vec<u8>>> {
        // Placeholders have no meaningful offset; skip the cache for them.
        if !self.nodes[node_id].external_ref {
            if let Some(buf) = self.cache.get(self.nodes[node_id].offset) {
                return Ok(buf);
            }
        }

        // A miss on a non-delta node can be served by attached storage.
        // This is the only way placeholder bases resolve.
        if !self.nodes[node_id].kind.is_delta() {
            if let Some(storage) = self.storage {
                match storage.encoded_object(ObjectType::Any, self.nodes[node_id].id) {
                    Ok(obj) => {
                        self.nodes[node_id].kind = obj.object_type();
                        return Ok(Arc::new(obj.into_data()));
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if self.nodes[node_id].external_ref {
            debug!(id = %self.nodes[node_id].id, "unresolvable reference delta");
            return Err(Error::ReferenceDeltaNotFound);
        }

        let data = if self.nodes[node_id].disk_kind.is_delta() {
            let parent = self.nodes[node_id]
                .parent
                .ok_or(Error::CorruptDelta("delta entry without a base reference"))?;
            let base = self.get(parent)?;
            self.resolve_object(node_id, &base)?
        } else {
            self.read_data(node_id)?
        };

        if !self.nodes[node_id].children.is_empty() {
            self.cache.put(self.nodes[node_id].offset, data.clone());
        }
        Ok(data)
    }

    /// Applies a delta node against its base content, fixing up the node's
    /// resolved type, id and length on first reconstruction.
    fn resolve_object(&mut self, node_id: NodeId, base: &[u8]) -> Result<Arc<Vec<u8>>> {
        if !self.nodes[node_id].disk_kind.is_delta() {
            return Err(Error::CorruptDelta("resolve of a non-delta entry"));
        }

        let raw = self.read_data(node_id)?;
        let patched = delta::apply(base, &raw)?;

        if self.nodes[node_id].id.is_zero() {
            let parent = self.nodes[node_id]
                .parent
                .ok_or(Error::CorruptDelta("delta entry without a base reference"))?;
            let kind = self.nodes[parent].kind;
            self.nodes[node_id].kind = kind;
            self.nodes[node_id].length = patched.len() as u64;
            self.nodes[node_id].id = ObjectId::for_object(kind, &patched);
        }

        if let Some(storage) = self.storage {
            let mut obj = MemoryObject::new(self.nodes[node_id].kind, patched.clone());
            obj.set_size(self.nodes[node_id].length);
            storage.set_encoded_object(obj)?;
        }

        Ok(Arc::new(patched))
    }

    /// Fetches a node's raw (inflated) payload: the retained delta stream
    /// for non-seekable sources, a seek-and-reread otherwise.
    fn read_data(&mut self, node_id: NodeId) -> Result<Arc<Vec<u8>>> {
        let offset = self.nodes[node_id].offset;
        if !self.scanner.is_seekable() && self.nodes[node_id].disk_kind.is_delta() {
            return self.deltas.get(&offset).cloned().ok_or(Error::DeltaNotCached);
        }

        self.scanner.seek_from_start(offset)?;
        self.scanner.next_object_header()?;
        let mut buf = Vec::new();
        self.scanner.next_object(&mut buf)?;
        Ok(Arc::new(buf))
    }

    fn push_node(&mut self, node: ObjectInfo) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn check_interrupt(&self) -> Result<()> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn on_header(&mut self, count: u32) -> Result<()> {
        for observer in self.observers.iter_mut() {
            observer.on_header(count)?;
        }
        Ok(())
    }

    fn on_inflated_object_header(&mut self, kind: ObjectType, size: u64, offset: u64) -> Result<()> {
        for observer in self.observers.iter_mut() {
            observer.on_inflated_object_header(kind, size, offset)?;
        }
        Ok(())
    }

    fn on_inflated_object_content(
        &mut self,
        id: ObjectId,
        offset: u64,
        crc32: u32,
        content: &[u8],
    ) -> Result<()> {
        for observer in self.observers.iter_mut() {
            observer.on_inflated_object_content(id, offset, crc32, content)?;
        }
        Ok(())
    }

    fn on_footer(&mut self, checksum: ObjectId) -> Result<()> {
        for observer in self.observers.iter_mut() {
            observer.on_footer(checksum)?;
        }
        Ok(())
    }
}
