//! The storage trait the pack parser reads and writes through.

use crate::hash::ObjectId;
use crate::object::{MemoryObject, ObjectType};
use crate::Result;

/// Read/write access to an encoded-object store.
///
/// The pack parser uses this to persist reconstructed objects as it goes and
/// to fetch external bases when resolving thin packs. Implementations must
/// be safe to call from multiple threads.
pub trait EncodedObjectStore: Send + Sync {
    /// Returns an empty in-memory object ready to be filled in.
    fn new_encoded_object(&self) -> MemoryObject {
        MemoryObject::default()
    }

    /// Persists an object and returns its id. Delta variants are rejected
    /// with [`Error::InvalidType`](crate::Error::InvalidType).
    fn set_encoded_object(&self, obj: MemoryObject) -> Result<ObjectId>;

    /// Full read of the object with the given id. A `kind` other than
    /// [`ObjectType::Any`] acts as a filter: a resolved object of a
    /// different type reports [`Error::ObjectNotFound`](crate::Error::ObjectNotFound).
    fn encoded_object(&self, kind: ObjectType, id: ObjectId) -> Result<MemoryObject>;

    /// Succeeds iff the object exists; never reads the payload.
    fn has_encoded_object(&self, id: ObjectId) -> Result<()>;

    /// Plaintext size of the object, without materialising its payload.
    fn encoded_object_size(&self, id: ObjectId) -> Result<u64>;
}
