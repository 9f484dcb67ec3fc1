//! Shared plumbing for the gitdb object database.
//!
//! This crate defines the vocabulary the pack and storage layers speak:
//! content ids ([`ObjectId`]) and the canonical framing hash, the object
//! model ([`ObjectType`], [`MemoryObject`]), the storage trait the pack
//! parser writes through ([`EncodedObjectStore`]), the bounded delta-base
//! caches, and the error type surfaced at the storage API boundary.

#![forbid(unsafe_code)]

pub mod cache;
mod error;
mod hash;
mod object;
mod storer;

pub use error::Error;
pub use hash::{Hasher, ObjectId, ID_SIZE};
pub use object::{MemoryObject, ObjectType};
pub use storer::EncodedObjectStore;

/// Result alias for operations at the storage boundary.
pub type Result<T> = std::result::Result<T, Error>;
