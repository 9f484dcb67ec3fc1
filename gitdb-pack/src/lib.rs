//! Pack formats for the gitdb object database.
//!
//! A pack is a single container holding many objects, some stored as deltas
//! against other objects in the same pack or, for thin packs, against bases
//! that live elsewhere. This crate covers both directions of working with
//! one:
//!
//! - ingest: [`Scanner`] streams the raw bytes, [`Parser`] indexes and
//!   resolves every object while driving [`Observer`]s such as the
//!   [`idxfile::Writer`] index encoder;
//! - serve: [`idxfile::Index`] maps hashes to offsets and [`PackReader`]
//!   answers point lookups through it.

#![forbid(unsafe_code)]

pub mod delta;
pub mod encode;
pub mod idxfile;

mod error;
mod parser;
mod reader;
mod scanner;

pub use error::{Error, Result};
pub use parser::{Observer, Parser};
pub use reader::{DeltaObject, Objects, PackReader, PackedObject};
pub use scanner::{Checksum, ObjectHeader, Scanner};
