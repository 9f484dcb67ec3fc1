//! Errors surfaced at the storage API boundary.

use crate::object::ObjectType;

/// Error type for object storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested object does not exist in any consulted source.
    #[error("object not found")]
    ObjectNotFound,
    /// An operation received an object type it cannot accept, e.g. writing
    /// a delta variant as a loose object.
    #[error("invalid object type: {0}")]
    InvalidType(ObjectType),
    /// A byte slice or hex string did not form a valid object id.
    #[error("invalid object id")]
    InvalidId,
    /// A stored object failed structural checks while being read.
    #[error("corrupt object: {0}")]
    CorruptObject(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A lower layer failed; the boxed error carries the detail.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wraps a lower-layer error without losing its message or source chain.
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Other(Box::new(err))
    }

    /// True when the error means "keep probing other sources".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound)
    }
}
