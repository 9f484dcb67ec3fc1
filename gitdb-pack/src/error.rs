//! Pack-layer errors.

use gitdb_core::ObjectId;

/// Error type for pack scanning, parsing, and index handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stream does not start with the `PACK` magic.
    #[error("malformed pack: bad signature")]
    BadSignature,
    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),
    /// A pack entry header carried a type code outside 1-4, 6, 7.
    #[error("unsupported pack entry type {0}")]
    UnsupportedObjectType(u8),
    /// The stream ended inside a header, payload, or trailer.
    #[error("unexpected end of pack stream")]
    UnexpectedEof,
    #[error("zlib inflate failed: {0}")]
    Inflate(String),
    /// The recorded trailer does not match the running hash of the stream.
    #[error("pack checksum mismatch: recorded {recorded}, computed {computed}")]
    ChecksumMismatch {
        recorded: ObjectId,
        computed: ObjectId,
    },
    /// An offset delta referenced an entry that is not in this pack.
    #[error("object not found")]
    ObjectNotFound,
    /// A thin-pack base could not be resolved from external storage.
    #[error("reference delta not found")]
    ReferenceDeltaNotFound,
    /// The parser needs either a seekable source or a storage sink.
    #[error("parser source is not seekable and no storage was provided")]
    NotSeekableSource,
    /// Internal bookkeeping failure: an inflated delta was requested after
    /// it had been dropped. Must not occur in correct use.
    #[error("delta could not be found in cache")]
    DeltaNotCached,
    #[error("delta corruption: {0}")]
    CorruptDelta(&'static str),
    /// `seek_from_start` was called on a source constructed from a plain
    /// stream.
    #[error("pack source does not support seeking")]
    SeekUnsupported,
    /// The interrupt flag was raised between objects.
    #[error("pack operation cancelled")]
    Cancelled,
    #[error("corrupt pack index: {0}")]
    CorruptIndex(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An attached storage sink failed.
    #[error(transparent)]
    Store(#[from] gitdb_core::Error),
}

/// Result alias for pack operations.
pub type Result<T> = std::result::Result<T, Error>;
