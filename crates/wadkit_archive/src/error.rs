//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// Transparent wrapper for [`glob::PatternError`]
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Transparent wrapper for [`serde_json::Error`]
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// structural validation of the input failed
    #[error("malformed archive: {0}")]
    #[diagnostic(code(wadkit::malformed))]
    MalformedInput(String),

    /// a declared size or offset points past the end of the data
    #[error("truncated archive: {needed} bytes at offset {offset} but only {available} available")]
    #[diagnostic(code(wadkit::truncated))]
    Truncated {
        /// Offset of the requested range
        offset: u64,
        /// Number of bytes requested
        needed: u64,
        /// Total number of bytes in the source
        available: u64,
    },

    /// the archive format or state does not allow this operation
    #[error("unsupported operation: {0}")]
    #[diagnostic(code(wadkit::unsupported))]
    UnsupportedOperation(String),

    /// a name is already in use and the directory forbids duplicates
    #[error("name already in use: {0}")]
    #[diagnostic(code(wadkit::name_conflict))]
    NameConflict(String),

    /// the name cannot be used for an entry
    #[error("invalid entry name {0:?}")]
    #[diagnostic(code(wadkit::invalid_name))]
    InvalidName(String),

    /// unable to find requested entry
    #[error("unable to find requested entry")]
    EntryNotFound(#[from] EntryNotFoundError),

    /// no registered format recognises the data
    #[error("data does not match any known archive format")]
    #[diagnostic(code(wadkit::unknown_format), help("try passing the format explicitly"))]
    UnknownFormat,
}

/// Error type to provide further information when an entry has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested entry")]
pub enum EntryNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by name {0}
    #[error("by name {0}")]
    Name(String),

    /// by id {0}
    #[error("by id {0}")]
    Id(u64),

    /// directory {0}
    #[error("directory {0}")]
    Dir(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;

pub(crate) fn malformed(message: impl Into<String>) -> Error {
    Error::MalformedInput(message.into())
}

pub(crate) fn unsupported(message: impl Into<String>) -> Error {
    Error::UnsupportedOperation(message.into())
}
