/// Error types for the analyzer library.
///
/// Every failure here is recoverable: a file that cannot be read or parsed
/// contributes nothing to the caches, a bad configuration input is rejected
/// before any state changes, and no error aborts an enclosing analysis.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Binary inspection
// ---------------------------------------------------------------------------

/// Failures while reading an ELF object. `Io` covers a missing or unreadable
/// file; everything else is a malformed or unsupported image.
#[derive(Debug, Error)]
pub enum ElfError {
    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an ELF object")]
    NotElf,

    #[error("truncated image while reading {0}")]
    Truncated(&'static str),

    #[error("unsupported ELF class {0}")]
    UnsupportedClass(u8),

    #[error("big-endian objects are not supported")]
    BigEndian,

    #[error("unsupported object type {0:#x}, expected ET_EXEC or ET_DYN")]
    UnsupportedType(u16),

    #[error("missing section {0}")]
    MissingSection(&'static str),
}

// ---------------------------------------------------------------------------
// Graph ingestion
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GraphReadError {
    #[error("cannot read graph file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unrecognized parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid value '{value}' for parameter '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("expected key=value, got '{0}'")]
    MalformedAssignment(String),
}
