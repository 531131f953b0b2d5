//! Error types for ELF introspection.
//!
//! Failures are local: a malformed table makes the lookups that depend on it
//! report "not found", and a rejected image never aborts a process snapshot.
//! Only [`ElfError::NotElf`] and [`ElfError::TruncatedHeader`] are surfaced to
//! callers constructing an image.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for elfscope operations.
#[derive(Debug, Error)]
pub enum ElfError {
    /// The first bytes of the range do not carry the ELF magic signature.
    #[error("Not an ELF image: magic mismatch")]
    NotElf,

    /// `EI_CLASS` is neither 32 nor 64 bit.
    #[error("Unsupported ELF class: {0}")]
    UnsupportedClass(u8),

    /// `EI_DATA` is neither little nor big endian.
    #[error("Unsupported ELF data encoding: {0}")]
    UnsupportedData(u8),

    /// The range is smaller than the header it must contain.
    #[error("Truncated header: needed {needed} bytes, found {found}")]
    TruncatedHeader { needed: usize, found: usize },

    /// A declared table or record extends past the bytes available for it.
    #[error("Truncated table at offset {offset:#x}: needed {needed} bytes")]
    TruncatedTable { offset: u64, needed: u64 },

    /// Header fields are inconsistent with the declared class.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// On-demand fetch of non-resident bytes from the backing file failed.
    #[error("Failed to read {len} bytes at offset {offset:#x} from {}", .path.display())]
    FileReadFailed {
        path: PathBuf,
        offset: u64,
        len: u64,
    },

    /// A memory source could not supply the requested range.
    #[error("Memory read failed at {addr:#x} ({len} bytes)")]
    MemoryReadFailed { addr: u64, len: u64 },

    /// The dynamic string table was never resolved.
    #[error("No string table")]
    NoStringTable,

    /// The dynamic symbol table was never resolved.
    #[error("No symbol table")]
    NoSymbolTable,

    /// The SysV hash table was never resolved.
    #[error("No hash table")]
    NoHashTable,

    /// A string table offset is out of range or not valid UTF-8.
    #[error("Invalid string at offset {offset:#x}")]
    InvalidString { offset: u64 },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parse/serialize errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ElfError {
    /// True for errors that only mean "the table this lookup needs is absent".
    pub fn is_missing_table(&self) -> bool {
        matches!(
            self,
            ElfError::NoStringTable | ElfError::NoSymbolTable | ElfError::NoHashTable
        )
    }
}

impl From<serde_json::Error> for ElfError {
    fn from(err: serde_json::Error) -> Self {
        ElfError::Config(err.to_string())
    }
}

/// Result type alias for elfscope operations
pub type Result<T> = std::result::Result<T, ElfError>;
