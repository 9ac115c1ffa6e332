//! # Error Types
//!
//! Error handling for the core-file backend.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages. Every way loading or querying a core file can fail
//! is a distinct variant, so hosts can match on the condition instead of
//! string-comparing messages.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for core-file operations
///
/// ## Error Categories
///
/// 1. **Load errors**: InvalidCoreModule, InvalidCoreObjectFile,
///    NoThreadContexts, NoSections; each aborts `load()`.
/// 2. **Query errors**: UnmappedRead (a read where not even the first byte
///    is mapped), InvalidRegionAddress (a region query past the last
///    recorded range).
/// 3. **File errors**: NotACore, MalformedCore, Io; opening or parsing the
///    file on disk went wrong.
///
/// Note that short reads are *not* errors: a read that crosses into an
/// unmapped gap returns the bytes it could serve and stops.
#[derive(Error, Debug)]
pub enum CoreError
{
    /// No module was ever produced for the core file
    ///
    /// The candidate was constructed but nothing attached an object file to
    /// it before `load()` ran.
    #[error("invalid core module")]
    InvalidCoreModule,

    /// The object file exists but has no backing data
    #[error("invalid core object file")]
    InvalidCoreObjectFile,

    /// The core records no thread register contexts
    ///
    /// Without at least one LC_THREAD there is no stopped thread to present,
    /// so the core is useless to a debugger.
    #[error("core file doesn't contain any LC_THREAD load commands, or the LC_THREAD architecture is not supported")]
    NoThreadContexts,

    /// The core's section list is empty or absent
    #[error("core file has no sections")]
    NoSections,

    /// A memory read where not even the first byte was mapped
    ///
    /// Reads that serve at least one byte never produce this; they return a
    /// short count instead.
    #[error("core file does not contain 0x{0:x}")]
    UnmappedRead(u64),

    /// A region query past the last recorded permission range
    #[error("invalid address")]
    InvalidRegionAddress,

    /// The file is not a Mach-O core
    ///
    /// `detect()` rejects these silently (the plugin registry just moves on
    /// to the next handler); this variant is for callers that open a path
    /// directly and want to know why it was refused.
    #[error("{} is not a mach-o core file", .0.display())]
    NotACore(PathBuf),

    /// The file claims to be Mach-O but its load commands don't add up
    #[error("malformed mach-o: {0}")]
    MalformedCore(String),

    /// I/O error reading the core file from disk
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for `Result<T, CoreError>`
pub type CoreResult<T> = std::result::Result<T, CoreError>;
