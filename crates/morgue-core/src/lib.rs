//! # morgue-core
//!
//! Post-mortem Mach-O core file inspection for Morgue.
//!
//! This crate makes a core file on disk look like a live, stopped process:
//! it recognizes core files by their header, indexes the captured address
//! space, locates the embedded dynamic linker or kernel image, synthesizes a
//! thread list from the recorded register contexts, and answers memory-read
//! and memory-region queries against the sparse, non-contiguous address
//! space the core describes.
//!
//! What it deliberately does not do: write to core memory, resume the
//! process (it's dead), or symbolicate; those belong to other layers of the
//! debugger.
//!
//! ## Why unsafe code is needed
//!
//! Core files are routinely multi-gigabyte, so [`corefile::MachOCoreFile`]
//! memory-maps the file instead of reading it, and creating a map is an
//! `unsafe` operation. The map is never written through and everything else
//! in the crate is safe code over byte slices.

#![allow(unsafe_code)] // Required for memory-mapping core files (memmap2)

pub mod config;
pub mod corefile;
pub mod error;
pub mod macho;
pub mod object_file;
pub mod plugin;
pub mod prelude;
pub mod process;
pub mod range_map;
pub mod types;

/// Sentinel address meaning "unknown" or "not found"
///
/// No real mapping ends at the top of the address space, so `u64::MAX` is
/// safe to use as the invalid marker everywhere an address is optional.
pub const INVALID_ADDRESS: u64 = u64::MAX;

// Re-export commonly used types
pub use config::{CoreSettings, CorefilePreference};
pub use corefile::MachOCoreFile;
pub use error::{CoreError, CoreResult};
pub use process::{CoreProcess, ProcessState};
