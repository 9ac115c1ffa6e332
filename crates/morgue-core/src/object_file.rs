//! # Object-File Seam
//!
//! The interface the backend consumes from a parsed core object file.
//!
//! The backend never parses load commands itself; it asks an object file for
//! a section list, a thread-context count, and raw byte copies at file
//! offsets. Keeping this a trait lets tests substitute an in-memory fake and
//! keeps the on-disk reader ([`crate::corefile::MachOCoreFile`]) swappable.

use bitflags::bitflags;

use crate::types::ArchSpec;

bitflags! {
    /// Memory permissions recorded for one core section
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Permissions: u32 {
        const READ    = 0b001;
        const WRITE   = 0b010;
        const EXECUTE = 0b100;
    }
}

/// Byte extent inside the core file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileRange
{
    /// Offset of the first byte, from the start of the object file's data
    pub offset: u64,
    /// Number of bytes
    pub size: u64,
}

impl FileRange
{
    /// Create a range covering `[offset, offset + size)`.
    pub fn new(offset: u64, size: u64) -> Self
    {
        FileRange { offset, size }
    }

    /// One past the last byte covered.
    pub fn end(&self) -> u64
    {
        self.offset.saturating_add(self.size)
    }

    /// Grow or shrink the range so it ends at `end`.
    pub fn set_end(&mut self, end: u64)
    {
        self.size = end.saturating_sub(self.offset);
    }
}

/// One contiguous mapping described by a load command in the core
///
/// A section pairs a VM range with the file extent holding its bytes. The VM
/// size and file size usually agree, but nothing guarantees it; a truncated
/// dump can record less file data than the VM range spans.
#[derive(Debug, Clone, Copy)]
pub struct Section
{
    /// Process virtual address the mapping starts at
    pub vm_addr: u64,
    /// Size of the mapping in the process address space
    pub vm_size: u64,
    /// File offset of the mapping's bytes
    pub file_offset: u64,
    /// Number of bytes recorded in the file
    pub file_size: u64,
    /// Recorded page permissions; may be empty when the producer didn't fill
    /// them in
    pub permissions: Permissions,
}

/// A parsed core object file, as consumed by the process backend
///
/// Implementations are expected to be cheap to query: `sections()` returns a
/// borrowed slice built once at parse time, and `copy_data` is a plain
/// memcpy out of the backing buffer.
pub trait CoreObjectFile
{
    /// Number of thread register contexts (LC_THREAD load commands) recorded
    /// in the core.
    fn num_thread_contexts(&self) -> u32;

    /// Section list in load-command order.
    fn sections(&self) -> &[Section];

    /// Copy up to `dst.len()` bytes starting at `file_offset` into `dst`.
    ///
    /// Returns the number of bytes copied, which is short only at the end of
    /// the backing data. Never fails; an out-of-range offset copies zero
    /// bytes.
    fn copy_data(&self, file_offset: u64, dst: &mut [u8]) -> usize;

    /// Architecture of the core. Core files are always single-arch.
    fn architecture(&self) -> ArchSpec;

    /// Total size of the backing data in bytes.
    fn data_len(&self) -> u64;
}
