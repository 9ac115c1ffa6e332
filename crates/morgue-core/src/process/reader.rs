//! Sparse memory reads against the segment index.
//!
//! Segments are not always contiguous in Mach-O core files. Cores exist with
//! segment tables like:
//!
//! ```text
//!            Address    Size       File off   File size
//!            ---------- ---------- ---------- ----------
//! LC_SEGMENT 0x000f6000 0x00001000 0x1d509ee8 0x00001000
//! LC_SEGMENT 0x0f600000 0x00100000 0x1d50aee8 0x00100000
//! LC_SEGMENT 0x000f7000 0x00001000 0x1d60aee8 0x00001000
//! ```
//!
//! A 32-byte read at `0xf6ff0` would come back 16 bytes short unless the read
//! loops across entries that are consecutive in the address space but
//! scattered in file order. Success is measured in bytes returned, never in
//! whether the request was fully satisfied: crossing into an unmapped gap (or
//! running out of file data) ends the read with a short count, and only a
//! read whose *first* byte is unmapped is an error.

use crate::error::{CoreError, CoreResult};
use crate::object_file::CoreObjectFile;
use crate::process::VmRangeToFileOffset;

/// Read up to `buf.len()` bytes of core memory starting at `addr`.
pub(crate) fn read_core_memory(
    objfile: &dyn CoreObjectFile,
    segment_ranges: &VmRangeToFileOffset,
    addr: u64,
    buf: &mut [u8],
) -> CoreResult<usize>
{
    let mut bytes_read = 0usize;

    while bytes_read < buf.len() {
        let curr_addr = addr.wrapping_add(bytes_read as u64);
        let Some(entry) = segment_ranges.find_entry_that_contains(curr_addr) else {
            if bytes_read == 0 {
                return Err(CoreError::UnmappedRead(curr_addr));
            }
            break;
        };

        let offset_in_entry = curr_addr - entry.base;
        let bytes_left = entry.end() - curr_addr;
        let bytes_to_read = ((buf.len() - bytes_read) as u64).min(bytes_left) as usize;
        let copied = objfile.copy_data(
            entry.data.offset + offset_in_entry,
            &mut buf[bytes_read..bytes_read + bytes_to_read],
        );
        if copied == 0 {
            break;
        }
        bytes_read += copied;
    }

    Ok(bytes_read)
}
