//! # On-Disk Core Files
//!
//! A memory-mapped Mach-O core reader implementing [`CoreObjectFile`].
//!
//! Core files are routinely multi-gigabyte, so the file is mapped rather than
//! read: `copy_data` is a memcpy out of the map and nothing is materialized
//! up front except the section list. The load-command walk only cares about
//! `LC_SEGMENT`/`LC_SEGMENT_64` (the memory image) and
//! `LC_THREAD`/`LC_UNIXTHREAD` (the register contexts); every other command
//! is skipped by size.
//!
//! Universal (fat) files contribute exactly one slice: the first one whose
//! header parses. Anything smarter than that is the host's problem.

use std::fs::File;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use memmap2::Mmap;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::macho::{
    RawMachHeader, FAT_MAGIC, LC_SEGMENT, LC_SEGMENT_64, LC_THREAD, LC_UNIXTHREAD, MH_CIGAM, MH_CIGAM_64, MH_CORE,
    VM_PROT_EXECUTE, VM_PROT_READ, VM_PROT_WRITE,
};
use crate::object_file::{CoreObjectFile, Permissions, Section};
use crate::types::ArchSpec;

/// Size of one `fat_arch` entry
const FAT_ARCH_ENTRY_SIZE: usize = 20;

/// A Mach-O core file on disk
pub struct MachOCoreFile
{
    path: PathBuf,
    mmap: Mmap,
    /// Offset of the chosen slice inside the map (non-zero only for fat files)
    slice_offset: usize,
    slice_len: usize,
    header: RawMachHeader,
    sections: Vec<Section>,
    num_thread_contexts: u32,
}

impl MachOCoreFile
{
    /// Map `path` and parse its load commands.
    ///
    /// Fails with [`CoreError::NotACore`] when the file is Mach-O but not an
    /// `MH_CORE`, and with [`CoreError::MalformedCore`] when the load
    /// commands overrun the file.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self>
    {
        let path = path.as_ref();
        let file = File::open(path)?;
        // Safety: the map is never written through, and the backing file is a
        // post-mortem artifact nobody else should be mutating.
        let mmap = unsafe { Mmap::map(&file)? };

        let (slice_offset, slice_len) = find_slice(&mmap)?;
        let data = &mmap[slice_offset..slice_offset + slice_len];

        let header = RawMachHeader::parse(data).ok_or_else(|| CoreError::NotACore(path.to_path_buf()))?;
        if header.filetype != MH_CORE {
            return Err(CoreError::NotACore(path.to_path_buf()));
        }

        // A reversed magic means the producer wrote opposite-endian fields;
        // the load commands follow the same byte order as the header.
        let raw_magic = LittleEndian::read_u32(&data[0..4]);
        let swapped = raw_magic == MH_CIGAM || raw_magic == MH_CIGAM_64;

        let (sections, num_thread_contexts) = if swapped {
            parse_load_commands::<BigEndian>(data, &header)?
        } else {
            parse_load_commands::<LittleEndian>(data, &header)?
        };

        debug!(
            "mapped core {} ({} sections, {} thread contexts, {} bytes)",
            path.display(),
            sections.len(),
            num_thread_contexts,
            slice_len
        );

        Ok(MachOCoreFile {
            path: path.to_path_buf(),
            mmap,
            slice_offset,
            slice_len,
            header,
            sections,
            num_thread_contexts,
        })
    }

    /// Path the core was opened from.
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// The parsed Mach-O header.
    pub fn header(&self) -> &RawMachHeader
    {
        &self.header
    }

    fn data(&self) -> &[u8]
    {
        &self.mmap[self.slice_offset..self.slice_offset + self.slice_len]
    }
}

impl CoreObjectFile for MachOCoreFile
{
    fn num_thread_contexts(&self) -> u32
    {
        self.num_thread_contexts
    }

    fn sections(&self) -> &[Section]
    {
        &self.sections
    }

    fn copy_data(&self, file_offset: u64, dst: &mut [u8]) -> usize
    {
        let data = self.data();
        if file_offset >= data.len() as u64 {
            return 0;
        }
        let start = file_offset as usize;
        let count = dst.len().min(data.len() - start);
        dst[..count].copy_from_slice(&data[start..start + count]);
        count
    }

    fn architecture(&self) -> ArchSpec
    {
        ArchSpec::from_mach_header(self.header.cputype, self.header.cpusubtype)
    }

    fn data_len(&self) -> u64
    {
        self.slice_len as u64
    }
}

/// Locate the Mach-O slice inside `data`.
///
/// Thin files are their own slice. For fat files, take the first `fat_arch`
/// entry whose payload parses as a Mach-O header.
fn find_slice(data: &[u8]) -> CoreResult<(usize, usize)>
{
    if data.len() < 8 || BigEndian::read_u32(&data[0..4]) != FAT_MAGIC {
        return Ok((0, data.len()));
    }

    let nfat_arch = BigEndian::read_u32(&data[4..8]) as usize;
    for i in 0..nfat_arch {
        let entry = 8 + i * FAT_ARCH_ENTRY_SIZE;
        if entry + FAT_ARCH_ENTRY_SIZE > data.len() {
            break;
        }
        let offset = BigEndian::read_u32(&data[entry + 8..entry + 12]) as usize;
        let size = BigEndian::read_u32(&data[entry + 12..entry + 16]) as usize;
        if offset >= data.len() {
            continue;
        }
        let len = size.min(data.len() - offset);
        if RawMachHeader::parse(&data[offset..offset + len]).is_some() {
            debug!("using fat slice {i} at offset {offset:#x} ({len} bytes)");
            return Ok((offset, len));
        }
    }

    Err(CoreError::MalformedCore(
        "fat file contains no parsable mach-o slice".to_string(),
    ))
}

/// Walk the load commands, collecting segments and counting thread contexts.
fn parse_load_commands<E: ByteOrder>(data: &[u8], header: &RawMachHeader) -> CoreResult<(Vec<Section>, u32)>
{
    let mut sections = Vec::new();
    let mut num_thread_contexts = 0u32;
    let mut offset = header.header_size();

    for i in 0..header.ncmds {
        if offset + 8 > data.len() {
            return Err(CoreError::MalformedCore(format!(
                "load command {i} starts past the end of the file"
            )));
        }
        let cmd = E::read_u32(&data[offset..offset + 4]);
        let cmdsize = E::read_u32(&data[offset + 4..offset + 8]) as usize;
        let next = offset
            .checked_add(cmdsize)
            .filter(|&end| cmdsize >= 8 && end <= data.len())
            .ok_or_else(|| CoreError::MalformedCore(format!("load command {i} has invalid size {cmdsize:#x}")))?;
        let body = &data[offset..next];

        match cmd {
            LC_SEGMENT => {
                if cmdsize < 56 {
                    return Err(CoreError::MalformedCore(format!(
                        "LC_SEGMENT command {i} is truncated ({cmdsize} bytes)"
                    )));
                }
                sections.push(read_segment_32::<E>(body));
            }
            LC_SEGMENT_64 => {
                if cmdsize < 72 {
                    return Err(CoreError::MalformedCore(format!(
                        "LC_SEGMENT_64 command {i} is truncated ({cmdsize} bytes)"
                    )));
                }
                sections.push(read_segment_64::<E>(body));
            }
            LC_THREAD | LC_UNIXTHREAD => num_thread_contexts += 1,
            _ => {}
        }

        offset = next;
    }

    Ok((sections, num_thread_contexts))
}

fn read_segment_32<E: ByteOrder>(body: &[u8]) -> Section
{
    // segname occupies bytes 8..24 and is ignored; cores name every segment
    // the same anyway.
    Section {
        vm_addr: u64::from(E::read_u32(&body[24..28])),
        vm_size: u64::from(E::read_u32(&body[28..32])),
        file_offset: u64::from(E::read_u32(&body[32..36])),
        file_size: u64::from(E::read_u32(&body[36..40])),
        permissions: permissions_from_vm_prot(E::read_u32(&body[44..48])),
    }
}

fn read_segment_64<E: ByteOrder>(body: &[u8]) -> Section
{
    Section {
        vm_addr: E::read_u64(&body[24..32]),
        vm_size: E::read_u64(&body[32..40]),
        file_offset: E::read_u64(&body[40..48]),
        file_size: E::read_u64(&body[48..56]),
        permissions: permissions_from_vm_prot(E::read_u32(&body[60..64])),
    }
}

/// Map a segment's `initprot` VM protection bits to [`Permissions`].
fn permissions_from_vm_prot(prot: u32) -> Permissions
{
    let mut permissions = Permissions::empty();
    if prot & VM_PROT_READ != 0 {
        permissions |= Permissions::READ;
    }
    if prot & VM_PROT_WRITE != 0 {
        permissions |= Permissions::WRITE;
    }
    if prot & VM_PROT_EXECUTE != 0 {
        permissions |= Permissions::EXECUTE;
    }
    permissions
}
