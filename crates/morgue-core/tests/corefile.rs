//! Tests for the memory-mapped core reader and on-disk detection.
//!
//! Each test synthesizes a minimal Mach-O core in a temp directory (header,
//! segment load commands, thread contexts, payload) and drives the real
//! open/detect/load path against it.

use std::path::PathBuf;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use morgue_core::macho::{
    CPU_TYPE_X86_64, FAT_MAGIC, LC_SEGMENT, LC_SEGMENT_64, LC_THREAD, MH_CORE, MH_DYLINKER, MH_EXECUTE, MH_MAGIC,
    MH_MAGIC_64,
};
use morgue_core::prelude::*;
use tempfile::TempDir;

/// Builds a little-endian 64-bit Mach-O core file.
struct CoreBuilder
{
    /// (vm_addr, payload, initprot) per segment
    segments: Vec<(u64, Vec<u8>, u32)>,
    thread_count: u32,
    filetype: u32,
}

impl CoreBuilder
{
    fn new() -> Self
    {
        CoreBuilder {
            segments: Vec::new(),
            thread_count: 1,
            filetype: MH_CORE,
        }
    }

    fn segment(mut self, vm_addr: u64, payload: Vec<u8>, initprot: u32) -> Self
    {
        self.segments.push((vm_addr, payload, initprot));
        self
    }

    fn threads(mut self, thread_count: u32) -> Self
    {
        self.thread_count = thread_count;
        self
    }

    fn filetype(mut self, filetype: u32) -> Self
    {
        self.filetype = filetype;
        self
    }

    fn build(self) -> Vec<u8>
    {
        const SEGMENT_CMD_SIZE: u32 = 72;
        const THREAD_CMD_SIZE: u32 = 16;

        let sizeofcmds = self.segments.len() as u32 * SEGMENT_CMD_SIZE + self.thread_count * THREAD_CMD_SIZE;
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(MH_MAGIC_64).unwrap();
        buf.write_u32::<LittleEndian>(CPU_TYPE_X86_64).unwrap();
        buf.write_u32::<LittleEndian>(3).unwrap();
        buf.write_u32::<LittleEndian>(self.filetype).unwrap();
        buf.write_u32::<LittleEndian>(self.segments.len() as u32 + self.thread_count).unwrap();
        buf.write_u32::<LittleEndian>(sizeofcmds).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap(); // reserved

        let mut file_offset = 32 + sizeofcmds as u64;
        for (vm_addr, payload, initprot) in &self.segments {
            buf.write_u32::<LittleEndian>(LC_SEGMENT_64).unwrap();
            buf.write_u32::<LittleEndian>(SEGMENT_CMD_SIZE).unwrap();
            buf.extend_from_slice(&[0u8; 16]); // segname
            buf.write_u64::<LittleEndian>(*vm_addr).unwrap();
            buf.write_u64::<LittleEndian>(payload.len() as u64).unwrap();
            buf.write_u64::<LittleEndian>(file_offset).unwrap();
            buf.write_u64::<LittleEndian>(payload.len() as u64).unwrap();
            buf.write_u32::<LittleEndian>(0x7).unwrap(); // maxprot
            buf.write_u32::<LittleEndian>(*initprot).unwrap();
            buf.write_u32::<LittleEndian>(0).unwrap(); // nsects
            buf.write_u32::<LittleEndian>(0).unwrap(); // flags
            file_offset += payload.len() as u64;
        }
        for _ in 0..self.thread_count {
            buf.write_u32::<LittleEndian>(LC_THREAD).unwrap();
            buf.write_u32::<LittleEndian>(THREAD_CMD_SIZE).unwrap();
            buf.write_u32::<LittleEndian>(4).unwrap(); // flavor
            buf.write_u32::<LittleEndian>(0).unwrap(); // count
        }
        for (_, payload, _) in &self.segments {
            buf.extend_from_slice(payload);
        }
        buf
    }
}

fn write_core(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf
{
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn patterned(len: usize, seed: u8) -> Vec<u8>
{
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// A page whose first bytes are a little-endian 64-bit Mach-O header.
fn header_page(filetype: u32, flags: u32) -> Vec<u8>
{
    let mut page = vec![0u8; 0x1000];
    let mut cursor = &mut page[..];
    cursor.write_u32::<LittleEndian>(MH_MAGIC_64).unwrap();
    cursor.write_u32::<LittleEndian>(CPU_TYPE_X86_64).unwrap();
    cursor.write_u32::<LittleEndian>(3).unwrap();
    cursor.write_u32::<LittleEndian>(filetype).unwrap();
    cursor.write_u32::<LittleEndian>(0).unwrap();
    cursor.write_u32::<LittleEndian>(0).unwrap();
    cursor.write_u32::<LittleEndian>(0).unwrap();
    page
}

#[test]
fn test_detect_accepts_cores_and_rejects_everything_else()
{
    let dir = TempDir::new().unwrap();

    let core = write_core(&dir, "good.core", &CoreBuilder::new().segment(0x1000, patterned(0x100, 0), 0x1).build());
    let header = CoreProcess::detect(&core).unwrap();
    assert_eq!(header.filetype, MH_CORE);
    assert!(header.is_64_bit());

    // Mach-O but not a core.
    let exe = write_core(
        &dir,
        "app",
        &CoreBuilder::new().segment(0x1000, patterned(0x100, 0), 0x1).filetype(MH_EXECUTE).build(),
    );
    assert!(CoreProcess::detect(&exe).is_none());

    // Not Mach-O at all.
    let elf = write_core(&dir, "elf", b"\x7fELF\x02\x01\x01\x00________________________________");
    assert!(CoreProcess::detect(&elf).is_none());

    // Shorter than the 64-bit header: the read must yield exactly 32 bytes.
    let stub = write_core(&dir, "stub", &[0xcf, 0xfa, 0xed, 0xfe, 0x00, 0x00]);
    assert!(CoreProcess::detect(&stub).is_none());

    assert!(CoreProcess::detect(&dir.path().join("missing.core")).is_none());
}

#[test]
fn test_corefile_parses_segments_and_thread_contexts()
{
    let dir = TempDir::new().unwrap();
    let path = write_core(
        &dir,
        "two-seg.core",
        &CoreBuilder::new()
            .segment(0x1000, patterned(0x200, 0x10), 0x5)
            .segment(0x4000, patterned(0x100, 0x20), 0x3)
            .threads(2)
            .build(),
    );

    let corefile = MachOCoreFile::open(&path).unwrap();
    assert_eq!(corefile.num_thread_contexts(), 2);
    assert_eq!(corefile.architecture().triple(), "x86_64-apple-macosx");
    assert_eq!(corefile.data_len(), std::fs::metadata(&path).unwrap().len());

    let sections = corefile.sections();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].vm_addr, 0x1000);
    assert_eq!(sections[0].vm_size, 0x200);
    assert_eq!(sections[0].permissions, Permissions::READ | Permissions::EXECUTE);
    assert_eq!(sections[1].vm_addr, 0x4000);
    assert_eq!(sections[1].permissions, Permissions::READ | Permissions::WRITE);

    // copy_data serves the payload recorded at the segment's file offset.
    let mut buf = [0u8; 4];
    assert_eq!(corefile.copy_data(sections[1].file_offset, &mut buf), 4);
    assert_eq!(buf, [0x20, 0x21, 0x22, 0x23]);

    // Past the end of the file: zero bytes, not an error.
    assert_eq!(corefile.copy_data(corefile.data_len() + 8, &mut buf), 0);
}

#[test]
fn test_end_to_end_open_load_and_read()
{
    let dir = TempDir::new().unwrap();
    let data = patterned(0x1000, 0x42);
    let path = write_core(
        &dir,
        "e2e.core",
        &CoreBuilder::new()
            .segment(0x10_0000, data.clone(), 0x3)
            .segment(0x7fff_0000, header_page(MH_DYLINKER, 0), 0x5)
            .build(),
    );

    let mut process = CoreProcess::open(&path, CoreSettings::default()).unwrap().unwrap();
    assert_eq!(process.state(), ProcessState::Candidate);
    process.load(None).unwrap();

    assert_eq!(process.threads().len(), 1);
    assert_eq!(process.architecture().unwrap().triple(), "x86_64-apple-macosx");

    // Reads come straight off the mapped file.
    let mut buf = [0u8; 16];
    assert_eq!(process.read_memory(0x10_0040, &mut buf).unwrap(), 16);
    assert_eq!(&buf, &data[0x40..0x50]);

    // The dyld image embedded in the second segment was discovered.
    assert_eq!(process.discovered_images().dyld_addr, 0x7fff_0000);
    assert_eq!(process.dynamic_loader_plugin_name(), DYLD_MACOSX_PLUGIN_NAME);

    // Region walk sees the two mappings and the gap between them.
    let first = process.memory_region_info(0x10_0000).unwrap();
    assert!(first.readable && first.writable && !first.executable);
    let gap = process.memory_region_info(first.end).unwrap();
    assert!(!gap.is_mapped());
    assert_eq!(gap.end, 0x7fff_0000);
}

#[test]
fn test_32_bit_core_parses()
{
    let dir = TempDir::new().unwrap();

    // Hand-rolled 32-bit core: 28-byte header, one LC_SEGMENT, one LC_THREAD.
    let payload = patterned(0x80, 0x7);
    let sizeofcmds: u32 = 56 + 16;
    let data_start = 28 + sizeofcmds;
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(MH_MAGIC).unwrap();
    buf.write_u32::<LittleEndian>(7).unwrap(); // CPU_TYPE_X86
    buf.write_u32::<LittleEndian>(3).unwrap();
    buf.write_u32::<LittleEndian>(MH_CORE).unwrap();
    buf.write_u32::<LittleEndian>(2).unwrap();
    buf.write_u32::<LittleEndian>(sizeofcmds).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap();
    buf.write_u32::<LittleEndian>(LC_SEGMENT).unwrap();
    buf.write_u32::<LittleEndian>(56).unwrap();
    buf.extend_from_slice(&[0u8; 16]);
    buf.write_u32::<LittleEndian>(0x0008_0000).unwrap(); // vmaddr
    buf.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    buf.write_u32::<LittleEndian>(data_start).unwrap();
    buf.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    buf.write_u32::<LittleEndian>(0x7).unwrap();
    buf.write_u32::<LittleEndian>(0x1).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap();
    buf.write_u32::<LittleEndian>(LC_THREAD).unwrap();
    buf.write_u32::<LittleEndian>(16).unwrap();
    buf.write_u32::<LittleEndian>(1).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap();
    buf.extend_from_slice(&payload);

    let path = write_core(&dir, "old.core", &buf);
    let corefile = MachOCoreFile::open(&path).unwrap();
    assert!(!corefile.header().is_64_bit());
    assert_eq!(corefile.sections().len(), 1);
    assert_eq!(corefile.sections()[0].vm_addr, 0x0008_0000);
    assert_eq!(corefile.sections()[0].file_offset, u64::from(data_start));
    assert_eq!(corefile.num_thread_contexts(), 1);
    assert_eq!(corefile.architecture().core(), ArchCore::X86_32_i386);
}

#[test]
fn test_fat_file_contributes_one_slice()
{
    let dir = TempDir::new().unwrap();
    let core = CoreBuilder::new().segment(0x1000, patterned(0x100, 0x9), 0x1).build();

    let mut buf = Vec::new();
    buf.write_u32::<BigEndian>(FAT_MAGIC).unwrap();
    buf.write_u32::<BigEndian>(1).unwrap();
    buf.write_u32::<BigEndian>(CPU_TYPE_X86_64).unwrap();
    buf.write_u32::<BigEndian>(3).unwrap();
    buf.write_u32::<BigEndian>(0x1000).unwrap(); // slice offset
    buf.write_u32::<BigEndian>(core.len() as u32).unwrap();
    buf.write_u32::<BigEndian>(12).unwrap(); // align
    buf.resize(0x1000, 0);
    buf.extend_from_slice(&core);

    let path = write_core(&dir, "fat.core", &buf);
    let corefile = MachOCoreFile::open(&path).unwrap();
    assert_eq!(corefile.sections().len(), 1);
    assert_eq!(corefile.data_len(), core.len() as u64);

    // The segment's file offsets are slice-relative; reads must still work.
    let mut first = [0u8; 1];
    assert_eq!(corefile.copy_data(corefile.sections()[0].file_offset, &mut first), 1);
    assert_eq!(first[0], 0x9);
}

#[test]
fn test_truncated_load_commands_are_malformed()
{
    let dir = TempDir::new().unwrap();
    let mut bytes = CoreBuilder::new().segment(0x1000, patterned(0x100, 0), 0x1).build();
    bytes.truncate(40); // header survives, the segment command does not
    let path = write_core(&dir, "short.core", &bytes);

    match MachOCoreFile::open(&path) {
        Err(CoreError::MalformedCore(_)) => {}
        other => panic!("expected MalformedCore, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_plugin_registry_dispatches_to_the_core_plugin()
{
    let dir = TempDir::new().unwrap();
    morgue_core::plugin::initialize();
    morgue_core::plugin::initialize(); // second call must be a no-op

    let core = write_core(&dir, "disp.core", &CoreBuilder::new().segment(0x1000, patterned(0x100, 0), 0x1).build());
    let process = morgue_core::plugin::create_process_for(&core, CoreSettings::default()).unwrap();
    assert!(process.is_some());

    let elf = write_core(&dir, "disp.elf", b"\x7fELF\x02\x01\x01\x00________________________________");
    let declined = morgue_core::plugin::create_process_for(&elf, CoreSettings::default()).unwrap();
    assert!(declined.is_none());
}

#[test]
fn test_open_declines_non_core_mach_o()
{
    let dir = TempDir::new().unwrap();
    let exe = write_core(
        &dir,
        "app",
        &CoreBuilder::new().segment(0x1000, patterned(0x100, 0), 0x1).filetype(MH_EXECUTE).build(),
    );

    assert!(CoreProcess::open(&exe, CoreSettings::default()).unwrap().is_none());
    assert!(matches!(MachOCoreFile::open(&exe), Err(CoreError::NotACore(_))));
}
