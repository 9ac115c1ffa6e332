//! # Mach-O Header Primitives
//!
//! The handful of Mach-O constants and the raw header type the backend needs.
//!
//! This is deliberately not a full object-file parser: the backend only ever
//! looks at the fixed-size `mach_header` prefix: once on disk to decide
//! whether a file is a core at all, and repeatedly inside captured memory
//! while hunting for the dynamic linker or kernel image. The full
//! load-command walk lives in [`crate::corefile`].
//!
//! All multi-byte fields are read little-endian; headers written by a
//! big-endian producer show up with a reversed (`MH_CIGAM*`) magic and are
//! byte-swapped field by field.

use byteorder::{ByteOrder, LittleEndian};

// ============================================================================
// Header magics
// ============================================================================

/// 32-bit Mach-O magic, native byte order
pub const MH_MAGIC: u32 = 0xfeed_face;
/// 64-bit Mach-O magic, native byte order
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
/// 32-bit Mach-O magic, reversed byte order
pub const MH_CIGAM: u32 = 0xcefa_edfe;
/// 64-bit Mach-O magic, reversed byte order
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;

/// Universal (fat) binary magic; fat headers are always big-endian on disk
pub const FAT_MAGIC: u32 = 0xcafe_babe;

// ============================================================================
// File types and flags
// ============================================================================

/// Demand-paged executable (`MH_EXECUTE`)
pub const MH_EXECUTE: u32 = 0x2;
/// Core file (`MH_CORE`)
pub const MH_CORE: u32 = 0x4;
/// Dynamic link editor, i.e. `dyld` itself (`MH_DYLINKER`)
pub const MH_DYLINKER: u32 = 0x7;

/// Header flag: the file is input to the dynamic linker
///
/// An `MH_EXECUTE` image *without* this flag is standalone; on Darwin that
/// means a kernel.
pub const MH_DYLDLINK: u32 = 0x4;

// ============================================================================
// Load commands used by the core walker
// ============================================================================

/// 32-bit segment load command
pub const LC_SEGMENT: u32 = 0x1;
/// Thread register context
pub const LC_THREAD: u32 = 0x4;
/// Unix thread register context (thread state plus entry point)
pub const LC_UNIXTHREAD: u32 = 0x5;
/// 64-bit segment load command
pub const LC_SEGMENT_64: u32 = 0x19;

// ============================================================================
// CPU types and subtypes
// ============================================================================

/// 64-bit ABI flag OR'd into a cputype
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
/// 32-bit x86
pub const CPU_TYPE_X86: u32 = 7;
/// 64-bit x86
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
/// 32-bit ARM
pub const CPU_TYPE_ARM: u32 = 12;
/// 64-bit ARM
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;

/// x86 cpusubtype for the 80486
pub const CPU_SUBTYPE_486: u32 = 4;

// ============================================================================
// VM protection bits (segment `initprot`)
// ============================================================================

pub const VM_PROT_READ: u32 = 0x1;
pub const VM_PROT_WRITE: u32 = 0x2;
pub const VM_PROT_EXECUTE: u32 = 0x4;

/// Size of the seven-field common header prefix (the full 32-bit header)
pub const MACH_HEADER_SIZE: usize = 28;
/// Size of the 64-bit header (common prefix plus 4 reserved bytes)
pub const MACH_HEADER_64_SIZE: usize = 32;

/// The fixed-size Mach-O header prefix
///
/// Both the 32- and 64-bit headers start with these seven 32-bit fields; the
/// 64-bit variant only appends a reserved word. Everything the backend
/// decides (core or not, dyld or kernel) it decides from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMachHeader
{
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

impl RawMachHeader
{
    /// Parse a header from at least [`MACH_HEADER_SIZE`] bytes.
    ///
    /// Returns `None` when the buffer is too short or the magic is not one of
    /// the four Mach-O magics. Reversed-magic headers come back with every
    /// field already byte-swapped into native order, so callers can match on
    /// `filetype` and `flags` without caring how the producer wrote them.
    pub fn parse(bytes: &[u8]) -> Option<Self>
    {
        if bytes.len() < MACH_HEADER_SIZE {
            return None;
        }

        let mut header = RawMachHeader {
            magic: LittleEndian::read_u32(&bytes[0..4]),
            cputype: LittleEndian::read_u32(&bytes[4..8]),
            cpusubtype: LittleEndian::read_u32(&bytes[8..12]),
            filetype: LittleEndian::read_u32(&bytes[12..16]),
            ncmds: LittleEndian::read_u32(&bytes[16..20]),
            sizeofcmds: LittleEndian::read_u32(&bytes[20..24]),
            flags: LittleEndian::read_u32(&bytes[24..28]),
        };

        match header.magic {
            MH_MAGIC | MH_MAGIC_64 => Some(header),
            MH_CIGAM | MH_CIGAM_64 => {
                header.byte_swap();
                Some(header)
            }
            _ => None,
        }
    }

    /// Swap every field; `magic` becomes the native-order value afterwards.
    fn byte_swap(&mut self)
    {
        self.magic = self.magic.swap_bytes();
        self.cputype = self.cputype.swap_bytes();
        self.cpusubtype = self.cpusubtype.swap_bytes();
        self.filetype = self.filetype.swap_bytes();
        self.ncmds = self.ncmds.swap_bytes();
        self.sizeofcmds = self.sizeofcmds.swap_bytes();
        self.flags = self.flags.swap_bytes();
    }

    /// Whether this header introduces a 64-bit file.
    pub fn is_64_bit(&self) -> bool
    {
        self.magic == MH_MAGIC_64
    }

    /// On-disk size of the header, including the 64-bit reserved word.
    pub fn header_size(&self) -> usize
    {
        if self.is_64_bit() {
            MACH_HEADER_64_SIZE
        } else {
            MACH_HEADER_SIZE
        }
    }
}
