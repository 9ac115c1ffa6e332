//! Architecture descriptors for core targets.

use std::fmt;

use crate::macho::{CPU_SUBTYPE_486, CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_X86, CPU_TYPE_X86_64};

/// CPU core flavor derived from a Mach-O cputype/cpusubtype pair
///
/// Only the flavors that change the backend's behavior get their own variant;
/// everything else is `Unknown`. Note that `X86_32_i486` is distinct from
/// `X86_32_i386`: old cores carry it, and the triple rewrite on load depends
/// on telling them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchCore
{
    /// 64-bit x86
    X86_64,
    /// 32-bit x86, generic i386
    X86_32_i386,
    /// 32-bit x86, i486 subtype
    X86_32_i486,
    /// 64-bit ARM
    Arm64,
    /// 32-bit ARM
    Arm,
    /// Anything else
    Unknown,
}

/// Architecture of a core target
///
/// Carries the raw Mach-O cputype/cpusubtype plus a target triple string.
/// The triple's architecture component can be rewritten without touching the
/// vendor/OS components, which is what the load path does for i486 cores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchSpec
{
    /// Mach-O cputype
    pub cputype: u32,
    /// Mach-O cpusubtype
    pub cpusubtype: u32,
    triple: String,
}

impl ArchSpec
{
    /// Create a descriptor from explicit parts.
    pub fn new(cputype: u32, cpusubtype: u32, triple: impl Into<String>) -> Self
    {
        ArchSpec {
            cputype,
            cpusubtype,
            triple: triple.into(),
        }
    }

    /// Derive a descriptor from the cputype/cpusubtype of a Mach-O header.
    ///
    /// The platform component defaults to `apple-macosx`; cores don't record
    /// a platform, and macOS is where Mach-O cores come from.
    pub fn from_mach_header(cputype: u32, cpusubtype: u32) -> Self
    {
        let arch_name = match (cputype, cpusubtype) {
            (CPU_TYPE_X86_64, _) => "x86_64",
            (CPU_TYPE_X86, CPU_SUBTYPE_486) => "i486",
            (CPU_TYPE_X86, _) => "i386",
            (CPU_TYPE_ARM64, _) => "arm64",
            (CPU_TYPE_ARM, _) => "arm",
            _ => "unknown",
        };
        ArchSpec::new(cputype, cpusubtype, format!("{arch_name}-apple-macosx"))
    }

    /// The CPU core flavor.
    pub fn core(&self) -> ArchCore
    {
        match (self.cputype, self.cpusubtype) {
            (CPU_TYPE_X86_64, _) => ArchCore::X86_64,
            (CPU_TYPE_X86, CPU_SUBTYPE_486) => ArchCore::X86_32_i486,
            (CPU_TYPE_X86, _) => ArchCore::X86_32_i386,
            (CPU_TYPE_ARM64, _) => ArchCore::Arm64,
            (CPU_TYPE_ARM, _) => ArchCore::Arm,
            _ => ArchCore::Unknown,
        }
    }

    /// The target triple, e.g. `x86_64-apple-macosx`.
    pub fn triple(&self) -> &str
    {
        &self.triple
    }

    /// Whether the descriptor names a CPU we recognize.
    pub fn is_valid(&self) -> bool
    {
        self.core() != ArchCore::Unknown
    }

    /// Replace the architecture component of the triple, preserving the
    /// vendor/OS components.
    pub fn set_triple_architecture(&mut self, arch: &str)
    {
        match self.triple.split_once('-') {
            Some((_, rest)) => self.triple = format!("{arch}-{rest}"),
            None => self.triple = arch.to_string(),
        }
    }
}

impl fmt::Display for ArchSpec
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.triple)
    }
}
