//! Common module for library exports

pub use crate::config::{CoreSettings, CorefilePreference};
pub use crate::corefile::MachOCoreFile;
pub use crate::error::{CoreError, CoreResult};
pub use crate::object_file::{CoreObjectFile, FileRange, Permissions, Section};
pub use crate::process::discovery::{
    DiscoveredImages, KernelSearch, DARWIN_KERNEL_PLUGIN_NAME, DYLD_MACOSX_PLUGIN_NAME,
};
pub use crate::process::{CoreProcess, ProcessState, VmRangeToFileOffset, VmRangeToPermissions};
pub use crate::types::{ArchCore, ArchSpec, CoreThread, MemoryRegionInfo, ThreadList};
pub use crate::INVALID_ADDRESS;
