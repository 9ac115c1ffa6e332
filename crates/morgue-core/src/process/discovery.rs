//! # Loader Image Discovery
//!
//! Finding the dynamic linker or kernel inside the captured memory.
//!
//! A core file records memory and registers but not which image owns the list
//! of loaded modules. For a user process that registry lives in `dyld`'s
//! in-memory image (`MH_DYLINKER`); for a kernel panic dump it lives in the
//! kernel itself (an `MH_EXECUTE` image that is *not* dynamically linked,
//! `MH_DYLDLINK` clear). The load path sweeps every captured page looking for
//! either header, records at most one address per kind, and the host hands
//! the winner to the matching dynamic-loader plugin by name.

use tracing::debug;

use crate::config::CorefilePreference;
use crate::macho::{RawMachHeader, MACH_HEADER_SIZE, MH_DYLDLINK, MH_DYLINKER, MH_EXECUTE};
use crate::process::CoreProcess;
use crate::INVALID_ADDRESS;

/// Name of the user-process dynamic loader plugin
pub const DYLD_MACOSX_PLUGIN_NAME: &str = "dyld-macosx";
/// Name of the Darwin kernel dynamic loader plugin
pub const DARWIN_KERNEL_PLUGIN_NAME: &str = "darwin-kernel";

/// What kind of loader image a probed header turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoaderImageKind
{
    /// A user-process dynamic linker (`MH_DYLINKER`)
    UserDyld,
    /// A standalone kernel (`MH_EXECUTE` without `MH_DYLDLINK`)
    MachKernel,
}

/// Classify a parsed header as a loader image, or neither.
///
/// Dynamically-linked executables are deliberately ignored: the app binary is
/// not the loader, the separately-mapped dyld is.
pub(crate) fn classify_loader_image(header: &RawMachHeader) -> Option<LoaderImageKind>
{
    match header.filetype {
        MH_DYLINKER => Some(LoaderImageKind::UserDyld),
        MH_EXECUTE if header.flags & MH_DYLDLINK == 0 => Some(LoaderImageKind::MachKernel),
        _ => None,
    }
}

/// Addresses of loader images discovered inside the captured memory
///
/// Both slots start at [`INVALID_ADDRESS`] and each keeps the *first* hit it
/// is offered; a recorded address is never demoted by a later sweep hit. Both
/// may end up filled (a kernel dump can capture user dyld pages too), and
/// the preference policy decides which one callers get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredImages
{
    /// Address of the `struct mach_header` of dyld, if found
    pub dyld_addr: u64,
    /// Address of the `struct mach_header` of the kernel, if found
    pub kernel_addr: u64,
}

impl Default for DiscoveredImages
{
    fn default() -> Self
    {
        DiscoveredImages {
            dyld_addr: INVALID_ADDRESS,
            kernel_addr: INVALID_ADDRESS,
        }
    }
}

impl DiscoveredImages
{
    /// Whether a dyld image was recorded.
    pub fn has_dyld(&self) -> bool
    {
        self.dyld_addr != INVALID_ADDRESS
    }

    /// Whether a kernel image was recorded.
    pub fn has_kernel(&self) -> bool
    {
        self.kernel_addr != INVALID_ADDRESS
    }

    /// Record a classified hit; the first address per slot wins.
    pub(crate) fn record(&mut self, kind: LoaderImageKind, addr: u64)
    {
        match kind {
            LoaderImageKind::UserDyld => {
                if self.dyld_addr == INVALID_ADDRESS {
                    debug!("found a user process dyld binary image at {addr:#x}");
                    self.dyld_addr = addr;
                }
            }
            LoaderImageKind::MachKernel => {
                if self.kernel_addr == INVALID_ADDRESS {
                    debug!("found a mach kernel binary image at {addr:#x}");
                    self.kernel_addr = addr;
                }
            }
        }
    }

    /// The image-info address under `preference`.
    ///
    /// Returns [`INVALID_ADDRESS`] only when neither image was found.
    pub fn image_info_address(&self, preference: CorefilePreference) -> u64
    {
        match preference {
            CorefilePreference::Kernel => {
                if self.has_kernel() {
                    self.kernel_addr
                } else {
                    self.dyld_addr
                }
            }
            CorefilePreference::User => {
                if self.has_dyld() {
                    self.dyld_addr
                } else {
                    self.kernel_addr
                }
            }
        }
    }

    /// The dynamic-loader plugin matching the image `preference` selects.
    ///
    /// Empty when neither image was found.
    pub fn loader_plugin_name(&self, preference: CorefilePreference) -> &'static str
    {
        match preference {
            CorefilePreference::Kernel => {
                if self.has_kernel() {
                    DARWIN_KERNEL_PLUGIN_NAME
                } else if self.has_dyld() {
                    DYLD_MACOSX_PLUGIN_NAME
                } else {
                    ""
                }
            }
            CorefilePreference::User => {
                if self.has_dyld() {
                    DYLD_MACOSX_PLUGIN_NAME
                } else if self.has_kernel() {
                    DARWIN_KERNEL_PLUGIN_NAME
                } else {
                    ""
                }
            }
        }
    }
}

/// Callback seam for the Darwin-kernel dynamic-loader plugin
///
/// Exhaustive page scanning can false-hit on a non-primary kernel image that
/// happens to be present in the dump; the kernel plugin has smarter
/// heuristics. The load path hands it the session explicitly (the plugin
/// never stores it) and adopts whatever address it finds.
pub trait KernelSearch
{
    /// Run the plugin's own kernel search against `process`.
    ///
    /// Returns the kernel's header address, or [`INVALID_ADDRESS`] when the
    /// heuristics found nothing.
    fn search_for_kernel(&self, process: &CoreProcess) -> u64;
}

impl CoreProcess
{
    /// Inspect `addr` for a loader-image header and record any hit.
    ///
    /// Returns true when the bytes at `addr` were a dyld or kernel header,
    /// whether or not the corresponding slot was already filled.
    pub(crate) fn probe_for_loader_image(&mut self, addr: u64) -> bool
    {
        let mut header_bytes = [0u8; MACH_HEADER_SIZE];
        match self.read_memory(addr, &mut header_bytes) {
            Ok(count) if count == header_bytes.len() => {}
            _ => return false,
        }

        let Some(header) = RawMachHeader::parse(&header_bytes) else {
            return false;
        };
        let Some(kind) = classify_loader_image(&header) else {
            return false;
        };

        self.images.record(kind, addr);
        true
    }
}
