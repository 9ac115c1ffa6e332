//! # Core-File Process Backend
//!
//! Makes a post-mortem Mach-O core image look like a live, stopped process.
//!
//! A [`CoreProcess`] starts as a *candidate* (the file passed the header
//! check), becomes *loaded* once [`load`](CoreProcess::load) has built the
//! address indexes, and is *alive*, inspectable, after discovery and
//! thread synthesis complete. There is nothing to resume or kill: the process
//! is already dead, so `destroy()` succeeds unconditionally and detaching
//! never warns.
//!
//! Two indexes drive every query:
//!
//! - the **segment index** maps process virtual addresses to byte extents in
//!   the core file, with VM-and-file-adjacent sections coalesced into one
//!   entry;
//! - the **permission index** keeps one entry per original section (never
//!   coalesced) and answers region queries, including synthetic no-access
//!   regions for the gaps.
//!
//! All operations are synchronous and single-threaded per session; the
//! enclosing debugger's target lock is assumed to serialize callers.

pub mod discovery;
mod reader;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::CoreSettings;
use crate::corefile::MachOCoreFile;
use crate::error::{CoreError, CoreResult};
use crate::macho::{RawMachHeader, MACH_HEADER_64_SIZE, MH_CORE};
use crate::object_file::{CoreObjectFile, FileRange, Permissions};
use crate::range_map::{RangeEntry, RangeMap};
use crate::types::{ArchCore, ArchSpec, CoreThread, MemoryRegionInfo, ThreadList};
use crate::INVALID_ADDRESS;

use self::discovery::{DiscoveredImages, KernelSearch, DARWIN_KERNEL_PLUGIN_NAME, DYLD_MACOSX_PLUGIN_NAME};

/// Maps process virtual addresses to byte extents inside the core file
pub type VmRangeToFileOffset = RangeMap<FileRange>;
/// Maps process virtual addresses to recorded page permissions
pub type VmRangeToPermissions = RangeMap<Permissions>;

/// Stride of the loader-image sweep
///
/// One Darwin page. The sweep steps exactly this much from each segment base;
/// a header that is not page-aligned within its segment is missed.
const IMAGE_SCAN_STRIDE: u64 = 0x1000;

/// Lifecycle of a core session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState
{
    /// The file passed the header check; indexes not built yet
    Candidate,
    /// Indexes built; discovery may still be running inside `load()`
    Loaded,
    /// Fully loaded and inspectable
    Alive,
}

/// A Mach-O core file presented as a stopped process
pub struct CoreProcess
{
    core_path: PathBuf,
    settings: CoreSettings,
    objfile: Option<Box<dyn CoreObjectFile>>,
    state: ProcessState,
    aranges: VmRangeToFileOffset,
    range_infos: VmRangeToPermissions,
    images: DiscoveredImages,
    dyld_plugin_name: &'static str,
    target_arch: Option<ArchSpec>,
    threads: ThreadList,
    can_jit: bool,
}

impl CoreProcess
{
    /// Decide whether `core_path` looks like a Mach-O core file.
    ///
    /// Reads the larger (64-bit) header size off the front of the file and
    /// accepts if and only if the read yields exactly that many bytes, the
    /// header parses, and the file type is `MH_CORE`. Any I/O failure is a
    /// rejection; the plugin registry just tries the next handler.
    pub fn detect(core_path: &Path) -> Option<RawMachHeader>
    {
        let mut file = File::open(core_path).ok()?;
        let mut header_bytes = [0u8; MACH_HEADER_64_SIZE];
        file.read_exact(&mut header_bytes).ok()?;
        let header = RawMachHeader::parse(&header_bytes)?;
        (header.filetype == MH_CORE).then_some(header)
    }

    /// Create a bare candidate with no object file attached.
    ///
    /// `load()` on such a candidate fails with
    /// [`CoreError::InvalidCoreModule`]; use [`open`](CoreProcess::open) or
    /// [`with_object_file`](CoreProcess::with_object_file) for a loadable
    /// session.
    pub fn new(core_path: impl Into<PathBuf>, settings: CoreSettings) -> Self
    {
        CoreProcess {
            core_path: core_path.into(),
            settings,
            objfile: None,
            state: ProcessState::Candidate,
            aranges: VmRangeToFileOffset::new(),
            range_infos: VmRangeToPermissions::new(),
            images: DiscoveredImages::default(),
            dyld_plugin_name: "",
            target_arch: None,
            threads: ThreadList::new(),
            can_jit: true,
        }
    }

    /// Create a candidate over an already-parsed object file.
    pub fn with_object_file(
        core_path: impl Into<PathBuf>,
        objfile: Box<dyn CoreObjectFile>,
        settings: CoreSettings,
    ) -> Self
    {
        let mut process = Self::new(core_path, settings);
        process.objfile = Some(objfile);
        process
    }

    /// Open `core_path` as a core process candidate.
    ///
    /// Returns `Ok(None)` when the file is not a Mach-O core; errors are
    /// reserved for files that passed detection but failed to map or parse.
    pub fn open(core_path: impl AsRef<Path>, settings: CoreSettings) -> CoreResult<Option<CoreProcess>>
    {
        let core_path = core_path.as_ref();
        if Self::detect(core_path).is_none() {
            return Ok(None);
        }
        let objfile = MachOCoreFile::open(core_path)?;
        Ok(Some(Self::with_object_file(core_path, Box::new(objfile), settings)))
    }

    /// Load the core: build the address indexes, discover loader images, and
    /// synthesize the thread list.
    ///
    /// `kernel_search` is the Darwin-kernel plugin's search callback, used to
    /// double-check a kernel address found by exhaustive scanning; pass
    /// `None` when no such plugin is available.
    pub fn load(&mut self, kernel_search: Option<&dyn KernelSearch>) -> CoreResult<()>
    {
        let objfile = self.objfile.as_deref().ok_or(CoreError::InvalidCoreModule)?;
        if objfile.data_len() == 0 {
            return Err(CoreError::InvalidCoreObjectFile);
        }
        if objfile.num_thread_contexts() == 0 {
            return Err(CoreError::NoThreadContexts);
        }
        if objfile.sections().is_empty() {
            return Err(CoreError::NoSections);
        }

        // A core is immutable; there is nothing to JIT code into.
        self.can_jit = false;

        self.build_range_indexes();
        self.state = ProcessState::Loaded;

        if !self.images.has_dyld() || !self.images.has_kernel() {
            // Both a user dyld and a kernel may be present in one dump, and
            // either header can sit in any segment, so sweep everything even
            // after a hit. Which one to prefer is decided afterwards.
            self.scan_for_loader_images();
        }

        self.refine_kernel_address(kernel_search);
        self.select_dynamic_loader();
        self.override_target_architecture();
        self.refresh_threads();

        self.state = ProcessState::Alive;
        Ok(())
    }

    /// Build the VM→file-offset and VM→permission indexes from the section
    /// list.
    fn build_range_indexes(&mut self)
    {
        let Some(objfile) = self.objfile.as_deref() else {
            return;
        };

        let mut ranges_are_sorted = true;
        let mut prev_vm_addr = 0u64;
        for section in objfile.sections() {
            if prev_vm_addr > section.vm_addr {
                ranges_are_sorted = false;
            }
            prev_vm_addr = section.vm_addr;

            let entry = RangeEntry::new(
                section.vm_addr,
                section.vm_size,
                FileRange::new(section.file_offset, section.file_size),
            );

            // Coalesce with the previous entry when both the VM ranges and
            // the file ranges meet. Merging is only sound while the input is
            // still VM-sorted; once a section arrives out of order we stop
            // merging and sort afterwards instead.
            match self.aranges.back_mut() {
                Some(last)
                    if ranges_are_sorted && last.end() == entry.base && last.data.end() == entry.data.offset =>
                {
                    last.set_end(entry.end());
                    last.data.set_end(entry.data.end());
                }
                _ => self.aranges.append(entry),
            }

            // Some producers leave permissions zeroed. Assume read + execute
            // so clients don't refuse to read or disassemble the memory; it
            // can't be writable, this backend never writes core memory.
            let mut permissions = section.permissions;
            if permissions.is_empty() {
                permissions = Permissions::READ | Permissions::EXECUTE;
            }
            self.range_infos.append(RangeEntry::new(section.vm_addr, section.vm_size, permissions));
        }

        if !ranges_are_sorted {
            self.aranges.sort();
            self.range_infos.sort();
        }

        debug!(
            "built segment index with {} entries from {} sections",
            self.aranges.len(),
            self.range_infos.len()
        );
    }

    /// Sweep every indexed segment a page at a time, probing for loader
    /// image headers.
    fn scan_for_loader_images(&mut self)
    {
        let scan_ranges: Vec<(u64, u64)> = self.aranges.entries().map(|entry| (entry.base, entry.end())).collect();
        for (start, end) in scan_ranges {
            let mut addr = start;
            while addr < end {
                self.probe_for_loader_image(addr);
                let Some(next) = addr.checked_add(IMAGE_SCAN_STRIDE) else {
                    break;
                };
                addr = next;
            }
        }
    }

    /// Let the Darwin-kernel plugin double-check a kernel address found by
    /// exhaustive scanning.
    fn refine_kernel_address(&mut self, kernel_search: Option<&dyn KernelSearch>)
    {
        if !self.images.has_kernel() {
            return;
        }

        if self.target_arch.is_none() {
            if let Some(objfile) = self.objfile.as_deref() {
                self.target_arch = Some(objfile.architecture());
            }
        }

        let Some(search) = kernel_search else {
            return;
        };

        // The plugin re-queries image_info_address() during its search; hand
        // it a session that claims to know nothing so it runs its own
        // heuristics, then restore what the sweep found.
        let saved_images = self.images;
        self.images = DiscoveredImages::default();
        let better_kernel_addr = search.search_for_kernel(self);
        self.images = saved_images;

        if better_kernel_addr != INVALID_ADDRESS {
            debug!("using kernel address {better_kernel_addr:#x} from the Darwin kernel loader search");
            self.images.kernel_addr = better_kernel_addr;
        }
    }

    /// Pick the dynamic-loader plugin matching the preferred image.
    fn select_dynamic_loader(&mut self)
    {
        self.dyld_plugin_name = self.images.loader_plugin_name(self.settings.corefile_preference());
        match self.dyld_plugin_name {
            DARWIN_KERNEL_PLUGIN_NAME => {
                info!("using kernel corefile image at {:#x}", self.images.kernel_addr);
            }
            DYLD_MACOSX_PLUGIN_NAME => {
                info!("using user process dyld image at {:#x}", self.images.dyld_addr);
            }
            _ => {}
        }
    }

    /// Overwrite the target architecture with the core's.
    ///
    /// Cores are always single-arch, so the core wins over whatever the
    /// target carried before. i486 cores keep their cpusubtype but present a
    /// plain `i386` triple, platform component preserved.
    fn override_target_architecture(&mut self)
    {
        let Some(objfile) = self.objfile.as_deref() else {
            return;
        };
        let mut arch = objfile.architecture();
        if arch.core() == ArchCore::X86_32_i486 {
            arch.set_triple_architecture("i386");
        }
        if arch.is_valid() {
            self.target_arch = Some(arch);
        }
    }

    /// Rebuild the thread list.
    ///
    /// Returns whether the resulting list is non-empty.
    pub fn refresh_threads(&mut self) -> bool
    {
        let old_thread_list = std::mem::take(&mut self.threads);
        let mut new_thread_list = ThreadList::new();
        let populated = self.update_thread_list(&old_thread_list, &mut new_thread_list);
        self.threads = new_thread_list;
        populated
    }

    /// Populate `new_thread_list`: on the first call, one thread per recorded
    /// register context; on later calls, the old threads verbatim. Nothing
    /// changes in a dead process.
    pub fn update_thread_list(&self, old_thread_list: &ThreadList, new_thread_list: &mut ThreadList) -> bool
    {
        if old_thread_list.is_empty() {
            if let Some(objfile) = self.objfile.as_deref() {
                let num_threads = objfile.num_thread_contexts();
                for tid in 0..u64::from(num_threads) {
                    new_thread_list.add_thread(CoreThread::new(tid));
                }
            }
        } else {
            for thread in old_thread_list.iter() {
                new_thread_list.add_thread(*thread);
            }
        }
        !new_thread_list.is_empty()
    }

    /// Read up to `buf.len()` bytes of core memory at `addr`.
    ///
    /// Goes straight to the file, with no read caching on top; the core file
    /// *is* the cache. Returns the number of bytes served, which is short
    /// when the range runs into an unmapped gap; it is an error only when not
    /// even the first byte is mapped.
    pub fn read_memory(&self, addr: u64, buf: &mut [u8]) -> CoreResult<usize>
    {
        let objfile = self.objfile.as_deref().ok_or(CoreError::InvalidCoreModule)?;
        reader::read_core_memory(objfile, &self.aranges, addr, buf)
    }

    /// Describe the memory region containing `load_addr`.
    ///
    /// Addresses inside a recorded section return that section's range and
    /// permissions. Addresses in a gap return a synthetic no-access region
    /// running up to the next recorded section, so clients can iterate the
    /// address space by re-querying each returned `end`. Addresses past the
    /// last recorded section are an error.
    pub fn memory_region_info(&self, load_addr: u64) -> CoreResult<MemoryRegionInfo>
    {
        let Some(entry) = self.range_infos.find_entry_that_contains_or_follows(load_addr) else {
            return Err(CoreError::InvalidRegionAddress);
        };

        if entry.contains(load_addr) {
            Ok(MemoryRegionInfo {
                start: entry.base,
                end: entry.end(),
                readable: entry.data.contains(Permissions::READ),
                writable: entry.data.contains(Permissions::WRITE),
                executable: entry.data.contains(Permissions::EXECUTE),
            })
        } else {
            Ok(MemoryRegionInfo::no_access(load_addr, entry.base))
        }
    }

    /// Address of the chosen loader image's header.
    ///
    /// Follows the current preference setting on every call; returns
    /// [`INVALID_ADDRESS`] only when neither image was found.
    pub fn image_info_address(&self) -> u64
    {
        self.images.image_info_address(self.settings.corefile_preference())
    }

    /// Name of the dynamic-loader plugin selected at load time, or empty
    /// when no loader image was found.
    pub fn dynamic_loader_plugin_name(&self) -> &'static str
    {
        self.dyld_plugin_name
    }

    /// The loader images discovery recorded.
    pub fn discovered_images(&self) -> &DiscoveredImages
    {
        &self.images
    }

    /// Architecture adopted from the core, available once loaded.
    pub fn architecture(&self) -> Option<&ArchSpec>
    {
        self.target_arch.as_ref()
    }

    /// The synthesized thread list.
    pub fn threads(&self) -> &ThreadList
    {
        &self.threads
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState
    {
        self.state
    }

    /// Whether the session is inspectable. True from the moment the indexes
    /// are built.
    pub fn is_alive(&self) -> bool
    {
        matches!(self.state, ProcessState::Loaded | ProcessState::Alive)
    }

    /// Detaching from a core never loses anything; don't warn.
    pub fn warn_before_detach(&self) -> bool
    {
        false
    }

    /// Tear down the process. Always succeeds: the process was dead before
    /// we arrived, so there is nothing to signal or wait for.
    pub fn destroy(&mut self) -> CoreResult<()>
    {
        Ok(())
    }

    /// Whether code can be JIT-compiled into the target. Never, once loaded.
    pub fn can_jit(&self) -> bool
    {
        self.can_jit
    }

    /// Path the core was opened from.
    pub fn core_path(&self) -> &Path
    {
        &self.core_path
    }

    /// Backend settings.
    pub fn settings(&self) -> &CoreSettings
    {
        &self.settings
    }

    /// Mutable backend settings; the image preference takes effect on the
    /// next `image_info_address()` call.
    pub fn settings_mut(&mut self) -> &mut CoreSettings
    {
        &mut self.settings
    }

    /// The VM→file-offset index.
    pub fn segment_ranges(&self) -> &VmRangeToFileOffset
    {
        &self.aranges
    }

    /// The VM→permissions index.
    pub fn permission_ranges(&self) -> &VmRangeToPermissions
    {
        &self.range_infos
    }
}
