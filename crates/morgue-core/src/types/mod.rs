//! # Types
//!
//! Value types shared across the core-file backend.
//!
//! These abstract over what a debugger host needs to know about a dead
//! process (its architecture, its memory regions, its threads) without
//! tying the host to how the backend recovered that information from the
//! file.

pub mod arch;
pub mod memory;
pub mod thread;

// Re-export all public types
pub use arch::{ArchCore, ArchSpec};
pub use memory::MemoryRegionInfo;
pub use thread::{CoreThread, ThreadList};
