//! # Settings
//!
//! Process-wide settings consumed by the core-file backend.
//!
//! The backend has exactly one knob: which loader image to prefer when a core
//! contains both a user-space dyld and a kernel. It is modeled after the
//! debugger-global settings blob the host owns, so it derives `serde` and can
//! be merged from whatever configuration file the host reads.

use serde::{Deserialize, Serialize};

/// Which image to prefer when a core contains both dyld and a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorefilePreference
{
    /// Prefer the user-process dyld image, fall back to the kernel
    #[default]
    User,
    /// Prefer the kernel image, fall back to dyld
    Kernel,
}

/// Settings for the core-file backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings
{
    /// Treat cores as kernel cores when both a kernel and a dyld image were
    /// found. Off by default: most cores are user-process cores.
    pub prefer_kernel_corefile: bool,
}

impl CoreSettings
{
    /// The preference implied by the current settings.
    pub fn corefile_preference(&self) -> CorefilePreference
    {
        if self.prefer_kernel_corefile {
            CorefilePreference::Kernel
        } else {
            CorefilePreference::User
        }
    }
}
