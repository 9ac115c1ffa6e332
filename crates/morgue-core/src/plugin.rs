//! # Plugin Identity and Registration
//!
//! The backend presents itself to a debugger host as a process plugin: a
//! name, a description, a version, and a factory that inspects a file and
//! either claims it or declines. The host-facing registry here is the
//! minimal version of that contract: ordered registration, first accept
//! wins.
//!
//! Registration is a one-shot: [`initialize`] may be called any number of
//! times from anywhere, and only the first call registers anything. The
//! guarantee is an initialization-order contract, not a static-constructor
//! side effect.

use std::path::Path;
use std::sync::{Once, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::config::CoreSettings;
use crate::error::CoreResult;
use crate::process::CoreProcess;

/// Plugin name
pub const PLUGIN_NAME: &str = "mach-o-core";
/// Plugin description
pub const PLUGIN_DESCRIPTION: &str = "Mach-O core file debugging plug-in.";
/// Plugin version
pub const PLUGIN_VERSION: u32 = 1;

/// Factory signature: inspect `path` and return a candidate process if the
/// plugin can handle it, `Ok(None)` to decline silently.
pub type ProcessCreateInstance = fn(&Path, CoreSettings) -> CoreResult<Option<CoreProcess>>;

/// A registered process plugin
#[derive(Clone)]
pub struct ProcessPlugin
{
    pub name: &'static str,
    pub description: &'static str,
    pub version: u32,
    pub create_instance: ProcessCreateInstance,
}

static PROCESS_PLUGINS: Lazy<RwLock<Vec<ProcessPlugin>>> = Lazy::new(|| RwLock::new(Vec::new()));
static INITIALIZE_ONCE: Once = Once::new();

fn create_core_process(path: &Path, settings: CoreSettings) -> CoreResult<Option<CoreProcess>>
{
    CoreProcess::open(path, settings)
}

/// Register the mach-o-core plugin with the process registry.
///
/// Runs exactly once per process lifetime; later calls have no effect.
pub fn initialize()
{
    INITIALIZE_ONCE.call_once(|| {
        register_process_plugin(ProcessPlugin {
            name: PLUGIN_NAME,
            description: PLUGIN_DESCRIPTION,
            version: PLUGIN_VERSION,
            create_instance: create_core_process,
        });
    });
}

/// Add a plugin to the registry.
pub fn register_process_plugin(plugin: ProcessPlugin)
{
    debug!("registering process plugin '{}'", plugin.name);
    PROCESS_PLUGINS.write().unwrap().push(plugin);
}

/// Offer `path` to each registered plugin in registration order; the first
/// one that claims it wins.
pub fn create_process_for(path: &Path, settings: CoreSettings) -> CoreResult<Option<CoreProcess>>
{
    let plugins = PROCESS_PLUGINS.read().unwrap();
    for plugin in plugins.iter() {
        if let Some(process) = (plugin.create_instance)(path, settings)? {
            debug!("process plugin '{}' claimed {}", plugin.name, path.display());
            return Ok(Some(process));
        }
    }
    Ok(None)
}

/// Names of the registered plugins, in registration order.
pub fn registered_plugin_names() -> Vec<&'static str>
{
    PROCESS_PLUGINS.read().unwrap().iter().map(|plugin| plugin.name).collect()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_initialize_registers_once()
    {
        initialize();
        initialize();
        let names: Vec<_> = registered_plugin_names()
            .into_iter()
            .filter(|name| *name == PLUGIN_NAME)
            .collect();
        assert_eq!(names.len(), 1);
    }
}
