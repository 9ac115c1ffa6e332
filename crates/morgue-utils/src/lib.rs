//! # Morgue Utilities
//!
//! Shared utilities and logging bootstrap for the Morgue workspace.
//!
//! This crate exists so the library crates never install a global tracing
//! subscriber themselves; binaries call [`init_logging`] once and every crate
//! just emits events.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
