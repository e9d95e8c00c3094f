//! ops-toolkit - personal operations helpers
//!
//! Layered startup configuration, process-wide logging, filesystem and
//! archive helpers, subprocess execution, HTTP downloads and build
//! metadata. The chat-robot notifier lives in the `webhook-notifier` crate
//! and is re-exported as [`notifier`].

pub mod build_info;
pub mod config;
pub mod exec;
pub mod fs;
pub mod http;
pub mod logging;

pub use webhook_notifier as notifier;

pub use config::{load_config, ConfigLoader, ConfigSchema, FieldSpec, ResolvedConfig};
pub use exec::{exec, ExecOptions, ExecResult};
pub use logging::LogOptions;
