//! Startup configuration resolution
//!
//! Implements the 4-layer configuration merge:
//! 1. Struct defaults (the instance handed to the loader)
//! 2. Environment variables (`UPPERCASE(field)`)
//! 3. TOML config files (`config.toml`, or `CONFIG` / `--config`)
//! 4. CLI flags that were actually passed
//!
//! The loader runs once at process start. Its public entry points log and
//! terminate on any error; [`ConfigLoader::load`] exposes the same pipeline
//! as a `Result` for embedding and tests.

mod loader;
mod resolved;
mod schema;

pub use loader::{load_config, ConfigLoader, CONFIG_ENV, CONFIG_KEY, DEFAULT_CONFIG};
pub use resolved::{ConfigError, ConfigSource, Layer, ResolvedConfig};
pub use schema::{ConfigSchema, FieldKind, FieldSpec};
