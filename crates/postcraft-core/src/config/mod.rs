//! Configuration system: schema, loading, legacy migration, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use postcraft_core::config;
//!
//! let loaded = config::load_config(None);
//! for warning in &loaded.warnings {
//!     eprintln!("{warning}");
//! }
//! let cfg = loaded.config;
//! println!("svg chain: {:?}", cfg.tasks.svg.chain);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{apply_env_overrides, get_config_path, load_config, save_config, LoadedConfig};
pub use schema::{ChainEntry, Config, ProviderConfig, TaskConfig, TASK_NAMES};
