//! Engine configuration
//!
//! Tunables that shape playback behaviour, plus the generic YAML helpers the
//! player binary uses for its own config file.
//!
//! # Usage
//!
//! ```ignore
//! use encore_core::config::{load_config, save_config, default_config_path, EngineConfig};
//!
//! let path = default_config_path("engine.yaml");
//! let config: EngineConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod engine;
mod io;
mod paths;

pub use engine::EngineConfig;
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path, default_state_path};
