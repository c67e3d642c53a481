//! Configuration for devforge
//!
//! This crate handles:
//! - The global configuration file (`~/.config/devforge/config.toml`)
//! - Environment variable overrides for container, port and store settings
//! - Parsing of human-readable resource limits ("512m", "0.5")

mod error;
mod global;
mod limits;

pub use error::*;
pub use global::*;
pub use limits::*;
