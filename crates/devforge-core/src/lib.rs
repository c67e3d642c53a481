//! Core logic for devforge project containers
//!
//! This crate provides:
//! - Container lifecycle management (create with rollback, destroy, power state)
//! - Port allocation across frontend and backend ranges
//! - Virtual shell sessions with per-project working directories
//! - Frontend dev server supervision for previews
//! - Project persistence and host-side scaffolding

pub mod bootstrap;
mod devserver;
mod error;
mod manager;
mod ports;
mod projects;
pub mod scaffold;
mod shell;

pub use devserver::*;
pub use error::*;
pub use manager::*;
pub use ports::*;
pub use projects::*;
pub use shell::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
