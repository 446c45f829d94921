//! Berth Core - Foundational Types and Abstractions
//!
//! This module provides the foundational types, traits, and abstractions
//! used across the Berth runtime server.

pub mod clock;
pub mod config;
pub mod error;
pub mod idmap;
pub mod signal;

// Re-export commonly used types
pub use clock::{Clock, SystemClock};
pub use config::BerthConfig;
pub use error::{BerthError, Result};
pub use idmap::{IdMap, IdMappings};
pub use signal::CloseNotifier;

/// Berth version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
