//! # VISE Common Library
//!
//! Shared code for the VISE image search engine server:
//! - Event types and the process-wide event queue
//! - Engine configuration (flat `key=value` persistence)
//! - Common error types
//! - String/HTTP utility functions

pub mod config;
pub mod error;
pub mod events;
pub mod util;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{Event, EventKind, EventQueue};
