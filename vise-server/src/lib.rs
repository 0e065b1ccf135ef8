//! # VISE Server Library (vise-server)
//!
//! HTTP application server for the VISE image search engine.
//!
//! **Purpose:** Frame HTTP/1.x requests directly over raw sockets, drive the
//! multi-stage index-building pipeline, and push training progress to the
//! connected browser through a long-poll event channel.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod resources;

pub use error::{Error, Result};
