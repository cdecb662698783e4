//! SeisRelay - packet relay and sanitation for real-time seismic telemetry
//!
//! Subscribes to an upstream import service's packet stream (reconnecting
//! on failure), screens each arriving packet through a sanitizer pipeline
//! (expired, future, duplicate/timing-slip), and fans accepted packets out
//! to downstream pull-mode subscribers that may follow named streams or
//! every stream.

pub mod app;
pub mod config;
pub mod error;
pub mod packet;
pub mod relay;
pub mod sanitizer;
pub mod streaming;
pub mod upstream;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
