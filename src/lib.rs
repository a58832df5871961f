//! Loopcast - looping still images as a live fragmented MP4 stream
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod pipeline;
pub mod server;
pub mod store;
