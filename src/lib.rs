//! aurad - a desktop audio server daemon.
//!
//! This crate provides the core of the audio server: the I/O device
//! abstraction hardware backends plug into, the device list and stream
//! accounting, and the Bluetooth audio policy engine that arbitrates
//! profile switching and device suspension.

/// Configuration management module.
pub mod config;

/// Core types and error handling.
pub mod core;

/// Fire-and-forget server metrics.
pub mod metrics;

/// Main-thread runtime: event loop, timer manager, message bus.
pub mod server;

/// Audio and Bluetooth services.
pub mod services;

/// Tracing setup.
pub mod tracing_config;

pub use crate::core::{AuradError, Result};
