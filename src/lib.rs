//! Hostlink – drive a stateful scripting host from a local orchestrator
//!
//! This crate implements the remote execution and callback bridge:
//! - Lazy call chains that fuse several remote operations into one round trip
//! - Code generation with a single, injection-safe literal quoting boundary
//! - Typed result envelopes hydrated into values or handle-bound proxies
//! - Ephemeral callback endpoints for host-side asynchronous UI callbacks
//! - Step lineages that keep round trips ordered on the single-threaded host

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Bridge core: chains, evaluation, callbacks, steps, and transports
pub mod bridge;

/// Remote object catalogue and window commands built on the bridge core
pub mod catalog;

// Re-export key types for convenience
pub use bridge::{Bridge, BridgeConfig};

/// Current version of the hostlink crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version spoken with the host prelude
pub const PROTOCOL_VERSION: &str = "1.0.0";
