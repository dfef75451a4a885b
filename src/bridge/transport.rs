//! Seams to the host process
//!
//! The bridge never talks to the host directly. It hands finished programs to
//! a [`HostTransport`] and asks it for callback endpoints.

use async_trait::async_trait;
use serde_json::Value;

use super::error::TransportResult;
use super::handle::CallbackToken;

/// Request/response channel to the host plus a factory for callback endpoints
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// Execute one program and return the envelope JSON it produced.
    ///
    /// Called exactly once per round trip; implementations must not retry.
    async fn execute(&self, program: &str) -> TransportResult<Value>;

    /// Open a fresh endpoint the host can call back into.
    ///
    /// The endpoint must already accept payloads when this returns.
    async fn open_endpoint(&self) -> TransportResult<Box<dyn CallbackEndpoint>>;
}

/// Ephemeral receiving side of one callback slot
#[async_trait]
pub trait CallbackEndpoint: Send {
    /// Token the host uses to address this endpoint
    fn token(&self) -> &CallbackToken;

    /// Next payload, or `None` once the endpoint can no longer receive.
    ///
    /// Must be cancel-safe: a dropped `recv` future loses no payload.
    async fn recv(&mut self) -> Option<Value>;

    /// Stop accepting payloads and release the endpoint's resources
    fn close(&mut self);
}
