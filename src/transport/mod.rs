//! # Transport Contract
//!
//! The pluggable byte-channel seam. Concrete network transports (TCP, TLS,
//! named pipes, WebSockets, ...) live outside the core; they implement
//! [`Transport`] and hand whole payloads to the runtime. Each transport is
//! responsible for length-prefixed framing so the core never sees a partial
//! frame.
//!
//! The crate bundles one implementation, [`memory`], used by the tests and
//! for in-process wiring.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;

/// A connected (or connectable) byte channel carrying whole frames.
#[async_trait]
pub trait Transport: Send {
    /// Establish the physical channel. Idempotent for transports that are
    /// born connected.
    async fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// Send one whole payload. The transport frames it.
    async fn send_bytes(&mut self, payload: &[u8]) -> Result<()>;

    /// Receive the next whole payload. `Ok(None)` signals an orderly close;
    /// an error signals an unexpected disconnect.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Tear the channel down.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Boxed transport handed across the acceptor / connector seams.
pub type BoxTransport = Box<dyn Transport + Send>;
