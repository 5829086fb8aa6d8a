//! Client-side request correlation.
//!
//! The pending map is the only mutable state shared between the send path and
//! the receive loop: send inserts a completion handle under the fresh request
//! id, the receive loop resolves and removes the matching entry by id
//! equality only. Unmatched or late responses are discarded silently (at
//! debug level). A timed-out call removes its own entry without touching the
//! connection.

use crate::core::message::Response;
use crate::error::{constants, RpcError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

type PendingMap = HashMap<Uuid, oneshot::Sender<Response>>;

/// Map of in-flight request ids to completion handles.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<PendingMap>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PendingMap>> {
        self.inner
            .lock()
            .map_err(|_| RpcError::Protocol(constants::ERR_PENDING_LOCK.into()))
    }

    /// Register a fresh in-flight request. Returns the receiving half that
    /// resolves when the matching response arrives.
    pub fn register(&self, id: Uuid) -> Result<oneshot::Receiver<Response>> {
        let (tx, rx) = oneshot::channel();
        self.lock()?.insert(id, tx);
        Ok(rx)
    }

    /// Resolve the entry matching `id`, if any. Returns whether a pending
    /// call was completed; a forged or late id resolves nothing.
    pub fn resolve(&self, id: Uuid, response: Response) -> Result<bool> {
        let entry = self.lock()?.remove(&id);
        match entry {
            Some(tx) => {
                // The caller may have timed out and dropped its receiver.
                let _ = tx.send(response);
                Ok(true)
            }
            None => {
                debug!(%id, "discarding response with no pending request");
                Ok(false)
            }
        }
    }

    /// Remove an entry without completing it (call timeout or send failure).
    pub fn remove(&self, id: Uuid) -> Result<()> {
        self.lock()?.remove(&id);
        Ok(())
    }

    /// Drop every pending entry. Receivers observe a closed channel, which
    /// the call path surfaces as a closed connection.
    pub fn fail_all(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
