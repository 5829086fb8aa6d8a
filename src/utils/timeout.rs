//! Async timeout wrappers and the runtime's default durations.

use crate::error::{RpcError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for connect / send / receive operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Ceiling for a complete handshake (key exchange + authorization).
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default ceiling for awaiting a call's response.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for draining connections on server shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut` with a deadline, mapping expiry to [`RpcError::Timeout`].
pub async fn with_timeout<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout),
    }
}
