//! In-process transport over a duplex pipe.
//!
//! Frames are length-prefixed by `LengthDelimitedCodec`, mirroring what a
//! real network transport would do on a socket. [`pair`] returns the two
//! connected ends.

use crate::error::{RpcError, Result};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

const PIPE_CAPACITY: usize = 64 * 1024;

/// One end of an in-process duplex channel.
pub struct MemoryTransport {
    framed: Framed<DuplexStream, LengthDelimitedCodec>,
}

/// Create a connected pair of memory transports.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    (
        MemoryTransport {
            framed: Framed::new(a, LengthDelimitedCodec::new()),
        },
        MemoryTransport {
            framed: Framed::new(b, LengthDelimitedCodec::new()),
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self, _timeout: Duration) -> Result<()> {
        // Born connected.
        Ok(())
    }

    async fn send_bytes(&mut self, payload: &[u8]) -> Result<()> {
        self.framed
            .send(Bytes::copy_from_slice(payload))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(Some(frame.to_vec())),
            Some(Err(e)) => Err(RpcError::Transport(e.to_string())),
            None => Ok(None),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.framed
            .close()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_whole_and_in_order() {
        let (mut a, mut b) = pair();
        a.send_bytes(b"first").await.unwrap();
        a.send_bytes(b"second, longer frame").await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap(), b"first");
        assert_eq!(b.recv().await.unwrap().unwrap(), b"second, longer frame");
    }

    #[tokio::test]
    async fn close_is_seen_as_orderly_end_of_stream() {
        let (mut a, mut b) = pair();
        a.disconnect().await.unwrap();
        drop(a);
        assert!(b.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_payload_roundtrips() {
        let (mut a, mut b) = pair();
        a.send_bytes(b"").await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), b"");
    }
}
