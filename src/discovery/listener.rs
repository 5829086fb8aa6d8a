//! Listening side of discovery: join the group, surface decoded
//! announcements.

use crate::config::DiscoveryConfig;
use crate::discovery::DiscoveryMessage;
use crate::error::Result;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const RECV_BUFFER: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 64;

/// Receives announcements from a multicast group. Malformed datagrams are
/// skipped; socket errors are logged and the loop keeps listening.
pub struct DiscoveryListener {
    cancel: CancellationToken,
    messages: mpsc::Receiver<(DiscoveryMessage, SocketAddr)>,
}

impl DiscoveryListener {
    /// Bind the discovery port, join the group, and start receiving.
    pub async fn bind(config: &DiscoveryConfig) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
        socket.join_multicast_v4(config.group, Ipv4Addr::UNSPECIFIED)?;

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let cancel = CancellationToken::new();
        tokio::spawn(listen_loop(socket, tx, cancel.clone()));
        Ok(Self {
            cancel,
            messages: rx,
        })
    }

    /// Next announcement, or `None` once stopped.
    pub async fn recv(&mut self) -> Option<(DiscoveryMessage, SocketAddr)> {
        self.messages.recv().await
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen_loop(
    socket: UdpSocket,
    tx: mpsc::Sender<(DiscoveryMessage, SocketAddr)>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => match DiscoveryMessage::decode(&buf[..len]) {
                    Ok(message) => {
                        if tx.send((message, from)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => debug!(%from, error = %e, "malformed discovery datagram skipped"),
                },
                Err(e) => warn!(error = %e, "discovery receive failed"),
            },
        }
    }
}
