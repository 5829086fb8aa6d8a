//! Presence announcements: Hello on start, heartbeats while running,
//! Goodbye on stop.

use crate::config::DiscoveryConfig;
use crate::discovery::{AnnouncementSink, DiscoveryKind, DiscoveryMessage};
use crate::error::Result;
use crate::utils::time::unix_timestamp_ms;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// What a service says about itself in every announcement.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub service_id: Uuid,
    pub name: String,
    pub description: String,
    pub transport_name: String,
    pub data: BTreeMap<String, String>,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            service_id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            transport_name: String::new(),
            data: BTreeMap::new(),
        }
    }

    fn message(&self, kind: DiscoveryKind) -> DiscoveryMessage {
        DiscoveryMessage {
            service_id: self.service_id,
            timestamp_ms: unix_timestamp_ms(),
            kind,
            service_name: self.name.clone(),
            service_description: self.description.clone(),
            transport_name: self.transport_name.clone(),
            data: self.data.clone(),
        }
    }
}

/// Production sink: a UDP socket sending to the configured multicast group.
pub struct MulticastSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl MulticastSink {
    pub async fn open(config: &DiscoveryConfig) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_multicast_ttl_v4(1)?;
        Ok(Self {
            socket,
            target: SocketAddr::from((config.group, config.port)),
        })
    }
}

#[async_trait]
impl AnnouncementSink for MulticastSink {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket.send_to(datagram, self.target).await?;
        Ok(())
    }
}

/// Owns the announcement schedule for one service. `start` and `stop` are
/// idempotent; a started announcer says Hello exactly once and Goodbye
/// exactly once.
pub struct DiscoveryAnnouncer {
    identity: ServiceIdentity,
    config: DiscoveryConfig,
    sink: Arc<dyn AnnouncementSink>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl DiscoveryAnnouncer {
    pub fn new(
        identity: ServiceIdentity,
        config: DiscoveryConfig,
        sink: Arc<dyn AnnouncementSink>,
    ) -> Self {
        Self {
            identity,
            config,
            sink,
            task: Mutex::new(None),
        }
    }

    pub fn service_id(&self) -> Uuid {
        self.identity.service_id
    }

    /// Begin announcing. A second call on a running announcer is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.task.lock().await;
        if slot.is_some() {
            debug!("announcer already running");
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(announce_loop(
            self.identity.clone(),
            self.config.clone(),
            self.sink.clone(),
            cancel.clone(),
        ));
        *slot = Some((cancel, handle));
        Ok(())
    }

    /// Stop announcing; sends the Goodbye before returning. A no-op when not
    /// running.
    pub async fn stop(&self) {
        let taken = self.task.lock().await.take();
        if let Some((cancel, handle)) = taken {
            cancel.cancel();
            let _ = handle.await;
        }
    }
}

async fn announce_loop(
    identity: ServiceIdentity,
    config: DiscoveryConfig,
    sink: Arc<dyn AnnouncementSink>,
    cancel: CancellationToken,
) {
    send_message(sink.as_ref(), identity.message(DiscoveryKind::Hello)).await;

    if config.continuous {
        // First heartbeat lands one full period after the Hello.
        let start = tokio::time::Instant::now() + config.heartbeat_period;
        let mut ticks = tokio::time::interval_at(start, config.heartbeat_period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {
                    send_message(sink.as_ref(), identity.message(DiscoveryKind::Heartbeat)).await;
                }
            }
        }
    } else {
        cancel.cancelled().await;
    }

    send_message(sink.as_ref(), identity.message(DiscoveryKind::Goodbye)).await;
}

/// Best-effort send; failures are logged and the schedule continues.
async fn send_message(sink: &dyn AnnouncementSink, message: DiscoveryMessage) {
    match message.encode() {
        Ok(datagram) => {
            if let Err(e) = sink.send(&datagram).await {
                warn!(kind = ?message.kind, error = %e, "discovery send failed");
            }
        }
        Err(e) => error!(error = %e, "discovery message failed to encode"),
    }
}
