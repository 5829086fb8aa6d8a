//! UDP multicast service discovery.
//!
//! Presence is announced as small bincode datagrams on a multicast group:
//! `Hello` once when a service comes up, periodic `Heartbeat`s while it runs
//! (continuous mode), `Goodbye` when it stops. Listeners join the same group
//! and surface decoded announcements; everything here is best-effort — a lost
//! datagram is simply a missed announcement.
//!
//! The [`AnnouncementSink`] seam separates the announcement schedule from the
//! socket so the schedule is testable without a network.

use crate::error::{Result, RpcError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub mod announcer;
pub mod listener;

pub use announcer::{DiscoveryAnnouncer, MulticastSink, ServiceIdentity};
pub use listener::DiscoveryListener;

/// Announcement phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryKind {
    Hello,
    Heartbeat,
    Goodbye,
}

/// One discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    /// Stable id for one service instance; constant across its heartbeats.
    pub service_id: Uuid,
    /// Sender's clock, unix milliseconds.
    pub timestamp_ms: u64,
    pub kind: DiscoveryKind,
    pub service_name: String,
    pub service_description: String,
    /// Name of the transport the service accepts connections on.
    pub transport_name: String,
    /// Free-form endpoint details (address, port, ...).
    pub data: BTreeMap<String, String>,
}

impl DiscoveryMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| RpcError::Serialize(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| RpcError::Deserialize(e.to_string()))
    }
}

/// Where announcements go. The production sink is a multicast socket; tests
/// record datagrams in memory.
#[async_trait]
pub trait AnnouncementSink: Send + Sync {
    async fn send(&self, datagram: &[u8]) -> Result<()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn datagram_roundtrip() {
        let msg = DiscoveryMessage {
            service_id: Uuid::new_v4(),
            timestamp_ms: 1_700_000_000_000,
            kind: DiscoveryKind::Hello,
            service_name: "quotes".into(),
            service_description: "price feed".into(),
            transport_name: "tcp".into(),
            data: BTreeMap::from([("port".to_string(), "9000".to_string())]),
        };
        let back = DiscoveryMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn malformed_datagram_is_an_error() {
        assert!(DiscoveryMessage::decode(&[0xFF, 0x01, 0x02]).is_err());
    }
}
