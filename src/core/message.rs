//! Logical wire messages.
//!
//! Every frame exchanged over a connection is a [`Message`] envelope: a
//! 128-bit correlation id, a kind tag, and an opaque payload. Envelopes are
//! bincode-encoded; the payload inside is encoded by the connection's
//! configured [`WireFormat`](crate::core::serializer::WireFormat) and, once
//! the handshake completes, the whole encoded envelope is encrypted.
//!
//! There is no dedicated response kind on the wire: a response travels as a
//! `Request`-kind envelope that echoes the originating request's id.

use crate::error::{RpcError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind tag of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MessageKind {
    #[default]
    Unknown,
    Request,
    Callback,
    Initialization,
    Authorization,
}

/// The message envelope. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a new message with a fresh correlation id.
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
        }
    }

    /// Build the reply to this message: same id, given kind and payload.
    pub fn reply(&self, kind: MessageKind, payload: Vec<u8>) -> Self {
        Self {
            id: self.id,
            kind,
            payload,
        }
    }

    /// Encode the envelope for the transport.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| RpcError::Serialize(e.to_string()))
    }

    /// Decode an envelope received from the transport.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| RpcError::Deserialize(e.to_string()))
    }
}

/// A remote call: method name plus independently-serialized parameters.
///
/// There is deliberately no schema binding all parameters together — each
/// parameter byte sequence is self-describing for the configured codec.
/// `type_tags` carries optional generic type hints and may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Request {
    pub method: String,
    pub params: Vec<Vec<u8>>,
    pub type_tags: Vec<String>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Vec<Vec<u8>>) -> Self {
        Self {
            method: method.into(),
            params,
            type_tags: Vec::new(),
        }
    }
}

/// Outcome status of a processed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResponseStatus {
    #[default]
    Success,
    BadRequest,
    Unauthorized,
    InternalServerError,
}

/// The result of a remote call, correlated to its request by envelope id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Response {
    pub status: ResponseStatus,
    pub payload: Vec<u8>,
    pub error: Option<String>,
}

impl Response {
    pub fn success(payload: Vec<u8>) -> Self {
        Self {
            status: ResponseStatus::Success,
            payload,
            error: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::BadRequest,
            payload: Vec::new(),
            error: Some(detail.into()),
        }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Unauthorized,
            payload: Vec::new(),
            error: Some(detail.into()),
        }
    }

    pub fn server_error(detail: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::InternalServerError,
            payload: Vec::new(),
            error: Some(detail.into()),
        }
    }

    /// Convert into a `Result`, mapping failure statuses onto the error taxonomy.
    pub fn into_result(self) -> Result<Vec<u8>> {
        let detail = || self.error.clone().unwrap_or_default();
        match self.status {
            ResponseStatus::Success => Ok(self.payload),
            ResponseStatus::Unauthorized => Err(RpcError::Unauthorized(detail())),
            ResponseStatus::BadRequest | ResponseStatus::InternalServerError => {
                Err(RpcError::ServiceInvocation(detail()))
            }
        }
    }
}

/// A server-raised event pushed to subscribed clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub name: String,
    pub args: Vec<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let msg = Message::new(MessageKind::Request, b"payload".to_vec());
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn reply_echoes_id() {
        let msg = Message::new(MessageKind::Request, vec![]);
        let reply = msg.reply(MessageKind::Request, b"ok".to_vec());
        assert_eq!(msg.id, reply.id);
        assert_eq!(reply.payload, b"ok");
    }

    #[test]
    fn fresh_ids_are_unique() {
        let a = Message::new(MessageKind::Request, vec![]);
        let b = Message::new(MessageKind::Request, vec![]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn response_into_result_maps_statuses() {
        assert!(Response::success(vec![1]).into_result().is_ok());
        assert!(matches!(
            Response::unauthorized("no token").into_result(),
            Err(crate::error::RpcError::Unauthorized(_))
        ));
        assert!(matches!(
            Response::bad_request("bad").into_result(),
            Err(crate::error::RpcError::ServiceInvocation(_))
        ));
        assert!(matches!(
            Response::server_error("boom").into_result(),
            Err(crate::error::RpcError::ServiceInvocation(_))
        ));
    }
}
