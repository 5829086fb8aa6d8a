//! Session handshake: key exchange followed by authorization.
//!
//! Wire flow, one connection at a time:
//! 1. Client sends its asymmetric public key as an `Initialization` message
//!    (plaintext envelope).
//! 2. Server resets its per-connection symmetric encryptor — fresh key + iv,
//!    never reused across connections — seals the pair for the client's
//!    public key and returns it as the `Initialization` reply.
//! 3. Client opens the sealed payload with its private key and installs the
//!    session. Every envelope from this point is encrypted in both
//!    directions.
//! 4. Client sends an `Authorization` message carrying its access token
//!    (empty string = no auth). Server validates it through the
//!    [`TokenValidator`] collaborator.
//! 5. Only once `is_initialized && is_authorized` does the server route
//!    `Request` messages to the bound service.
//!
//! State is per-connection; at most one handshake is in progress on a
//! connection, enforced by rejecting a second `Initialization`.

use crate::core::crypto::{ServerEncryptor, SessionKeys};
use crate::core::message::{Message, MessageKind, Response};
use crate::core::serializer::WireFormat;
use crate::core::ClientEncryptor;
use crate::error::{constants, RpcError, Result};
use tracing::debug;

/// Client-side handshake progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakePhase {
    #[default]
    New,
    KeyExchangeSent,
    KeyExchangeComplete,
    AuthorizationSent,
    Authorized,
    Ready,
    Failed,
}

/// Server-side token validation collaborator.
pub trait TokenValidator: Send + Sync {
    fn is_token_valid(&self, token: &str) -> bool;
}

/// Accepts every token, including the empty one. The "no auth" validator.
pub struct AcceptAll;

impl TokenValidator for AcceptAll {
    fn is_token_valid(&self, _token: &str) -> bool {
        true
    }
}

/// Accepts exactly one expected token.
pub struct ExpectedToken(pub String);

impl TokenValidator for ExpectedToken {
    fn is_token_valid(&self, token: &str) -> bool {
        token == self.0
    }
}

/// Client-side token source.
pub trait TokenProvider: Send + Sync {
    fn get_token(&self) -> String;
}

/// No authentication: provides the empty token.
pub struct NoToken;

impl TokenProvider for NoToken {
    fn get_token(&self) -> String {
        String::new()
    }
}

/// Provides one fixed token.
pub struct FixedToken(pub String);

impl TokenProvider for FixedToken {
    fn get_token(&self) -> String {
        self.0.clone()
    }
}

/// Per-connection server-side session state: the mutable encryptor plus the
/// two gate flags. Created on accept, destroyed on disconnect.
pub struct ConnectionSession {
    pub encryptor: Box<dyn ServerEncryptor>,
    pub is_initialized: bool,
    pub is_authorized: bool,
}

impl ConnectionSession {
    pub fn new(encryptor: Box<dyn ServerEncryptor>) -> Self {
        Self {
            encryptor,
            is_initialized: false,
            is_authorized: false,
        }
    }

    /// Whether requests may be routed to the bound service.
    pub fn is_ready(&self) -> bool {
        self.is_initialized && self.is_authorized
    }
}

/// Build the Initialization reply: reset the symmetric encryptor and seal the
/// fresh (key, iv) pair for the client's public key.
///
/// Does not flip `is_initialized` — the caller sends the reply on the still
/// unencrypted channel first, then completes the transition.
pub fn server_initialization_reply(
    session: &mut ConnectionSession,
    msg: &Message,
    format: WireFormat,
) -> Result<Message> {
    if session.is_initialized {
        return Err(RpcError::Protocol(constants::ERR_HANDSHAKE_REPLAYED.into()));
    }
    let client_public: [u8; 32] = msg
        .payload
        .as_slice()
        .try_into()
        .map_err(|_| RpcError::Handshake(constants::ERR_BAD_PUBLIC_KEY.into()))?;

    session.encryptor.reset();
    let keys = SessionKeys {
        key: session.encryptor.session_key().to_vec(),
        iv: session.encryptor.session_iv().to_vec(),
    };
    let sealed = session
        .encryptor
        .seal_for_client(&format.to_bytes(&keys)?, &client_public)?;

    debug!("session keys sealed for client");
    Ok(msg.reply(MessageKind::Initialization, sealed))
}

/// Validate the client's token and build the Authorization reply.
pub fn server_authorization_reply(
    session: &mut ConnectionSession,
    msg: &Message,
    validator: &dyn TokenValidator,
    format: WireFormat,
) -> Result<Message> {
    if !session.is_initialized {
        let response = Response::bad_request(constants::ERR_HANDSHAKE_NOT_COMPLETE);
        return Ok(msg.reply(MessageKind::Authorization, format.to_bytes(&response)?));
    }

    let token: String = format.from_bytes_or_default(&msg.payload)?;
    let response = if validator.is_token_valid(&token) {
        session.is_authorized = true;
        debug!("connection authorized");
        Response::success(Vec::new())
    } else {
        debug!("token rejected");
        Response::unauthorized(constants::ERR_NOT_AUTHORIZED)
    };
    Ok(msg.reply(MessageKind::Authorization, format.to_bytes(&response)?))
}

/// Build the client's opening Initialization message.
pub fn client_initialization(encryptor: &dyn ClientEncryptor) -> Message {
    Message::new(MessageKind::Initialization, encryptor.public_key().to_vec())
}

/// Open the server's sealed key material and install the symmetric session.
pub fn client_install_session(
    encryptor: &mut dyn ClientEncryptor,
    reply: &Message,
    format: WireFormat,
) -> Result<()> {
    if reply.kind != MessageKind::Initialization {
        return Err(RpcError::Protocol(format!(
            "expected Initialization reply, got {:?}",
            reply.kind
        )));
    }
    let plaintext = encryptor.open_sealed(&reply.payload)?;
    let keys: SessionKeys = format.from_bytes(&plaintext)?;
    encryptor.install_session(&keys.key, &keys.iv)
}

/// Build the client's Authorization message. The payload is encrypted by the
/// send path like every other post-initialization envelope.
pub fn client_authorization(token: &str, format: WireFormat) -> Result<Message> {
    Ok(Message::new(
        MessageKind::Authorization,
        format.to_bytes(&token)?,
    ))
}

/// Check the server's Authorization reply.
pub fn client_check_authorization(reply: &Message, format: WireFormat) -> Result<()> {
    if reply.kind != MessageKind::Authorization {
        return Err(RpcError::Protocol(format!(
            "expected Authorization reply, got {:?}",
            reply.kind
        )));
    }
    let response: Response = format.from_bytes(&reply.payload)?;
    match response.into_result() {
        Ok(_) => Ok(()),
        Err(RpcError::Unauthorized(detail)) => Err(RpcError::Unauthorized(detail)),
        Err(other) => Err(RpcError::Handshake(other.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::crypto::{ClientCrypto, ServerCrypto};
    use crate::core::message::ResponseStatus;

    fn session() -> ConnectionSession {
        ConnectionSession::new(Box::new(ServerCrypto::new()))
    }

    #[test]
    fn full_handshake_establishes_matching_sessions() {
        let format = WireFormat::Bincode;
        let mut client = ClientCrypto::new();
        let mut server = session();

        // Key exchange
        let init = client_initialization(&client);
        let reply = server_initialization_reply(&mut server, &init, format).unwrap();
        assert_eq!(reply.id, init.id);
        server.is_initialized = true;
        client_install_session(&mut client, &reply, format).unwrap();
        assert!(client.has_session());

        // Both directions agree on the session
        let frame = server.encryptor.encrypt(b"ping").unwrap();
        assert_eq!(client.decrypt(&frame).unwrap(), b"ping");

        // Authorization
        let auth = client_authorization("secret", format).unwrap();
        let reply =
            server_authorization_reply(&mut server, &auth, &ExpectedToken("secret".into()), format)
                .unwrap();
        assert!(server.is_ready());
        client_check_authorization(&reply, format).unwrap();
    }

    #[test]
    fn empty_token_means_no_auth() {
        let format = WireFormat::Bincode;
        let mut server = session();
        server.is_initialized = true;

        let auth = client_authorization("", format).unwrap();
        let reply = server_authorization_reply(&mut server, &auth, &AcceptAll, format).unwrap();
        assert!(server.is_authorized);
        client_check_authorization(&reply, format).unwrap();
    }

    #[test]
    fn bad_token_is_rejected_and_not_authorized() {
        let format = WireFormat::Bincode;
        let mut server = session();
        server.is_initialized = true;

        let auth = client_authorization("wrong", format).unwrap();
        let reply =
            server_authorization_reply(&mut server, &auth, &ExpectedToken("right".into()), format)
                .unwrap();
        assert!(!server.is_authorized);
        assert!(matches!(
            client_check_authorization(&reply, format),
            Err(RpcError::Unauthorized(_))
        ));
    }

    #[test]
    fn authorization_before_initialization_is_a_bad_request() {
        let format = WireFormat::Bincode;
        let mut server = session();

        let auth = client_authorization("token", format).unwrap();
        let reply = server_authorization_reply(&mut server, &auth, &AcceptAll, format).unwrap();
        let response: Response = format.from_bytes(&reply.payload).unwrap();
        assert_eq!(response.status, ResponseStatus::BadRequest);
        assert!(!server.is_authorized);
    }

    #[test]
    fn second_initialization_is_connection_fatal() {
        let format = WireFormat::Bincode;
        let client = ClientCrypto::new();
        let mut server = session();

        let init = client_initialization(&client);
        server_initialization_reply(&mut server, &init, format).unwrap();
        server.is_initialized = true;

        let again = client_initialization(&client);
        assert!(matches!(
            server_initialization_reply(&mut server, &again, format),
            Err(RpcError::Protocol(_))
        ));
    }

    #[test]
    fn malformed_public_key_fails_the_handshake() {
        let format = WireFormat::Bincode;
        let mut server = session();
        let bogus = Message::new(MessageKind::Initialization, vec![1, 2, 3]);
        assert!(matches!(
            server_initialization_reply(&mut server, &bogus, format),
            Err(RpcError::Handshake(_))
        ));
    }

    #[test]
    fn key_material_differs_across_connections() {
        let format = WireFormat::Bincode;
        let mut client_a = ClientCrypto::new();
        let mut client_b = ClientCrypto::new();
        let mut server_a = session();
        let mut server_b = session();

        let init_a = client_initialization(&client_a);
        let reply_a = server_initialization_reply(&mut server_a, &init_a, format).unwrap();
        client_install_session(&mut client_a, &reply_a, format).unwrap();

        let init_b = client_initialization(&client_b);
        let reply_b = server_initialization_reply(&mut server_b, &init_b, format).unwrap();
        client_install_session(&mut client_b, &reply_b, format).unwrap();

        assert_ne!(server_a.encryptor.session_key(), server_b.encryptor.session_key());

        // A frame from connection A must not decrypt on connection B.
        let frame = server_a.encryptor.encrypt(b"isolated").unwrap();
        assert!(client_b.decrypt(&frame).is_err());
    }
}
