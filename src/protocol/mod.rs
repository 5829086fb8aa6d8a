//! # Protocol State Machines
//!
//! The session handshake, the client-side correlation engine, the server-side
//! request dispatcher, and callback delivery.
//!
//! Everything here is transport-independent: these modules consume and
//! produce [`Message`](crate::core::Message) values; moving the bytes is the
//! transport's job, encrypting them is the connection loop's.

pub mod callback;
pub mod dispatcher;
pub mod handshake;
pub mod pending;

pub use callback::{CallbackHub, CallbackRegistry};
pub use dispatcher::{ServiceDispatcher, SubscriptionAction};
pub use handshake::{
    AcceptAll, ConnectionSession, ExpectedToken, FixedToken, HandshakePhase, NoToken,
    TokenProvider, TokenValidator,
};
pub use pending::PendingRequests;
