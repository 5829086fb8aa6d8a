//! # rpc-core
//!
//! Transport-agnostic RPC runtime: a message envelope with end-to-end
//! encryption, request/response correlation, server-side dispatch, callback
//! push, automatic reconnection, and UDP multicast discovery.
//!
//! ## Architecture
//!
//! - [`core`] — wire messages, payload codecs, and the session cryptography
//! - [`protocol`] — handshake, request correlation, dispatch, callbacks
//! - [`transport`] — the pluggable byte-channel seam (plus an in-process
//!   memory transport)
//! - [`service`] — the client and server runtimes and the reconnection
//!   supervisor
//! - [`discovery`] — multicast presence announcements
//! - [`config`] — structured configuration with TOML and env sources
//!
//! ## Quick Start
//!
//! ```no_run
//! use rpc_core::config::ServerConfig;
//! use rpc_core::core::serializer::WireFormat;
//! use rpc_core::protocol::dispatcher::ServiceDispatcher;
//! use rpc_core::protocol::handshake::AcceptAll;
//! use rpc_core::service::RpcServer;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> rpc_core::Result<()> {
//! let mut dispatcher = ServiceDispatcher::new(WireFormat::Bincode);
//! dispatcher.register2("add", |a: i32, b: i32| async move { Ok::<_, String>(a + b) });
//!
//! let server = RpcServer::new(dispatcher, Arc::new(AcceptAll), ServerConfig::default());
//! let (accept_tx, accept_rx) = mpsc::channel(16);
//! // An acceptor of any kind feeds connected transports into accept_tx.
//! # drop(accept_tx);
//! server.serve(accept_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::message::{Message, MessageKind, Request, Response, ResponseStatus};
pub use crate::core::serializer::{ParamList, WireFormat};
pub use config::RpcConfig;
pub use error::{Result, RpcError};
pub use protocol::dispatcher::ServiceDispatcher;
pub use service::{ClientOptions, RpcClient, RpcServer};
pub use transport::{BoxTransport, Transport};
