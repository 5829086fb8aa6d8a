//! # Client & Server Runtimes
//!
//! The connection-owning halves of the runtime: [`client::RpcClient`] with
//! its reconnection supervisor, and [`server::RpcServer`] hosting one receive
//! loop per accepted connection.

pub mod client;
pub mod reconnect;
pub mod server;

pub use client::{connector, ClientOptions, Connector, RequestBuilder, RpcClient};
pub use reconnect::{ReconnectEvent, ReconnectOptions, ReconnectState};
pub use server::RpcServer;
