//! Shared wiring for the integration tests: an in-process server fed by
//! memory transports, and a connector that dials it.
#![allow(dead_code)]

use rpc_core::config::ServerConfig;
use rpc_core::protocol::handshake::TokenValidator;
use rpc_core::service::{connector, Connector, RpcServer};
use rpc_core::transport::{memory, BoxTransport};
use rpc_core::{RpcError, ServiceDispatcher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct TestServer {
    pub server: Arc<RpcServer>,
    accept_tx: mpsc::Sender<BoxTransport>,
    task: JoinHandle<()>,
}

pub async fn start_server(
    dispatcher: ServiceDispatcher,
    validator: Arc<dyn TokenValidator>,
) -> TestServer {
    start_server_with_config(dispatcher, validator, ServerConfig::default()).await
}

pub async fn start_server_with_config(
    dispatcher: ServiceDispatcher,
    validator: Arc<dyn TokenValidator>,
    config: ServerConfig,
) -> TestServer {
    let server = Arc::new(RpcServer::new(dispatcher, validator, config));
    let (accept_tx, accept_rx) = mpsc::channel(16);
    let task = {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.serve(accept_rx).await;
        })
    };
    TestServer {
        server,
        accept_tx,
        task,
    }
}

impl TestServer {
    /// Dial this server: every call makes a fresh memory pair and hands the
    /// server end to the accept loop.
    pub fn connector(&self) -> Connector {
        connector_to(self.accept_tx.clone())
    }

    /// Accept one raw transport, for tests that drive the wire by hand.
    pub async fn accept_raw(&self) -> memory::MemoryTransport {
        let (client_end, server_end) = memory::pair();
        self.accept_tx
            .send(Box::new(server_end) as BoxTransport)
            .await
            .expect("server accept loop gone");
        client_end
    }

    pub async fn stop(self) {
        self.server.shutdown();
        let _ = self.task.await;
    }
}

/// Connector dialing whatever accept queue the sender points at.
pub fn connector_to(accept_tx: mpsc::Sender<BoxTransport>) -> Connector {
    connector(move || {
        let accept_tx = accept_tx.clone();
        async move {
            let (client_end, server_end) = memory::pair();
            accept_tx
                .send(Box::new(server_end) as BoxTransport)
                .await
                .map_err(|_| RpcError::ConnectionClosed)?;
            Ok(Box::new(client_end) as BoxTransport)
        }
    })
}

/// A dispatcher with the little service the tests call.
pub fn echo_dispatcher(format: rpc_core::WireFormat) -> ServiceDispatcher {
    let mut dispatcher = ServiceDispatcher::new(format);
    dispatcher.register1("echo", |s: String| async move { Ok::<_, String>(s) });
    dispatcher.register2("add", |a: i64, b: i64| async move { Ok::<_, String>(a + b) });
    dispatcher
}
