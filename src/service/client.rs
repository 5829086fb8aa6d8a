//! Client runtime: connection ownership, correlation, and the reconnection
//! supervisor.
//!
//! A connected client is three cooperating pieces sharing [`ClientShared`]:
//! - the connection task, which owns the transport and the session cipher,
//!   multiplexes the outbound queue against the receive loop, and exits with
//!   a [`ConnExit`] verdict;
//! - the supervisor task, which awaits that verdict, fails outstanding calls,
//!   and — for unexpected losses — drives the backoff schedule from
//!   [`ReconnectOptions`](crate::service::reconnect::ReconnectOptions);
//! - the caller-facing [`RpcClient`] handle, whose send path registers a
//!   pending entry and awaits the correlated response.
//!
//! A failed initial connect is returned to the caller as-is; the supervisor
//! only retries connections that were once established.

use crate::config::ClientConfig;
use crate::core::crypto::{ClientCrypto, ClientEncryptor};
use crate::core::message::{CallbackEvent, Message, MessageKind, Request, Response};
use crate::core::serializer::{ParamList, WireFormat};
use crate::error::{constants, Result, RpcError};
use crate::protocol::callback::CallbackRegistry;
use crate::protocol::handshake::{self, FixedToken, HandshakePhase, NoToken, TokenProvider};
use crate::protocol::pending::PendingRequests;
use crate::service::reconnect::{ReconnectEvent, ReconnectOptions, ReconnectSignals, ReconnectState};
use crate::transport::BoxTransport;
use crate::utils::timeout::{self, with_timeout};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Factory producing a fresh (unconnected) transport per attempt. Called once
/// for the initial connect and once per reconnect attempt.
pub type Connector = Arc<dyn Fn() -> BoxFuture<'static, Result<BoxTransport>> + Send + Sync>;

/// Knobs for one client instance.
#[derive(Clone)]
pub struct ClientOptions {
    pub format: WireFormat,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    pub reconnect: ReconnectOptions,
    pub token: Arc<dyn TokenProvider>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            format: WireFormat::default(),
            connect_timeout: timeout::DEFAULT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            call_timeout: timeout::CALL_TIMEOUT,
            reconnect: ReconnectOptions::default(),
            token: Arc::new(NoToken),
        }
    }
}

impl ClientOptions {
    /// Build options from a configuration section. A configured token string
    /// becomes a [`FixedToken`] provider; absence means no auth.
    pub fn from_config(config: &ClientConfig) -> Self {
        let token: Arc<dyn TokenProvider> = match &config.token {
            Some(token) => Arc::new(FixedToken(token.clone())),
            None => Arc::new(NoToken),
        };
        Self {
            format: WireFormat::default(),
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
            call_timeout: config.call_timeout,
            reconnect: config.reconnect.clone(),
            token,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("format", &self.format)
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("call_timeout", &self.call_timeout)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

struct ClientShared {
    options: ClientOptions,
    connector: Connector,
    pending: PendingRequests,
    callbacks: CallbackRegistry,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    signals: ReconnectSignals,
    user_cancel: CancellationToken,
}

/// A connected RPC client handle. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct RpcClient {
    shared: Arc<ClientShared>,
}

impl RpcClient {
    /// Connect, run the handshake, and start the connection + supervisor
    /// tasks. A failure here is not retried.
    pub async fn connect(connector: Connector, options: ClientOptions) -> Result<Self> {
        let format = options.format;
        let shared = Arc::new(ClientShared {
            connector,
            pending: PendingRequests::new(),
            callbacks: CallbackRegistry::new(format),
            outbound: Mutex::new(None),
            signals: ReconnectSignals::new(),
            user_cancel: CancellationToken::new(),
            options,
        });

        let established = establish(&shared).await?;
        let handle = spawn_connection(&shared, established);
        shared.signals.set_state(ReconnectState::Connected);
        tokio::spawn(supervise(shared.clone(), handle));
        Ok(Self { shared })
    }

    /// Invoke a remote operation with pre-serialized parameters.
    pub async fn call(&self, method: &str, params: ParamList) -> Result<Response> {
        self.call_raw(Request::new(method, params.into_vec())).await
    }

    /// Invoke a remote operation from an already-built request.
    pub async fn call_raw(&self, request: Request) -> Result<Response> {
        let sender = self.outbound()?;
        let payload = self.shared.options.format.to_bytes(&request)?;
        let msg = Message::new(MessageKind::Request, payload);
        let id = msg.id;

        let rx = self.shared.pending.register(id)?;
        if sender.send(msg).await.is_err() {
            self.shared.pending.remove(id)?;
            return Err(RpcError::ConnectionClosed);
        }

        match tokio::time::timeout(self.shared.options.call_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Receiver closed: the connection was lost with the call in flight.
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                // The connection stays up; only this call's entry is removed.
                self.shared.pending.remove(id)?;
                Err(RpcError::Timeout)
            }
        }
    }

    /// Start building a typed request.
    pub fn request(&self, method: &str) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            method: method.to_string(),
            params: ParamList::new(self.shared.options.format),
        }
    }

    /// Subscribe to a server event by name convention.
    pub async fn subscribe(&self, event: &str) -> Result<()> {
        self.request(&format!("subscribe_{event}")).send().await.map(|_| ())
    }

    /// Cancel a subscription.
    pub async fn unsubscribe(&self, event: &str) -> Result<()> {
        self.request(&format!("unsubscribe_{event}")).send().await.map(|_| ())
    }

    /// Register a typed handler for a server-raised event.
    pub fn on<T, F>(&self, event: &str, handler: F) -> Result<()>
    where
        T: DeserializeOwned + Default + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.shared.callbacks.on(event, handler)
    }

    /// The local event handler table.
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.shared.callbacks
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReconnectState {
        *self.shared.signals.state_tx.borrow()
    }

    /// Watch lifecycle state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ReconnectState> {
        self.shared.signals.state_tx.subscribe()
    }

    /// Subscribe to reconnection progress events.
    pub fn reconnect_events(&self) -> broadcast::Receiver<ReconnectEvent> {
        self.shared.signals.events_tx.subscribe()
    }

    /// Calls currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Disconnect deliberately. Cancels any reconnect attempt; the state
    /// settles at `Disconnected`.
    pub fn disconnect(&self) {
        self.shared.user_cancel.cancel();
    }

    fn outbound(&self) -> Result<mpsc::Sender<Message>> {
        self.shared
            .outbound
            .lock()
            .map_err(|_| RpcError::Protocol(constants::ERR_PENDING_LOCK.into()))?
            .clone()
            .ok_or_else(|| RpcError::Transport(constants::ERR_NOT_CONNECTED.into()))
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Typed request builder: serialize arguments one by one, then send.
pub struct RequestBuilder<'a> {
    client: &'a RpcClient,
    method: String,
    params: ParamList,
}

impl RequestBuilder<'_> {
    /// Append one argument.
    pub fn arg<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.params = self.params.push(value)?;
        Ok(self)
    }

    /// Send and return the raw successful payload.
    pub async fn send(self) -> Result<Vec<u8>> {
        self.client
            .call(&self.method, self.params)
            .await?
            .into_result()
    }

    /// Send and decode the result. An empty payload decodes to `T::default()`.
    pub async fn fetch<T: DeserializeOwned + Default>(self) -> Result<T> {
        let format = self.client.shared.options.format;
        let payload = self.send().await?;
        format.from_bytes_or_default(&payload)
    }
}

struct Established {
    transport: BoxTransport,
    encryptor: ClientCrypto,
}

/// Why the connection task exited.
enum ConnExit {
    UserClosed,
    Lost(RpcError),
}

/// Connect a fresh transport and run the full handshake against it.
#[tracing::instrument(skip_all)]
async fn establish(shared: &ClientShared) -> Result<Established> {
    let options = &shared.options;
    let mut transport = (shared.connector)().await?;
    transport.connect(options.connect_timeout).await?;

    let mut encryptor = ClientCrypto::new();
    let mut phase = HandshakePhase::New;
    let outcome = with_timeout(
        handshake_exchange(&mut transport, &mut encryptor, &mut phase, options),
        options.handshake_timeout,
    )
    .await;

    match outcome {
        Ok(()) => {
            phase = HandshakePhase::Ready;
            debug!(?phase, "handshake complete");
            Ok(Established { transport, encryptor })
        }
        Err(e) => {
            debug!(?phase, error = %e, "handshake failed");
            let _ = transport.disconnect().await;
            Err(e)
        }
    }
}

async fn handshake_exchange(
    transport: &mut BoxTransport,
    encryptor: &mut ClientCrypto,
    phase: &mut HandshakePhase,
    options: &ClientOptions,
) -> Result<()> {
    let format = options.format;

    // Key exchange, plaintext envelopes.
    let init = handshake::client_initialization(&*encryptor);
    transport.send_bytes(&init.encode()?).await?;
    *phase = HandshakePhase::KeyExchangeSent;

    let bytes = transport.recv().await?.ok_or(RpcError::ConnectionClosed)?;
    let reply = Message::decode(&bytes)?;
    if reply.id != init.id {
        return Err(RpcError::Protocol("initialization reply id mismatch".into()));
    }
    handshake::client_install_session(encryptor, &reply, format)?;
    *phase = HandshakePhase::KeyExchangeComplete;

    // Authorization, encrypted from here on.
    let auth = handshake::client_authorization(&options.token.get_token(), format)?;
    transport.send_bytes(&encryptor.encrypt(&auth.encode()?)?).await?;
    *phase = HandshakePhase::AuthorizationSent;

    let bytes = transport.recv().await?.ok_or(RpcError::ConnectionClosed)?;
    let reply = Message::decode(&encryptor.decrypt(&bytes)?)?;
    if reply.id != auth.id {
        return Err(RpcError::Protocol("authorization reply id mismatch".into()));
    }
    handshake::client_check_authorization(&reply, format)?;
    *phase = HandshakePhase::Authorized;
    Ok(())
}

fn set_outbound(shared: &ClientShared, sender: Option<mpsc::Sender<Message>>) {
    if let Ok(mut guard) = shared.outbound.lock() {
        *guard = sender;
    }
}

fn spawn_connection(shared: &Arc<ClientShared>, established: Established) -> JoinHandle<ConnExit> {
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    set_outbound(shared, Some(out_tx));
    tokio::spawn(connection_loop(shared.clone(), established, out_rx))
}

async fn connection_loop(
    shared: Arc<ClientShared>,
    mut est: Established,
    mut out_rx: mpsc::Receiver<Message>,
) -> ConnExit {
    let exit = loop {
        tokio::select! {
            _ = shared.user_cancel.cancelled() => break ConnExit::UserClosed,
            outgoing = out_rx.recv() => {
                let Some(msg) = outgoing else {
                    // The slot was cleared; treat as a deliberate close.
                    break ConnExit::UserClosed;
                };
                let frame = match msg.encode().and_then(|raw| est.encryptor.encrypt(&raw)) {
                    Ok(frame) => frame,
                    Err(e) => break ConnExit::Lost(e),
                };
                if let Err(e) = est.transport.send_bytes(&frame).await {
                    break ConnExit::Lost(e);
                }
            }
            received = est.transport.recv() => match received {
                Ok(Some(bytes)) => {
                    if let Err(e) = handle_frame(&shared, &est, &bytes) {
                        break ConnExit::Lost(e);
                    }
                }
                Ok(None) => break ConnExit::Lost(RpcError::ConnectionClosed),
                Err(e) => break ConnExit::Lost(e),
            },
        }
    };
    let _ = est.transport.disconnect().await;
    exit
}

/// Decrypt and route one inbound frame. Undecodable payloads are
/// request-scoped: logged and dropped, the connection survives. An unexpected
/// envelope kind is connection-fatal.
fn handle_frame(shared: &ClientShared, est: &Established, bytes: &[u8]) -> Result<()> {
    let msg = Message::decode(&est.encryptor.decrypt(bytes)?)?;
    let wire = shared.options.format;
    match msg.kind {
        MessageKind::Request => match wire.from_bytes::<Response>(&msg.payload) {
            Ok(response) => {
                let _ = shared.pending.resolve(msg.id, response)?;
            }
            Err(e) => warn!(id = %msg.id, error = %e, "undecodable response dropped"),
        },
        MessageKind::Callback => match wire.from_bytes::<CallbackEvent>(&msg.payload) {
            Ok(event) => shared.callbacks.dispatch(event),
            Err(e) => warn!(error = %e, "undecodable callback dropped"),
        },
        other => {
            return Err(RpcError::Protocol(format!(
                "unexpected {other:?} message from server"
            )))
        }
    }
    Ok(())
}

/// Await the connection task's verdict; on unexpected loss, drive the
/// reconnection schedule.
async fn supervise(shared: Arc<ClientShared>, mut handle: JoinHandle<ConnExit>) {
    loop {
        let exit = match handle.await {
            Ok(exit) => exit,
            Err(_) => ConnExit::Lost(RpcError::ConnectionClosed),
        };
        set_outbound(&shared, None);
        let _ = shared.pending.fail_all();

        match exit {
            ConnExit::UserClosed => {
                shared.signals.set_state(ReconnectState::Disconnected);
                debug!("client disconnected");
                return;
            }
            ConnExit::Lost(error) => {
                warn!(%error, "connection lost");
                shared.signals.set_state(ReconnectState::Disconnected);
                if !shared.options.reconnect.enabled || !error.is_recoverable() {
                    return;
                }
                match reconnect_loop(&shared).await {
                    Some(next) => handle = next,
                    None => return,
                }
            }
        }
    }
}

async fn reconnect_loop(shared: &Arc<ClientShared>) -> Option<JoinHandle<ConnExit>> {
    let policy = shared.options.reconnect.clone();
    let mut attempt: u32 = 0;
    loop {
        shared.signals.set_state(ReconnectState::Reconnecting);
        let delay = policy.delay_for_attempt(attempt);
        shared.signals.emit(ReconnectEvent::Reconnecting {
            attempt: attempt + 1,
            delay,
        });

        tokio::select! {
            _ = shared.user_cancel.cancelled() => {
                shared.signals.set_state(ReconnectState::Disconnected);
                return None;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let outcome = tokio::select! {
            _ = shared.user_cancel.cancelled() => {
                shared.signals.set_state(ReconnectState::Disconnected);
                return None;
            }
            outcome = establish(shared) => outcome,
        };

        match outcome {
            Ok(established) => {
                let handle = spawn_connection(shared, established);
                shared.signals.set_state(ReconnectState::Connected);
                shared.signals.emit(ReconnectEvent::Reconnected);
                info!(attempts = attempt + 1, "reconnected");
                return Some(handle);
            }
            Err(error) => {
                attempt += 1;
                debug!(attempt, %error, "reconnect attempt failed");
                let exhausted = policy.max_attempts != 0 && attempt >= policy.max_attempts;
                if exhausted || !error.is_recoverable() {
                    shared.signals.set_state(ReconnectState::Failed);
                    shared.signals.emit(ReconnectEvent::GaveUp {
                        error: error.to_string(),
                    });
                    return None;
                }
            }
        }
    }
}

/// Wrap an async closure producing transports into a [`Connector`].
pub fn connector<F, Fut>(f: F) -> Connector
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<BoxTransport>> + Send + 'static,
{
    use futures::FutureExt;
    Arc::new(move || f().boxed())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initial_connect_failure_is_not_retried() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        let make = connector(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(RpcError::Transport("refused".into())) }
        });

        let result = RpcClient::connect(make, ClientOptions::default()).await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn options_from_config_map_the_token() {
        let config = ClientConfig {
            token: Some("tkn".into()),
            ..ClientConfig::default()
        };
        let options = ClientOptions::from_config(&config);
        assert_eq!(options.token.get_token(), "tkn");
        assert_eq!(options.call_timeout, config.call_timeout);

        let no_auth = ClientOptions::from_config(&ClientConfig::default());
        assert_eq!(no_auth.token.get_token(), "");
    }
}
