//! Server runtime: one receive loop per accepted connection.
//!
//! The server is transport-agnostic. Acceptors live outside the core: a
//! listener of any kind accepts its own connections, wraps each in a
//! [`Transport`](crate::transport::Transport) implementation, and hands the
//! boxed result through the channel given to [`RpcServer::serve`].
//!
//! Per connection, a single task owns the transport. Writes are funneled
//! through one bounded outbound queue (handshake replies, responses, and
//! callbacks all travel through it), so there is exactly one writer per
//! connection. Requests execute on their own tasks; a slow handler never
//! blocks the connection's receive loop, and responses go out in completion
//! order.
//!
//! Handshake gating: until the key exchange completes, only `Initialization`
//! is meaningful; a `Request` before authorization gets `BadRequest` (not
//! initialized) or `Unauthorized` (initialized but no valid token). A
//! `Callback` or `Unknown` envelope from a client is a protocol violation and
//! closes the connection.

use crate::config::ServerConfig;
use crate::core::crypto::ServerCrypto;
use crate::core::message::{Message, MessageKind, Request, Response};
use crate::core::serializer::WireFormat;
use crate::error::{constants, Result, RpcError};
use crate::protocol::callback::CallbackHub;
use crate::protocol::dispatcher::{ServiceDispatcher, SubscriptionAction};
use crate::protocol::handshake::{self, ConnectionSession, TokenValidator};
use crate::transport::BoxTransport;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The server half of the runtime: accepts transports, runs the handshake,
/// and routes requests to the bound [`ServiceDispatcher`].
pub struct RpcServer {
    dispatcher: Arc<ServiceDispatcher>,
    validator: Arc<dyn TokenValidator>,
    hub: Arc<CallbackHub>,
    config: ServerConfig,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl RpcServer {
    pub fn new(
        dispatcher: ServiceDispatcher,
        validator: Arc<dyn TokenValidator>,
        config: ServerConfig,
    ) -> Self {
        let format = dispatcher.format();
        Self {
            dispatcher: Arc::new(dispatcher),
            validator,
            hub: Arc::new(CallbackHub::new(format)),
            config,
            cancel: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The callback hub the bound service raises events through.
    pub fn callbacks(&self) -> Arc<CallbackHub> {
        self.hub.clone()
    }

    /// Connections currently being served (including handshaking ones).
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Signal every connection loop and the accept loop to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Serve transports arriving on `incoming` until shutdown or the acceptor
    /// closes its sending half.
    pub async fn serve(&self, mut incoming: mpsc::Receiver<BoxTransport>) -> Result<()> {
        info!(max_connections = self.config.max_connections, "server accepting connections");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("server shutting down");
                    return Ok(());
                }
                accepted = incoming.recv() => match accepted {
                    Some(transport) => self.spawn_connection(transport),
                    None => {
                        info!("acceptor closed, server stopping");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Serve one already-accepted transport on its own task.
    pub fn spawn_connection(&self, mut transport: BoxTransport) {
        if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
            warn!("connection limit reached, rejecting");
            tokio::spawn(async move {
                let _ = transport.disconnect().await;
            });
            return;
        }
        self.active.fetch_add(1, Ordering::SeqCst);

        let ctx = ConnectionContext {
            dispatcher: self.dispatcher.clone(),
            validator: self.validator.clone(),
            hub: self.hub.clone(),
            format: self.dispatcher.format(),
            cancel: self.cancel.child_token(),
            queue_depth: self.config.callback_queue_depth,
            handshake_timeout: self.config.handshake_timeout,
        };
        let active = self.active.clone();
        tokio::spawn(async move {
            let id = Uuid::new_v4();
            debug!(connection = %id, "connection accepted");
            if let Err(e) = connection_loop(id, &mut transport, ctx).await {
                debug!(connection = %id, error = %e, "connection closed with error");
            } else {
                debug!(connection = %id, "connection closed");
            }
            let _ = transport.disconnect().await;
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

struct ConnectionContext {
    dispatcher: Arc<ServiceDispatcher>,
    validator: Arc<dyn TokenValidator>,
    hub: Arc<CallbackHub>,
    format: WireFormat,
    cancel: CancellationToken,
    queue_depth: usize,
    handshake_timeout: Duration,
}

fn encode_frame(msg: &Message, session: &ConnectionSession) -> Result<Vec<u8>> {
    let raw = msg.encode()?;
    if session.is_initialized {
        session.encryptor.encrypt(&raw)
    } else {
        Ok(raw)
    }
}

fn decode_frame(bytes: &[u8], session: &ConnectionSession) -> Result<Message> {
    if session.is_initialized {
        Message::decode(&session.encryptor.decrypt(bytes)?)
    } else {
        Message::decode(bytes)
    }
}

/// Receive the next frame; while the handshake is incomplete a deadline
/// applies per step.
async fn recv_frame(
    transport: &mut BoxTransport,
    deadline: Option<Duration>,
) -> Result<Option<Vec<u8>>> {
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, transport.recv()).await {
            Ok(received) => received,
            Err(_) => Err(RpcError::Timeout),
        },
        None => transport.recv().await,
    }
}

#[tracing::instrument(skip_all, fields(connection = %id))]
async fn connection_loop(
    id: Uuid,
    transport: &mut BoxTransport,
    ctx: ConnectionContext,
) -> Result<()> {
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(ctx.queue_depth);
    ctx.hub.attach(id, out_tx.clone())?;
    let mut session = ConnectionSession::new(Box::new(ServerCrypto::new()));

    let result = async {
        loop {
            let deadline = (!session.is_ready()).then_some(ctx.handshake_timeout);
            let frame = tokio::select! {
                _ = ctx.cancel.cancelled() => return Ok(()),
                outgoing = out_rx.recv() => {
                    // All senders are held by this loop and the hub slot for
                    // this connection, so the queue outlives the loop.
                    if let Some(msg) = outgoing {
                        let bytes = encode_frame(&msg, &session)?;
                        transport.send_bytes(&bytes).await?;
                    }
                    continue;
                }
                received = recv_frame(transport, deadline) => received?,
            };
            let Some(bytes) = frame else {
                return Ok(()); // orderly close
            };
            let msg = decode_frame(&bytes, &session)?;

            match msg.kind {
                MessageKind::Initialization => {
                    let reply = handshake::server_initialization_reply(&mut session, &msg, ctx.format)?;
                    // The reply carrying the sealed keys still travels
                    // unencrypted; everything after it is encrypted.
                    let bytes = encode_frame(&reply, &session)?;
                    transport.send_bytes(&bytes).await?;
                    session.is_initialized = true;
                }
                MessageKind::Authorization => {
                    let reply = handshake::server_authorization_reply(
                        &mut session,
                        &msg,
                        ctx.validator.as_ref(),
                        ctx.format,
                    )?;
                    let bytes = encode_frame(&reply, &session)?;
                    transport.send_bytes(&bytes).await?;
                }
                MessageKind::Request => handle_request(id, msg, &session, &ctx, &out_tx).await,
                MessageKind::Callback | MessageKind::Unknown => {
                    return Err(RpcError::Protocol(format!(
                        "unexpected {:?} message from client",
                        msg.kind
                    )));
                }
            }
        }
    }
    .await;

    ctx.hub.detach(id)?;
    result
}

/// Route one `Request` envelope. Every failure mode answers with a
/// `Response`; nothing here closes the connection.
async fn handle_request(
    id: Uuid,
    msg: Message,
    session: &ConnectionSession,
    ctx: &ConnectionContext,
    out_tx: &mpsc::Sender<Message>,
) {
    if !session.is_ready() {
        let response = if session.is_initialized {
            Response::unauthorized(constants::ERR_NOT_AUTHORIZED)
        } else {
            Response::bad_request(constants::ERR_HANDSHAKE_NOT_COMPLETE)
        };
        send_response(ctx.format, out_tx, &msg, response).await;
        return;
    }

    let request: Request = match ctx.format.from_bytes(&msg.payload) {
        Ok(request) => request,
        Err(e) => {
            send_response(ctx.format, out_tx, &msg, Response::bad_request(e.to_string())).await;
            return;
        }
    };

    // Subscription requests mutate per-connection state, so they run inline.
    if let Some((action, event)) = ctx.dispatcher.subscription_request(&request.method) {
        let result = match action {
            SubscriptionAction::Subscribe => ctx.hub.subscribe(id, event),
            SubscriptionAction::Unsubscribe => ctx.hub.unsubscribe(id, event),
        };
        let response = match result {
            Ok(()) => Response::success(Vec::new()),
            Err(e) => Response::server_error(e.to_string()),
        };
        send_response(ctx.format, out_tx, &msg, response).await;
        return;
    }

    // Each request runs as its own task so a slow handler never blocks the
    // receive loop.
    let dispatcher = ctx.dispatcher.clone();
    let out_tx = out_tx.clone();
    let format = ctx.format;
    tokio::spawn(async move {
        let response = dispatcher.dispatch(&request).await;
        send_response(format, &out_tx, &msg, response).await;
    });
}

async fn send_response(
    format: WireFormat,
    out_tx: &mpsc::Sender<Message>,
    request: &Message,
    response: Response,
) {
    match format.to_bytes(&response) {
        Ok(payload) => {
            // A closed queue means the connection is already gone.
            let _ = out_tx.send(request.reply(MessageKind::Request, payload)).await;
        }
        Err(e) => error!(error = %e, "failed to serialize response"),
    }
}
