//! Server→client event push.
//!
//! Server side: [`CallbackHub`] keeps, per connection, the set of subscribed
//! event names and the sending half of that connection's outbound queue. When
//! the bound service raises an event, the hub serializes it once and enqueues
//! a `Callback` message for every authorized, subscribed connection. Delivery
//! is fire-and-forget: the outbound queue is bounded and a full queue drops
//! the event for that connection with a warning — a stalled client cannot
//! grow server memory without bound. Per-connection FIFO order is preserved
//! by the queue; there is no ordering across connections.
//!
//! Client side: [`CallbackRegistry`] maps event names to local handlers. A
//! handler failure (including a panic) is caught and logged; it never
//! interrupts the receive loop or other events.

use crate::core::message::{CallbackEvent, Message, MessageKind};
use crate::core::serializer::{ParamList, WireFormat};
use crate::error::{constants, RpcError, Result};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

struct ConnectionSlot {
    subscriptions: HashSet<String>,
    outbound: mpsc::Sender<Message>,
}

/// Per-connection subscription table and outbound fan-out, shared by the
/// server and the bound service.
#[derive(Default)]
pub struct CallbackHub {
    format: WireFormat,
    connections: Mutex<HashMap<Uuid, ConnectionSlot>>,
}

impl CallbackHub {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, ConnectionSlot>>> {
        self.connections
            .lock()
            .map_err(|_| RpcError::Protocol(constants::ERR_CALLBACK_LOCK.into()))
    }

    /// Attach an authorized connection's outbound queue.
    pub fn attach(&self, connection_id: Uuid, outbound: mpsc::Sender<Message>) -> Result<()> {
        self.lock()?.insert(
            connection_id,
            ConnectionSlot {
                subscriptions: HashSet::new(),
                outbound,
            },
        );
        Ok(())
    }

    /// Remove a connection on disconnect.
    pub fn detach(&self, connection_id: Uuid) -> Result<()> {
        self.lock()?.remove(&connection_id);
        Ok(())
    }

    pub fn subscribe(&self, connection_id: Uuid, event: &str) -> Result<()> {
        if let Some(slot) = self.lock()?.get_mut(&connection_id) {
            slot.subscriptions.insert(event.to_string());
        }
        Ok(())
    }

    pub fn unsubscribe(&self, connection_id: Uuid, event: &str) -> Result<()> {
        if let Some(slot) = self.lock()?.get_mut(&connection_id) {
            slot.subscriptions.remove(event);
        }
        Ok(())
    }

    /// Raise an event with pre-serialized arguments. Use
    /// [`ParamList`] to build them:
    ///
    /// ```ignore
    /// hub.raise("price_changed", ParamList::new(hub.format()).push(&42u64)?)?;
    /// ```
    pub fn raise(&self, event: &str, args: ParamList) -> Result<()> {
        let payload = self.format.to_bytes(&CallbackEvent {
            name: event.to_string(),
            args: args.into_vec(),
        })?;

        let connections = self.lock()?;
        for (id, slot) in connections.iter() {
            if !slot.subscriptions.contains(event) {
                continue;
            }
            let message = Message::new(MessageKind::Callback, payload.clone());
            match slot.outbound.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = %id, %event, "outbound queue full, dropping callback");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = %id, %event, "connection gone, callback dropped");
                }
            }
        }
        Ok(())
    }

    /// Number of attached connections subscribed to `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.lock()
            .map(|map| {
                map.values()
                    .filter(|slot| slot.subscriptions.contains(event))
                    .count()
            })
            .unwrap_or(0)
    }
}

type Handler = Arc<dyn Fn(Vec<Vec<u8>>) + Send + Sync>;

/// Client-side table of local event handlers, keyed by event name.
#[derive(Default)]
pub struct CallbackRegistry {
    format: WireFormat,
    handlers: RwLock<HashMap<String, Handler>>,
}

impl CallbackRegistry {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a raw handler receiving the serialized argument sequence.
    pub fn on_raw<F>(&self, event: &str, handler: F) -> Result<()>
    where
        F: Fn(Vec<Vec<u8>>) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .map_err(|_| RpcError::Protocol(constants::ERR_CALLBACK_LOCK.into()))?
            .insert(event.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Register a typed single-argument handler. Decode failures are logged
    /// and dropped, matching fire-and-forget delivery.
    pub fn on<T, F>(&self, event: &str, handler: F) -> Result<()>
    where
        T: DeserializeOwned + Default + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let format = self.format;
        let name = event.to_string();
        self.on_raw(event, move |args| {
            let Some(first) = args.first() else {
                warn!(event = %name, "callback arrived without arguments");
                return;
            };
            match format.from_bytes_or_default::<T>(first) {
                Ok(value) => handler(value),
                Err(e) => warn!(event = %name, error = %e, "failed to decode callback argument"),
            }
        })
    }

    /// Invoke the handler registered for this event, if any. Failures are
    /// contained here; the receive loop never sees them.
    pub fn dispatch(&self, event: CallbackEvent) {
        let handler = match self.handlers.read() {
            Ok(map) => map.get(&event.name).cloned(),
            Err(_) => {
                error!("{}", constants::ERR_CALLBACK_LOCK);
                return;
            }
        };
        let Some(handler) = handler else {
            debug!(event = %event.name, "no handler registered, callback dropped");
            return;
        };
        let name = event.name.clone();
        if catch_unwind(AssertUnwindSafe(|| handler(event.args))).is_err() {
            error!(event = %name, "callback handler panicked");
        }
    }

    /// Helper for the typed `raise` path on tests and local loops.
    pub fn format(&self) -> WireFormat {
        self.format
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event<T: Serialize>(format: WireFormat, name: &str, arg: &T) -> CallbackEvent {
        CallbackEvent {
            name: name.to_string(),
            args: vec![format.to_bytes(arg).unwrap()],
        }
    }

    #[test]
    fn typed_handler_receives_decoded_argument() {
        let format = WireFormat::Bincode;
        let registry = CallbackRegistry::new(format);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        registry
            .on("tick", move |n: usize| {
                counter.fetch_add(n, Ordering::SeqCst);
            })
            .unwrap();

        registry.dispatch(event(format, "tick", &5usize));
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn unknown_event_is_dropped_silently() {
        let registry = CallbackRegistry::new(WireFormat::Bincode);
        registry.dispatch(CallbackEvent {
            name: "nobody_listens".into(),
            args: vec![],
        });
    }

    #[test]
    fn panicking_handler_does_not_poison_the_registry() {
        let format = WireFormat::Bincode;
        let registry = CallbackRegistry::new(format);
        registry
            .on("bad", |_: u32| panic!("handler bug"))
            .unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        registry
            .on("good", move |_: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        registry.dispatch(event(format, "bad", &1u32));
        // Later events still dispatch.
        registry.dispatch(event(format, "good", &1u32));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hub_delivers_only_to_subscribed_connections() {
        let format = WireFormat::Bincode;
        let hub = CallbackHub::new(format);
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();
        hub.attach(conn_a, tx_a).unwrap();
        hub.attach(conn_b, tx_b).unwrap();
        hub.subscribe(conn_a, "alert").unwrap();

        hub.raise("alert", ParamList::new(format).push(&1u8).unwrap())
            .unwrap();

        let msg = rx_a.try_recv().unwrap();
        assert_eq!(msg.kind, MessageKind::Callback);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_the_event_for_that_connection() {
        let format = WireFormat::Bincode;
        let hub = CallbackHub::new(format);
        let (tx, mut rx) = mpsc::channel(1);
        let conn = Uuid::new_v4();
        hub.attach(conn, tx).unwrap();
        hub.subscribe(conn, "burst").unwrap();

        hub.raise("burst", ParamList::new(format)).unwrap();
        hub.raise("burst", ParamList::new(format)).unwrap(); // dropped, queue full

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_and_detach_stop_delivery() {
        let format = WireFormat::Bincode;
        let hub = CallbackHub::new(format);
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Uuid::new_v4();
        hub.attach(conn, tx).unwrap();
        hub.subscribe(conn, "news").unwrap();
        assert_eq!(hub.subscriber_count("news"), 1);

        hub.unsubscribe(conn, "news").unwrap();
        hub.raise("news", ParamList::new(format)).unwrap();
        assert!(rx.try_recv().is_err());

        hub.detach(conn).unwrap();
        assert_eq!(hub.subscriber_count("news"), 0);
    }
}
