//! Server-side request processing.
//!
//! The bound service's operation surface is an explicit registration table
//! built once at bind time: `(name, arity)` entries holding an invocation
//! thunk. Only closed signatures are registrable, so dynamic resolution never
//! sees a generic operation.
//!
//! Resolution of an incoming request: same name, same arity as the supplied
//! parameters, every parameter byte-sequence deserializable to the declared
//! parameter type. A thunk whose parameter decoding fails reports "no match"
//! and resolution moves on; the first unambiguous match wins; no candidate
//! yields `BadRequest`. Any fault raised by a handler is caught and converted
//! to `InternalServerError` — it never escapes the connection's processing
//! loop.
//!
//! Three return shapes are covered by one registration family: handlers are
//! async closures returning `Result<R, String>`. A synchronous value is an
//! immediately-ready future, async-void is `R = ()` (success reported only on
//! completion), async-value is awaited and serialized into the response.
//!
//! Property access and event subscription ride on the same mechanism by name
//! convention: `get_<name>`/`set_<name>` operations registered by
//! [`ServiceDispatcher::register_property`], and `subscribe_<event>` /
//! `unsubscribe_<event>` requests recognized by
//! [`ServiceDispatcher::subscription_request`] for events declared up front.

use crate::core::message::{Request, Response};
use crate::core::serializer::WireFormat;
use crate::error::constants;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Result of attempting one registered thunk.
pub enum DispatchOutcome {
    /// Invocation succeeded; serialized return value.
    Ok(Vec<u8>),
    /// Parameters did not decode to this signature; try the next candidate.
    NoMatch,
    /// The handler itself failed; becomes `InternalServerError`.
    Err(String),
}

type Thunk = Arc<dyn Fn(Vec<Vec<u8>>) -> BoxFuture<'static, DispatchOutcome> + Send + Sync>;

struct MethodEntry {
    arity: usize,
    thunk: Thunk,
}

/// Parsed subscription convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// The bound service's dispatch table. Built mutably at bind time, then
/// shared immutably (`Arc`) by every connection.
pub struct ServiceDispatcher {
    format: WireFormat,
    methods: HashMap<String, Vec<MethodEntry>>,
    events: HashSet<String>,
}

macro_rules! register_methods {
    ($(#[$doc:meta])* $fn_name:ident => $( $ty:ident / $var:ident ),* ) => {
        $(#[$doc])*
        pub fn $fn_name<$($ty,)* R, F, Fut>(&mut self, name: &str, handler: F)
        where
            $($ty: DeserializeOwned + Default + Send + 'static,)*
            R: Serialize + Send + 'static,
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: std::future::Future<Output = std::result::Result<R, String>> + Send + 'static,
        {
            let format = self.format;
            let handler = Arc::new(handler);
            let arity: usize = 0 $(+ { let _ = stringify!($ty); 1 })*;
            let thunk: Thunk = Arc::new(move |params: Vec<Vec<u8>>| {
                let handler = handler.clone();
                async move {
                    #[allow(unused_mut, unused_variables)]
                    let mut iter = params.into_iter();
                    $(
                        let $var: $ty =
                            match iter.next().and_then(|p| format.from_bytes_or_default(&p).ok()) {
                                Some(value) => value,
                                None => return DispatchOutcome::NoMatch,
                            };
                    )*
                    match handler($($var),*).await {
                        Ok(value) => match format.to_bytes(&value) {
                            Ok(bytes) => DispatchOutcome::Ok(bytes),
                            Err(e) => DispatchOutcome::Err(e.to_string()),
                        },
                        Err(detail) => DispatchOutcome::Err(detail),
                    }
                }
                .boxed()
            });
            self.insert(name, arity, thunk);
        }
    };
}

impl ServiceDispatcher {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            methods: HashMap::new(),
            events: HashSet::new(),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    fn insert(&mut self, name: &str, arity: usize, thunk: Thunk) {
        self.methods
            .entry(name.to_string())
            .or_default()
            .push(MethodEntry { arity, thunk });
    }

    register_methods!(
        /// Register a zero-parameter operation.
        register0 =>
    );
    register_methods!(
        /// Register a one-parameter operation.
        register1 => A / a
    );
    register_methods!(
        /// Register a two-parameter operation.
        register2 => A / a, B / b
    );
    register_methods!(
        /// Register a three-parameter operation.
        register3 => A / a, B / b, C / c
    );
    register_methods!(
        /// Register a four-parameter operation.
        register4 => A / a, B / b, C / c, D / d
    );

    /// Expose a property through `get_<name>` / `set_<name>` operations over
    /// a shared cell.
    pub fn register_property<T>(&mut self, name: &str, cell: Arc<RwLock<T>>)
    where
        T: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static,
    {
        let getter_cell = cell.clone();
        self.register0(&format!("get_{name}"), move || {
            let cell = getter_cell.clone();
            async move {
                cell.read()
                    .map(|guard| guard.clone())
                    .map_err(|_| "property lock poisoned".to_string())
            }
        });
        self.register1(&format!("set_{name}"), move |value: T| {
            let cell = cell.clone();
            async move {
                cell.write()
                    .map(|mut guard| *guard = value)
                    .map_err(|_| "property lock poisoned".to_string())
            }
        });
    }

    /// Declare an event that connections may subscribe to by name convention.
    pub fn declare_event(&mut self, name: &str) {
        self.events.insert(name.to_string());
    }

    pub fn is_event(&self, name: &str) -> bool {
        self.events.contains(name)
    }

    /// Recognize a `subscribe_<event>` / `unsubscribe_<event>` request for a
    /// declared event. Undeclared event names fall through to regular method
    /// resolution (and typically end as `BadRequest`).
    pub fn subscription_request<'m>(
        &self,
        method: &'m str,
    ) -> Option<(SubscriptionAction, &'m str)> {
        if let Some(event) = method.strip_prefix("subscribe_") {
            if self.events.contains(event) {
                return Some((SubscriptionAction::Subscribe, event));
            }
        }
        if let Some(event) = method.strip_prefix("unsubscribe_") {
            if self.events.contains(event) {
                return Some((SubscriptionAction::Unsubscribe, event));
            }
        }
        None
    }

    /// Resolve and execute a request. Every failure mode comes back as a
    /// `Response`; this function never errors and never panics the loop.
    pub async fn dispatch(&self, request: &Request) -> Response {
        let Some(entries) = self.methods.get(&request.method) else {
            return Response::bad_request(format!(
                "{}: {}",
                constants::ERR_UNKNOWN_METHOD,
                request.method
            ));
        };

        for entry in entries.iter().filter(|e| e.arity == request.params.len()) {
            match (entry.thunk)(request.params.clone()).await {
                DispatchOutcome::Ok(payload) => return Response::success(payload),
                DispatchOutcome::NoMatch => continue,
                DispatchOutcome::Err(detail) => {
                    warn!(method = %request.method, %detail, "service invocation failed");
                    return Response::server_error(detail);
                }
            }
        }

        Response::bad_request(format!(
            "{}: {}/{}",
            constants::ERR_NO_MATCHING_OVERLOAD,
            request.method,
            request.params.len()
        ))
    }
}
