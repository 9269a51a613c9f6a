//! The server-side protocol engine.
//!
//! A [`ServerSession`] interprets inbound client frames, drives the host's
//! [`Executor`] and [`Subscriber`], and writes server frames back through
//! the [`Messenger`]. One session maps to one transport connection; the
//! host's receive loop feeds [`ServerSession::receive`] once per inbound
//! text frame.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use futures::{
    future::{BoxFuture, FutureExt, RemoteHandle},
    lock::Mutex,
    task::{Spawn, SpawnExt},
    Future,
};
use serde_json::Value;

use crate::{
    error::{Error, ProtocolError},
    graphql::{self, Executor, GraphqlError, OperationKind, Request, Subscriber},
    logging::{trace, warning},
    messenger::Messenger,
    protocol::{self, ClientMessage, FrameKind, ServerMessage},
};

mod fanout;

/// What the server does with a client `complete` frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientCompleteAction {
    /// The peer is done with the session: fire `on_exit` and drain every
    /// active operation (baseline profile)
    EndSession,
    /// Cancel only the named operation and keep the session open (DataSync
    /// profile)
    CompleteOperation,
}

/// Per-session behaviour knobs covering the points where the two protocol
/// profiles diverge.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Close the transport after a subscription's terminal `complete`
    pub close_on_subscription_complete: bool,
    /// How to treat a client `complete` frame
    pub client_complete: ClientCompleteAction,
    /// Accept client-originated `next` frames (the DataSync extension);
    /// when false they are a `4400` protocol fault
    pub accept_client_next: bool,
}

impl SessionConfig {
    /// The baseline graphql-transport-ws profile.
    pub fn baseline() -> Self {
        SessionConfig {
            close_on_subscription_complete: true,
            client_complete: ClientCompleteAction::EndSession,
            accept_client_next: false,
        }
    }

    /// The DataSync profile: client `next` frames are accepted and the
    /// session survives individual operations.
    pub fn data_sync() -> Self {
        SessionConfig {
            close_on_subscription_complete: false,
            client_complete: ClientCompleteAction::CompleteOperation,
            accept_client_next: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::baseline()
    }
}

/// A client-pushed `next` frame, as handed to the DataSync hook.
#[derive(Debug, Clone)]
pub struct ClientNext {
    /// The client-generated frame id
    pub id: String,
    /// The pushed GraphQL result object
    pub payload: Value,
}

type AuthHook =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<(), ProtocolError>> + Send + Sync>;
type NextHook = Arc<
    dyn Fn(ClientNext, Arc<ServerSession>) -> BoxFuture<'static, Result<(), GraphqlError>>
        + Send
        + Sync,
>;

struct Hooks {
    auth: AuthHook,
    on_exit: Option<Arc<dyn Fn() + Send + Sync>>,
    on_message: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    on_operation_complete: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    on_operation_error: Option<Arc<dyn Fn(&str, &[GraphqlError]) + Send + Sync>>,
    on_next: Option<NextHook>,
}

impl Default for Hooks {
    fn default() -> Self {
        Hooks {
            auth: Arc::new(|_| futures::future::ready(Ok(())).boxed()),
            on_exit: None,
            on_message: None,
            on_operation_complete: None,
            on_operation_error: None,
            on_next: None,
        }
    }
}

/// A server session builder.
///
/// Hook registration is last-write-wins; every hook is optional and
/// defaults to a no-op (the auth hook defaults to acceptance).
pub struct ServerSessionBuilder {
    executor: Arc<dyn Executor>,
    subscriber: Arc<dyn Subscriber>,
    config: SessionConfig,
    ack_payload: Option<serde_json::Map<String, Value>>,
    hooks: Hooks,
}

impl ServerSessionBuilder {
    /// Constructs a builder around the host's execution seams.
    pub fn new(
        executor: impl Executor + 'static,
        subscriber: impl Subscriber + 'static,
    ) -> ServerSessionBuilder {
        ServerSessionBuilder {
            executor: Arc::new(executor),
            subscriber: Arc::new(subscriber),
            config: SessionConfig::default(),
            ack_payload: None,
            hooks: Hooks::default(),
        }
    }

    /// Selects the protocol profile and behaviour knobs.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a payload to the `connection_ack` frame.
    pub fn ack_payload(mut self, payload: serde_json::Map<String, Value>) -> Self {
        self.ack_payload = Some(payload);
        self
    }

    /// Registers the auth hook, typed over the `connection_init` payload.
    ///
    /// A payload that fails to decode into `P` closes the session with
    /// `4400`; a hook rejection closes it with `4401`.
    pub fn auth<P, F, Fut>(mut self, hook: F) -> Self
    where
        P: serde::de::DeserializeOwned,
        F: Fn(Option<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), GraphqlError>> + Send + 'static,
    {
        self.hooks.auth = Arc::new(move |payload| {
            let decoded = match payload.map(serde_json::from_value::<P>).transpose() {
                Ok(decoded) => decoded,
                Err(error) => {
                    warning!("connection_init payload did not decode: {error}");
                    return futures::future::ready(Err(ProtocolError::InvalidRequestFormat(
                        FrameKind::ConnectionInit,
                    )))
                    .boxed();
                }
            };
            let fut = hook(decoded);
            async move {
                fut.await.map_err(|error| {
                    trace!("auth hook rejected the session: {error}");
                    ProtocolError::Unauthorized
                })
            }
            .boxed()
        });
        self
    }

    /// Invoked when the peer completes the session.
    pub fn on_exit(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_exit = Some(Arc::new(hook));
        self
    }

    /// Raw tap on every inbound text frame, before decoding.
    pub fn on_message(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_message = Some(Arc::new(hook));
        self
    }

    /// Invoked whenever an operation reaches a terminal `complete`.
    pub fn on_operation_complete(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_operation_complete = Some(Arc::new(hook));
        self
    }

    /// Invoked whenever an operation reaches a terminal `error`.
    pub fn on_operation_error(
        mut self,
        hook: impl Fn(&str, &[GraphqlError]) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_operation_error = Some(Arc::new(hook));
        self
    }

    /// Registers the DataSync handler for client-pushed `next` frames.
    ///
    /// A failed future surfaces as an `error` frame tagged with that frame's
    /// id; it does not end the session.
    pub fn on_next<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ClientNext, Arc<ServerSession>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), GraphqlError>> + Send + 'static,
    {
        self.hooks.on_next = Some(Arc::new(move |next, session| hook(next, session).boxed()));
        self
    }

    /// Builds the session around a transport.
    ///
    /// The session holds the messenger weakly; the host keeps the `Arc` and
    /// owns the transport's lifetime. `runtime` is where the session spawns
    /// its per-operation tasks.
    pub fn build<M: Messenger>(
        self,
        messenger: &Arc<M>,
        runtime: impl Spawn + Send + Sync + 'static,
    ) -> Arc<ServerSession> {
        let messenger: Weak<dyn Messenger> = Arc::downgrade(messenger) as Weak<dyn Messenger>;
        Arc::new(ServerSession {
            messenger,
            executor: self.executor,
            subscriber: self.subscriber,
            runtime: Box::new(runtime),
            config: self.config,
            ack_payload: self.ack_payload,
            hooks: self.hooks,
            state: Mutex::new(SessionState::default()),
        })
    }
}

#[derive(Default)]
struct SessionState {
    initialized: bool,
    closed: bool,
    operations: HashMap<String, Operation>,
}

struct Operation {
    kind: OperationKind,
    task: Option<RemoteHandle<()>>,
}

enum Terminator {
    Complete,
    Error(Vec<GraphqlError>),
}

/// The server-side peer state machine for one session.
pub struct ServerSession {
    messenger: Weak<dyn Messenger>,
    executor: Arc<dyn Executor>,
    subscriber: Arc<dyn Subscriber>,
    runtime: Box<dyn Spawn + Send + Sync>,
    config: SessionConfig,
    ack_payload: Option<serde_json::Map<String, Value>>,
    hooks: Hooks,
    state: Mutex<SessionState>,
}

impl ServerSession {
    /// Feeds one inbound text frame through the engine.
    ///
    /// This is the session's receive callback: the host must call it once
    /// per frame, serialized per connection. Decode faults, pre-init
    /// operations and handshake violations are fatal and close the
    /// transport through [`Messenger::error`]; per-operation failures only
    /// emit an `error` frame.
    pub async fn receive(self: &Arc<Self>, text: &str) {
        if let Some(on_message) = &self.hooks.on_message {
            on_message(text);
        }

        if protocol::is_close_echo(text) {
            trace!("dropping re-entered close echo: {text}");
            return;
        }

        match protocol::decode_client_message(text) {
            Ok(message) => self.dispatch(message).await,
            Err(error) => self.fail(error).await,
        }
    }

    async fn dispatch(self: &Arc<Self>, message: ClientMessage) {
        match message {
            ClientMessage::ConnectionInit { payload } => self.handle_connection_init(payload).await,
            ClientMessage::Subscribe { id, payload } => self.handle_subscribe(id, payload).await,
            ClientMessage::Complete { id } => self.handle_complete(&id).await,
            ClientMessage::Next { id, payload } => self.handle_client_next(id, payload).await,
        }
    }

    async fn handle_connection_init(&self, payload: Option<Value>) {
        {
            let state = self.state.lock().await;
            if state.initialized {
                drop(state);
                self.fail(ProtocolError::TooManyInitRequests).await;
                return;
            }
        }

        match (self.hooks.auth)(payload).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                state.initialized = true;
                self.send_frame(
                    &state,
                    &ServerMessage::ConnectionAck {
                        payload: self.ack_payload.clone(),
                    },
                );
            }
            Err(error) => self.fail(error).await,
        }
    }

    async fn handle_subscribe(self: &Arc<Self>, id: String, request: Request) {
        let kind = {
            let mut state = self.state.lock().await;
            if !state.initialized {
                drop(state);
                self.fail(ProtocolError::NotInitialized).await;
                return;
            }
            if state.operations.contains_key(&id) {
                drop(state);
                self.fail(ProtocolError::SubscriberAlreadyExists(id)).await;
                return;
            }

            let kind = match graphql::classify(&request) {
                Ok(kind) => kind,
                Err(error) => {
                    self.send_frame(
                        &state,
                        &ServerMessage::Error {
                            id: id.clone(),
                            payload: vec![error.clone()],
                        },
                    );
                    drop(state);
                    if let Some(on_operation_error) = &self.hooks.on_operation_error {
                        on_operation_error(&id, &[error]);
                    }
                    return;
                }
            };

            state
                .operations
                .insert(id.clone(), Operation { kind, task: None });
            kind
        };

        let session = Arc::downgrade(self);
        let task = match kind {
            OperationKind::OneShot => self.spawn(run_one_shot(session, id.clone(), request)),
            OperationKind::Streaming => self.spawn(fanout::run(session, id.clone(), request)),
        };

        match task {
            Ok(handle) => {
                let mut state = self.state.lock().await;
                match state.operations.get_mut(&id) {
                    // The operation may already have finished; dropping the
                    // handle of a finished task is a no-op.
                    Some(operation) => operation.task = Some(handle),
                    None => drop(handle),
                }
            }
            Err(error) => {
                warning!("couldn't spawn operation {id}: {error}");
                let mut state = self.state.lock().await;
                state.operations.remove(&id);
                self.send_frame(
                    &state,
                    &ServerMessage::Error {
                        id,
                        payload: vec![GraphqlError::new("failed to start the operation")],
                    },
                );
            }
        }
    }

    async fn handle_complete(&self, id: &str) {
        {
            let state = self.state.lock().await;
            if !state.initialized {
                drop(state);
                self.fail(ProtocolError::NotInitialized).await;
                return;
            }
        }

        match self.config.client_complete {
            ClientCompleteAction::EndSession => {
                trace!("peer completed the session");
                self.shutdown().await;
                if let Some(on_exit) = &self.hooks.on_exit {
                    on_exit();
                }
            }
            ClientCompleteAction::CompleteOperation => {
                let removed = self.state.lock().await.operations.remove(id);
                // Dropping the handle cancels the fan-out; nothing more may
                // be emitted under this id.
                drop(removed);
                if let Some(on_operation_complete) = &self.hooks.on_operation_complete {
                    on_operation_complete(id);
                }
            }
        }
    }

    async fn handle_client_next(self: &Arc<Self>, id: String, payload: Value) {
        if !self.config.accept_client_next {
            self.fail(ProtocolError::InvalidType).await;
            return;
        }

        {
            let state = self.state.lock().await;
            if !state.initialized {
                drop(state);
                self.fail(ProtocolError::NotInitialized).await;
                return;
            }
        }

        // The push lane carries results, never operations. A payload that
        // parses as a subscription request is a client trying to start a
        // subscription through it.
        if let Ok(request) = serde_json::from_value::<Request>(payload.clone()) {
            if graphql::classify(&request) == Ok(OperationKind::Streaming) {
                let error = GraphqlError::new(
                    ProtocolError::InvalidRequestFormat(FrameKind::Next).to_string(),
                );
                let state = self.state.lock().await;
                self.send_frame(
                    &state,
                    &ServerMessage::Error {
                        id,
                        payload: vec![error],
                    },
                );
                return;
            }
        }

        let hook = match &self.hooks.on_next {
            Some(hook) => hook.clone(),
            None => return,
        };

        if let Err(error) = hook(
            ClientNext {
                id: id.clone(),
                payload,
            },
            Arc::clone(self),
        )
        .await
        {
            let state = self.state.lock().await;
            self.send_frame(
                &state,
                &ServerMessage::Error {
                    id,
                    payload: vec![error],
                },
            );
        }
    }

    /// Drains the session: every active operation's task is cancelled and
    /// no further frames are emitted.
    ///
    /// Called internally on fatal errors and session-ending frames; hosts
    /// must also call it when the transport closes from outside.
    pub async fn shutdown(&self) {
        let handles = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state
                .operations
                .drain()
                .filter_map(|(_, operation)| operation.task)
                .collect::<Vec<_>>()
        };
        drop(handles);
    }

    async fn fail(&self, error: ProtocolError) {
        warning!("fatal protocol error: {error}");
        if let Some(messenger) = self.messenger.upgrade() {
            messenger.error(error.to_string(), error.close_code());
        }
        self.shutdown().await;
    }

    /// Emits a terminal frame for an operation and runs the matching hooks.
    /// No-op when the operation is no longer active.
    async fn finish_operation(&self, id: &str, terminator: Terminator) {
        let mut state = self.state.lock().await;
        let Some(operation) = state.operations.remove(id) else {
            return;
        };
        if let Some(task) = operation.task {
            // The calling task is usually the one being removed here; it
            // must not cancel itself mid-poll.
            task.forget();
        }

        match terminator {
            Terminator::Complete => {
                self.send_frame(&state, &ServerMessage::Complete { id: id.to_string() });
                let closing = operation.kind == OperationKind::Streaming
                    && self.config.close_on_subscription_complete;
                if closing {
                    state.closed = true;
                }
                drop(state);
                if let Some(on_operation_complete) = &self.hooks.on_operation_complete {
                    on_operation_complete(id);
                }
                if closing {
                    self.shutdown().await;
                    self.close_transport();
                }
            }
            Terminator::Error(errors) => {
                self.send_frame(
                    &state,
                    &ServerMessage::Error {
                        id: id.to_string(),
                        payload: errors.clone(),
                    },
                );
                drop(state);
                if let Some(on_operation_error) = &self.hooks.on_operation_error {
                    on_operation_error(id, &errors);
                }
            }
        }
    }

    fn send_frame(&self, state: &SessionState, message: &ServerMessage) {
        if state.closed {
            return;
        }
        let Some(messenger) = self.messenger.upgrade() else {
            return;
        };
        match protocol::to_text(message) {
            Ok(text) => {
                trace!("sending: {text}");
                messenger.send(text);
            }
            Err(error) => warning!("couldn't encode outbound frame: {error}"),
        }
    }

    fn close_transport(&self) {
        if let Some(messenger) = self.messenger.upgrade() {
            messenger.close();
        }
    }

    fn spawn(
        &self,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> Result<RemoteHandle<()>, Error> {
        self.runtime
            .spawn_with_handle(task)
            .map_err(|error| Error::Spawn(error.to_string()))
    }
}

/// Runs a query or mutation to its single result. One-shot sessions are
/// short-lived: the result frames are followed by a transport close.
async fn run_one_shot(session: Weak<ServerSession>, id: String, request: Request) {
    let executor = {
        let Some(session) = session.upgrade() else {
            return;
        };
        Arc::clone(&session.executor)
    };

    let result = executor.execute(request).await;

    let Some(session) = session.upgrade() else {
        return;
    };

    let errors = {
        let mut state = session.state.lock().await;
        let Some(operation) = state.operations.remove(&id) else {
            // Cancelled while the executor ran
            return;
        };
        if let Some(task) = operation.task {
            task.forget();
        }

        let errors = match result {
            Ok(value) => {
                session.send_frame(
                    &state,
                    &ServerMessage::Next {
                        id: id.clone(),
                        payload: value,
                    },
                );
                None
            }
            Err(error) => {
                session.send_frame(
                    &state,
                    &ServerMessage::Error {
                        id: id.clone(),
                        payload: vec![error.clone()],
                    },
                );
                Some(vec![error])
            }
        };
        session.send_frame(&state, &ServerMessage::Complete { id: id.clone() });
        state.closed = true;
        errors
    };

    if let Some(errors) = &errors {
        if let Some(on_operation_error) = &session.hooks.on_operation_error {
            on_operation_error(&id, errors);
        }
    }
    if let Some(on_operation_complete) = &session.hooks.on_operation_complete {
        on_operation_complete(&id);
    }

    session.shutdown().await;
    session.close_transport();
}
