//! The client-side protocol engine.
//!
//! A [`ClientSession`] emits outbound client frames and dispatches inbound
//! server frames to the callbacks registered at build time. Dispatch is
//! symmetric with the server: envelope pass, variant pass, then the
//! registered callback; decode failures are reported through
//! [`Messenger::error`] and never raised inside user callbacks.
//!
//! The DataSync extension lives in
//! [`add_observable_subscription`][ClientSession::add_observable_subscription]:
//! the only producer of client-originated `next` frames.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, Weak,
};

use futures::{
    future::RemoteHandle,
    task::{Spawn, SpawnExt},
    Stream, StreamExt,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::{Error, ProtocolError},
    graphql::{EventStream, GraphqlError, Request},
    logging::{trace, warning},
    messenger::Messenger,
    protocol::{self, ClientMessage, ConnectionInit, ServerMessage},
};

type AckCallback =
    Arc<dyn Fn(Option<serde_json::Map<String, Value>>, &ClientSession) + Send + Sync>;
type NextCallback = Arc<dyn Fn(String, Value, &ClientSession) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(String, Vec<GraphqlError>, &ClientSession) + Send + Sync>;
type CompleteCallback = Arc<dyn Fn(String, &ClientSession) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_connection_ack: Option<AckCallback>,
    on_next: Option<NextCallback>,
    on_error: Option<ErrorCallback>,
    on_complete: Option<CompleteCallback>,
    on_message: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

/// A client session builder.
///
/// Callback registration is last-write-wins; unregistered callbacks drop
/// their frames.
#[derive(Default)]
pub struct ClientSessionBuilder {
    callbacks: Callbacks,
}

impl ClientSessionBuilder {
    /// Constructs a `ClientSessionBuilder`.
    pub fn new() -> ClientSessionBuilder {
        ClientSessionBuilder::default()
    }

    /// Invoked with the `connection_ack` payload once the server accepts
    /// the handshake.
    pub fn on_connection_ack(
        mut self,
        callback: impl Fn(Option<serde_json::Map<String, Value>>, &ClientSession) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_connection_ack = Some(Arc::new(callback));
        self
    }

    /// Invoked with each `next` frame's operation id and result.
    pub fn on_next(
        mut self,
        callback: impl Fn(String, Value, &ClientSession) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_next = Some(Arc::new(callback));
        self
    }

    /// Invoked with each terminal `error` frame's id and ordered errors.
    pub fn on_error(
        mut self,
        callback: impl Fn(String, Vec<GraphqlError>, &ClientSession) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_error = Some(Arc::new(callback));
        self
    }

    /// Invoked with each terminal `complete` frame's id.
    pub fn on_complete(
        mut self,
        callback: impl Fn(String, &ClientSession) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_complete = Some(Arc::new(callback));
        self
    }

    /// Raw tap on every inbound text frame, before decoding.
    pub fn on_message(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.on_message = Some(Arc::new(callback));
        self
    }

    /// Builds the session around a transport.
    ///
    /// The session holds the messenger weakly; the host keeps the `Arc` and
    /// owns the transport's lifetime. `runtime` is where DataSync publisher
    /// tasks are spawned.
    pub fn build<M: Messenger>(
        self,
        messenger: &Arc<M>,
        runtime: impl Spawn + Send + Sync + 'static,
    ) -> Arc<ClientSession> {
        let messenger: Weak<dyn Messenger> = Arc::downgrade(messenger) as Weak<dyn Messenger>;
        Arc::new(ClientSession {
            messenger,
            runtime: Box::new(runtime),
            callbacks: self.callbacks,
            init_sent: AtomicBool::new(false),
            publishers: Mutex::new(Vec::new()),
        })
    }
}

/// The client-side peer state machine for one session.
pub struct ClientSession {
    messenger: Weak<dyn Messenger>,
    runtime: Box<dyn Spawn + Send + Sync>,
    callbacks: Callbacks,
    init_sent: AtomicBool,
    publishers: Mutex<Vec<RemoteHandle<()>>>,
}

impl ClientSession {
    /// Feeds one inbound text frame through the engine.
    ///
    /// This is the session's receive callback: the host must call it once
    /// per frame, serialized per connection.
    pub fn receive(&self, text: &str) {
        if let Some(on_message) = &self.callbacks.on_message {
            on_message(text);
        }

        if protocol::is_close_echo(text) {
            trace!("dropping re-entered close echo: {text}");
            return;
        }

        match protocol::decode_server_message(text) {
            Ok(message) => self.dispatch(message),
            Err(error) => {
                warning!("inbound frame did not decode: {error}");
                if let Some(messenger) = self.messenger.upgrade() {
                    messenger.error(error.to_string(), error.close_code());
                }
            }
        }
    }

    fn dispatch(&self, message: ServerMessage) {
        match message {
            ServerMessage::ConnectionAck { payload } => {
                if let Some(on_connection_ack) = &self.callbacks.on_connection_ack {
                    on_connection_ack(payload, self);
                }
            }
            ServerMessage::Next { id, payload } => {
                if let Some(on_next) = &self.callbacks.on_next {
                    on_next(id, payload, self);
                }
            }
            ServerMessage::Error { id, payload } => {
                if let Some(on_error) = &self.callbacks.on_error {
                    on_error(id, payload, self);
                }
            }
            ServerMessage::Complete { id } => {
                if let Some(on_complete) = &self.callbacks.on_complete {
                    on_complete(id, self);
                }
            }
        }
    }

    /// Opens the session with an optional host-typed auth payload.
    ///
    /// Must be called exactly once; a second call fails locally rather than
    /// letting the server close with `4429`.
    pub fn send_connection_init<Payload: serde::Serialize>(
        &self,
        payload: Option<Payload>,
    ) -> Result<(), Error> {
        if self.init_sent.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::TooManyInitRequests.into());
        }
        let text = protocol::to_text(&ConnectionInit::new(payload))?;
        self.send_text(text);
        Ok(())
    }

    /// Starts an operation under a client-chosen id.
    pub fn send_subscribe(&self, request: Request, id: impl Into<String>) -> Result<(), Error> {
        let text = protocol::to_text(&ClientMessage::Subscribe {
            id: id.into(),
            payload: request,
        })?;
        self.send_text(text);
        Ok(())
    }

    /// Asks the server to cancel an in-flight operation.
    pub fn send_complete(&self, id: impl Into<String>) -> Result<(), Error> {
        let text = protocol::to_text(&ClientMessage::Complete { id: id.into() })?;
        self.send_text(text);
        Ok(())
    }

    /// DataSync: publishes a host event source as client-originated `next`
    /// frames.
    ///
    /// Each event is emitted under a freshly generated UUID id, never
    /// correlated with any `subscribe`. A failed event closes the transport
    /// with the host error's close code.
    pub fn add_observable_subscription(
        self: &Arc<Self>,
        source: impl Stream<Item = Result<Value, GraphqlError>> + Send + 'static,
    ) -> Result<(), Error> {
        let handle = self
            .runtime
            .spawn_with_handle(publish(Arc::downgrade(self), source.boxed()))
            .map_err(|error| Error::Spawn(error.to_string()))?;
        self.publishers
            .lock()
            .expect("publisher list lock poisoned")
            .push(handle);
        Ok(())
    }

    /// Drains the session, cancelling every DataSync publisher task.
    ///
    /// Hosts must call it when the transport closes from outside.
    pub fn shutdown(&self) {
        let handles = std::mem::take(
            &mut *self
                .publishers
                .lock()
                .expect("publisher list lock poisoned"),
        );
        drop(handles);
    }

    fn send_text(&self, text: String) {
        let Some(messenger) = self.messenger.upgrade() else {
            return;
        };
        trace!("sending: {text}");
        messenger.send(text);
    }
}

async fn publish(session: Weak<ClientSession>, mut source: EventStream) {
    while let Some(event) = source.next().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        match event {
            Ok(value) => {
                let message = ClientMessage::Next {
                    id: Uuid::new_v4().to_string(),
                    payload: value,
                };
                match protocol::to_text(&message) {
                    Ok(text) => session.send_text(text),
                    Err(error) => warning!("couldn't encode pushed result: {error}"),
                }
            }
            Err(error) => {
                let error = ProtocolError::Graphql(error.to_string());
                if let Some(messenger) = session.messenger.upgrade() {
                    messenger.error(error.to_string(), error.close_code());
                }
                return;
            }
        }
    }
}
