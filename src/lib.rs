//! # graphql-ws-engine
//!
//! graphql-ws-engine implements both peer state machines of the
//! [graphql-transport-ws protocol][protocol] — the server side and the
//! client side — over an opaque text transport, together with the DataSync
//! extension that lets a client push pre-computed results back to the
//! server while a subscription is ongoing.
//!
//! The crate deliberately stops at the protocol: it does not speak
//! websockets (that's the host's [`Messenger`]), it does not execute
//! GraphQL (that's the host's [`graphql::Executor`] and
//! [`graphql::Subscriber`]), and it does not pick an async runtime (tasks
//! are spawned through whatever `futures::task::Spawn` handle the host
//! provides). A ready-made [`Messenger`] for [async-tungstenite][ws] is
//! available behind the `async-tungstenite` feature.
//!
//! A server host wires one [`ServerSession`] per connection:
//!
//! ```no_run
//! # async fn doc(messenger: std::sync::Arc<impl graphql_ws_engine::Messenger>,
//! #              pool: futures::executor::ThreadPool,
//! #              frames: Vec<String>) {
//! use graphql_ws_engine::{graphql, ServerSessionBuilder, SessionConfig};
//!
//! let session = ServerSessionBuilder::new(
//!     |_request: graphql::Request| async move {
//!         Ok::<_, graphql::GraphqlError>(serde_json::json!({ "data": null }))
//!     },
//!     |_request: graphql::Request| async move {
//!         graphql::SubscriptionOutcome::from_errors(vec![graphql::GraphqlError::new(
//!             "subscriptions are not supported here",
//!         )])
//!     },
//! )
//! .config(SessionConfig::baseline())
//! .build(&messenger, pool);
//!
//! for frame in frames {
//!     session.receive(&frame).await;
//! }
//! session.shutdown().await;
//! # }
//! ```
//!
//! [protocol]: https://github.com/enisdenjo/graphql-ws/blob/HEAD/PROTOCOL.md
//! [ws]: https://github.com/sdroege/async-tungstenite

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod error;
mod logging;
mod messenger;
mod server;

pub mod graphql;
pub mod protocol;

#[cfg(feature = "async-tungstenite")]
#[cfg_attr(docsrs, doc(cfg(feature = "async-tungstenite")))]
pub mod native;

pub use client::{ClientSession, ClientSessionBuilder};
pub use error::{Error, ProtocolError};
pub use messenger::Messenger;
pub use server::{
    ClientCompleteAction, ClientNext, ServerSession, ServerSessionBuilder, SessionConfig,
};
