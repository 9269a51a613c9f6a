//! Bridges a subscription's event source onto the outbound frame channel.
//!
//! One fan-out task runs per streaming operation. It owns the source
//! stream; the session owns the task through a `RemoteHandle` in its
//! operation map, so cancelling the operation (client `complete`, fatal
//! error, session shutdown) drops the source with it.
//!
//! Ordering: `next` frames are emitted in source order, the terminator
//! (`complete` or `error`) is the strictly last frame under the operation's
//! id, and every emission re-checks that the operation is still active
//! while the session lock is held, so a late event can never race a
//! cancellation onto the wire.

use std::sync::{Arc, Weak};

use futures::StreamExt;

use crate::{
    error::ProtocolError,
    graphql::{GraphqlError, Request},
    logging::trace,
    protocol::ServerMessage,
};

use super::{ServerSession, Terminator};

pub(super) async fn run(session: Weak<ServerSession>, id: String, request: Request) {
    let subscriber = {
        let Some(session) = session.upgrade() else {
            return;
        };
        Arc::clone(&session.subscriber)
    };

    let outcome = subscriber.subscribe(request).await;

    let mut stream = match outcome.stream {
        Some(stream) => stream,
        None => {
            // The subscriber resolved without a stream: either validation
            // failed and explained itself, or the resolver is misconfigured.
            let errors = if outcome.errors.is_empty() {
                vec![GraphqlError::new(
                    ProtocolError::InternalStreamIssue.to_string(),
                )]
            } else {
                outcome.errors
            };
            if let Some(session) = session.upgrade() {
                session.finish_operation(&id, Terminator::Error(errors)).await;
            }
            return;
        }
    };

    loop {
        let Some(event) = stream.next().await else {
            trace!("subscription {id} completed");
            if let Some(session) = session.upgrade() {
                session.finish_operation(&id, Terminator::Complete).await;
            }
            return;
        };

        match event {
            Ok(value) => {
                let Some(session) = session.upgrade() else {
                    return;
                };
                let state = session.state.lock().await;
                if !state.operations.contains_key(&id) {
                    // Disposed while the event was in flight
                    return;
                }
                session.send_frame(
                    &state,
                    &ServerMessage::Next {
                        id: id.clone(),
                        payload: value,
                    },
                );
            }
            Err(error) => {
                trace!("subscription {id} failed: {error}");
                if let Some(session) = session.upgrade() {
                    session
                        .finish_operation(&id, Terminator::Error(vec![error]))
                        .await;
                }
                return;
            }
        }
    }
}
