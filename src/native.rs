//! Integration with websockets provided by [async-tungstenite][1].
//!
//! [`WebsocketMessenger`] adapts the write half of a connection to the
//! [`Messenger`] contract, and the two drive loops feed the read half into
//! an engine, draining the session when the socket goes away.
//!
//! [1]: https://github.com/sdroege/async-tungstenite

use std::{fmt::Display, sync::Arc};

use async_tungstenite::tungstenite::{self, protocol::CloseFrame};
use futures::{channel::mpsc, Future, Sink, Stream, StreamExt, TryFutureExt};

use crate::{
    client::ClientSession,
    logging::{trace, warning},
    messenger::Messenger,
    server::ServerSession,
};

/// A [`Messenger`] writing to a websocket sink.
///
/// Frames are queued and pumped to the sink by the future returned from
/// [`WebsocketMessenger::new`]; the host must spawn it alongside the
/// session.
pub struct WebsocketMessenger {
    outbound: mpsc::UnboundedSender<tungstenite::Message>,
}

impl WebsocketMessenger {
    /// Wraps the write half of a connection, returning the messenger and
    /// the pump task that owns the sink.
    pub fn new<S>(sink: S) -> (Arc<WebsocketMessenger>, impl Future<Output = ()>)
    where
        S: Sink<tungstenite::Message> + Send + Unpin + 'static,
        S::Error: Display,
    {
        let (outbound, queue) = mpsc::unbounded();

        let pump = queue
            .map(Ok)
            .forward(sink)
            .unwrap_or_else(|error| warning!("error sending message: {error}"));

        (Arc::new(WebsocketMessenger { outbound }), pump)
    }

    fn enqueue(&self, message: tungstenite::Message) {
        // Failure means the pump is gone; frames after close are dropped.
        self.outbound.unbounded_send(message).ok();
    }
}

impl Messenger for WebsocketMessenger {
    fn send(&self, text: String) {
        self.enqueue(tungstenite::Message::Text(text.into()));
    }

    fn error(&self, message: String, code: u16) {
        self.enqueue(tungstenite::Message::Close(Some(CloseFrame {
            code: code.into(),
            reason: message.into(),
        })));
        self.outbound.close_channel();
    }

    fn close(&self) {
        self.enqueue(tungstenite::Message::Close(None));
        self.outbound.close_channel();
    }
}

/// Feeds inbound text frames to a server session until the socket closes,
/// then drains the session.
pub async fn drive_server<S, E>(mut stream: S, session: &Arc<ServerSession>)
where
    S: Stream<Item = Result<tungstenite::Message, E>> + Unpin,
    E: Display,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(tungstenite::Message::Text(text)) => session.receive(text.as_str()).await,
            Ok(tungstenite::Message::Close(frame)) => {
                trace!("socket closed: {frame:?}");
                break;
            }
            Ok(_) => continue,
            Err(error) => {
                warning!("error receiving message: {error}");
                break;
            }
        }
    }
    session.shutdown().await;
}

/// Feeds inbound text frames to a client session until the socket closes,
/// then drains the session.
pub async fn drive_client<S, E>(mut stream: S, session: &Arc<ClientSession>)
where
    S: Stream<Item = Result<tungstenite::Message, E>> + Unpin,
    E: Display,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(tungstenite::Message::Text(text)) => session.receive(text.as_str()),
            Ok(tungstenite::Message::Close(frame)) => {
                trace!("socket closed: {frame:?}");
                break;
            }
            Ok(_) => continue,
            Err(error) => {
                warning!("error receiving message: {error}");
                break;
            }
        }
    }
    session.shutdown();
}
