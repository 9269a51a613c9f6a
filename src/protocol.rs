//! Message definitions for the [graphql-transport-ws protocol][1], plus the
//! DataSync extension's client-originated `next` frame.
//!
//! Decoding is done in two passes: a minimal envelope pass that only reads
//! the `type` discriminator, then a second pass into the concrete variant.
//! A message that fails the first pass never reaches a variant decoder, and
//! an unrecognised `type` surfaces as [`FrameKind::Unknown`] rather than a
//! decode error, which keeps the codec forward compatible.
//!
//! [1]: https://github.com/enisdenjo/graphql-ws/blob/HEAD/PROTOCOL.md

use std::fmt;

use serde_json::Value;

use crate::{
    error::{Error, ProtocolError},
    graphql::{GraphqlError, Request},
};

/// A `connection_init` frame with a host-typed payload.
///
/// Serialized by hand so an unset payload is omitted entirely; the protocol
/// never sends `"payload": null`.
#[derive(Default, Debug)]
pub struct ConnectionInit<Payload = ()> {
    payload: Option<Payload>,
}

impl<Payload> ConnectionInit<Payload> {
    /// Constructs a `connection_init` frame.
    pub fn new(payload: Option<Payload>) -> Self {
        ConnectionInit { payload }
    }
}

impl<Payload> serde::Serialize for ConnectionInit<Payload>
where
    Payload: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "connection_init")?;
        if self.payload.is_some() {
            map.serialize_entry("payload", &self.payload)?;
        }
        map.end()
    }
}

/// Frames travelling client → server.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the session, optionally carrying an auth payload
    ConnectionInit {
        /// The opaque payload handed to the server's auth hook
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Starts an operation under a client-chosen id
    Subscribe {
        /// Client-chosen operation id
        id: String,
        /// The request to execute
        payload: Request,
    },
    /// Cancels an operation, or ends the session in the baseline profile
    Complete {
        /// The operation id
        id: String,
    },
    /// DataSync only: a pre-computed result pushed back to the server
    Next {
        /// Freshly generated id, uncorrelated with any `subscribe`
        id: String,
        /// The pushed GraphQL result object
        payload: Value,
    },
}

/// Frames travelling server → client.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a `connection_init`
    ConnectionAck {
        /// Optional server-provided session metadata
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Map<String, Value>>,
    },
    /// One execution result for an operation
    Next {
        /// The operation id
        id: String,
        /// The GraphQL result object
        payload: Value,
    },
    /// Terminates an operation with the ordered list of errors
    Error {
        /// The operation id
        id: String,
        /// The errors, in the order the source produced them
        payload: Vec<GraphqlError>,
    },
    /// Terminates an operation normally
    Complete {
        /// The operation id
        id: String,
    },
}

/// The frame vocabulary, as discovered by the envelope pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// `connection_init`
    ConnectionInit,
    /// `connection_ack`
    ConnectionAck,
    /// `subscribe`
    Subscribe,
    /// `next`
    Next,
    /// `error`
    Error,
    /// `complete`
    Complete,
    /// Anything else; always a protocol error to act on
    Unknown,
}

impl FrameKind {
    fn from_type(kind: &str) -> FrameKind {
        match kind {
            "connection_init" => FrameKind::ConnectionInit,
            "connection_ack" => FrameKind::ConnectionAck,
            "subscribe" => FrameKind::Subscribe,
            "next" => FrameKind::Next,
            "error" => FrameKind::Error,
            "complete" => FrameKind::Complete,
            _ => FrameKind::Unknown,
        }
    }

    /// The wire spelling of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::ConnectionInit => "connection_init",
            FrameKind::ConnectionAck => "connection_ack",
            FrameKind::Subscribe => "subscribe",
            FrameKind::Next => "next",
            FrameKind::Error => "error",
            FrameKind::Complete => "complete",
            FrameKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(serde::Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Some transports re-deliver their own close handshake as a text frame
/// beginning with the close code. Such frames must be dropped before they
/// reach the JSON decoder.
pub fn is_close_echo(text: &str) -> bool {
    text.starts_with("44")
}

/// First decode pass: discover the frame kind without committing to a shape.
pub fn sniff(text: &str) -> Result<FrameKind, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|_| ProtocolError::InvalidEncoding)?;

    match envelope.kind {
        None => Err(ProtocolError::NoType),
        Some(kind) => Ok(FrameKind::from_type(&kind)),
    }
}

/// Decodes an inbound frame on the server side.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    match sniff(text)? {
        kind @ (FrameKind::ConnectionInit
        | FrameKind::Subscribe
        | FrameKind::Complete
        | FrameKind::Next) => serde_json::from_str(text)
            .map_err(|_| ProtocolError::InvalidRequestFormat(kind)),
        _ => Err(ProtocolError::InvalidType),
    }
}

/// Decodes an inbound frame on the client side.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    match sniff(text)? {
        kind @ (FrameKind::ConnectionAck
        | FrameKind::Next
        | FrameKind::Error
        | FrameKind::Complete) => serde_json::from_str(text)
            .map_err(|_| ProtocolError::InvalidResponseFormat(kind)),
        _ => Err(ProtocolError::InvalidType),
    }
}

pub(crate) fn to_text(message: &impl serde::Serialize) -> Result<String, Error> {
    serde_json::to_string(message).map_err(|error| Error::Serializing(error.to_string()))
}
