use crate::protocol::FrameKind;

/// A protocol fault that is fatal to the session.
///
/// Every variant carries the close code the peer will see, and `Display`
/// prefixes the diagnostic with that code (`4401: Unauthorized`) so that
/// transports without close-code support still convey it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The message decoded but carried no `type` field
    #[error("4400: message has no type field")]
    NoType,
    /// The `type` field named a frame this peer does not accept
    #[error("4400: invalid message type")]
    InvalidType,
    /// The message was not valid JSON
    #[error("4400: message could not be decoded")]
    InvalidEncoding,
    /// The frame kind was recognised but the request body did not decode
    #[error("4400: invalid {0} request")]
    InvalidRequestFormat(FrameKind),
    /// The frame kind was recognised but the response body did not decode
    #[error("4400: invalid {0} response")]
    InvalidResponseFormat(FrameKind),
    /// The auth hook rejected the `connection_init` payload
    #[error("4401: Unauthorized")]
    Unauthorized,
    /// An operation frame arrived before an accepted `connection_init`
    #[error("4401: session has not been initialised")]
    NotInitialized,
    /// A `subscribe` reused the id of an operation that is still active
    #[error("4409: subscriber for {0} already exists")]
    SubscriberAlreadyExists(String),
    /// A second `connection_init` arrived on an initialised session
    #[error("4429: too many initialisation requests")]
    TooManyInitRequests,
    /// The subscriber resolved without a stream where one was required
    #[error("4500: subscriber did not produce a stream")]
    InternalStreamIssue,
    /// A host-supplied error forwarded with a numeric code
    #[error("4500: {0}")]
    Graphql(String),
}

impl ProtocolError {
    /// The close code transmitted alongside this error.
    pub fn close_code(&self) -> u16 {
        match self {
            ProtocolError::NoType
            | ProtocolError::InvalidType
            | ProtocolError::InvalidEncoding
            | ProtocolError::InvalidRequestFormat(_)
            | ProtocolError::InvalidResponseFormat(_) => 4400,
            ProtocolError::Unauthorized | ProtocolError::NotInitialized => 4401,
            ProtocolError::SubscriberAlreadyExists(_) => 4409,
            ProtocolError::TooManyInitRequests => 4429,
            ProtocolError::InternalStreamIssue | ProtocolError::Graphql(_) => 4500,
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Error type for the engine API surface
pub enum Error {
    /// A protocol fault
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Serializing error
    #[error("couldn't serialize message, reason: {0}")]
    Serializing(String),
    /// Task spawn error
    #[error("couldn't spawn task, reason: {0}")]
    Spawn(String),
}
