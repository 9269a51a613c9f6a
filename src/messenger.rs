//! The transport seam the engines write to.

/// An opaque duplex text transport, typically one websocket connection.
///
/// The host owns the transport and its `Arc`; each engine keeps only a
/// `Weak` back-reference, because the host's transport loop outlives the
/// engine and strongly captures it through the receive path. Frames sent
/// after the transport is gone are silently dropped.
///
/// The inverse direction is not part of this trait: the host's receive loop
/// calls the engine's `receive` once per inbound text frame, serialized per
/// connection.
pub trait Messenger: Send + Sync + 'static {
    /// Enqueues a text frame for transmission. Non-blocking; delivery is
    /// FIFO per session.
    fn send(&self, text: String);

    /// Transmits a diagnostic and signals the close code to the peer,
    /// closing the transport.
    fn error(&self, message: String, code: u16);

    /// Initiates transport shutdown.
    fn close(&self);
}
