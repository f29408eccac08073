//! Transport abstraction for realtime channels.
//!
//! The [`Transport`] trait defines a bidirectional text message connection
//! between the client and a stream endpoint. Messages are JSON text, so a
//! transport implementation must handle framing internally (WebSocket
//! frames, length-prefixed TCP, ...).
//!
//! Unlike a one-shot client, a [`Channel`](crate::Channel) has to establish
//! connections *repeatedly*: once per explicit `connect` call and once per
//! automatic reconnect attempt. The [`Connector`] trait captures that setup
//! step so the channel can re-dial without knowing transport specifics, and
//! so tests can script connection outcomes.

use async_trait::async_trait;

use crate::error::ChannelError;

/// A bidirectional text message connection to a stream endpoint.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON
/// message; each call to [`recv`](Transport::recv) yields one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the channel
/// polls it inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::TransportSend`] if the message could not be
    /// sent (connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), ChannelError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection closed
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait docs](Transport)).
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations
    /// should still release resources when that happens.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// A factory that establishes [`Transport`] connections to a URL.
///
/// The channel dials through its connector on every explicit `connect` call
/// and on every automatic reconnect attempt, passing the full endpoint URL
/// including the `?token=` query. A failed dial is treated by the channel
/// exactly like an immediately-dropped connection and feeds the backoff
/// schedule.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport this connector produces.
    type Transport: Transport;

    /// Establish a new connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] if the connection cannot be established.
    async fn connect(&self, url: &str) -> Result<Self::Transport, ChannelError>;
}
