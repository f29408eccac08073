//! Error types for the channel client.

use thiserror::Error;

/// Errors that can occur at the transport layer of a channel.
///
/// Most channel-level failures (undecodable inbound messages, sending while
/// disconnected) are deliberately *not* represented here: the client logs
/// and absorbs them instead of surfacing them to callers.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport was used after it was closed locally.
    #[error("transport connection closed")]
    TransportClosed,

    /// Establishing a connection timed out.
    #[error("connect timed out")]
    ConnectTimeout,

    /// An I/O error occurred while establishing a connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for channel transport operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
