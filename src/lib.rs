//! # Bingo Channel Client
//!
//! Reconnecting realtime channel client for the word-bingo game and chat
//! streams.
//!
//! A [`Channel`] maintains a best-effort live connection to one named
//! stream endpoint, authenticates with a token embedded in the connection
//! URL, routes every decoded inbound message to registered listeners, and
//! survives transient drops with bounded exponential backoff.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement [`Transport`]/[`Connector`] for any
//!   backend; tests script connections without sockets
//! - **WebSocket built-in** — the default `transport-websocket` feature
//!   provides [`WebSocketConnector`](transports::WebSocketConnector)
//! - **Best-effort by design** — failures are logged and absorbed; callers
//!   never see exceptions from `send` or a dropped connection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bingo_channel_client::{Channel, ChannelConfig, ChannelMessage, kind};
//!
//! let chat = Channel::websocket(ChannelConfig::for_stream("ws://localhost:8000/ws", "chat"));
//! let sub = chat.on_message(|msg| println!("[{}] {:?}", msg.kind, msg.data));
//!
//! chat.connect(access_token);
//! chat.send(&ChannelMessage::with_data(kind::MESSAGE, serde_json::json!({"content": "hi"})));
//! ```

pub mod auth;
#[cfg(feature = "tokio-runtime")]
pub mod channel;
pub mod error;
pub mod message;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use auth::{AuthTokens, MemoryTokenStore, TokenStore};
#[cfg(feature = "tokio-runtime")]
pub use channel::{Channel, ChannelConfig, ChannelState, Subscription};
pub use error::ChannelError;
pub use message::{kind, ChannelMessage};
pub use transport::{Connector, Transport};
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
