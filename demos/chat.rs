//! # Chat Demo
//!
//! Wires up the two bingo streams the way an application composition root
//! would:
//!
//! 1. Log in to an in-memory token store
//! 2. Build `chat` and `game` channels from a base URL
//! 3. Register listeners and connect
//! 4. Send a chat line, then idle until Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start a bingo backend on localhost:8000, then:
//! cargo run --example chat
//!
//! # Override the server URL and token:
//! BINGO_WS_URL=ws://my-server:8000/ws BINGO_TOKEN=ey... cargo run --example chat
//! ```

use bingo_channel_client::{
    kind, AuthTokens, Channel, ChannelConfig, ChannelMessage, MemoryTokenStore,
};

/// Default base URL when `BINGO_WS_URL` is not set.
const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` to watch the reconnect machine at work.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Credentials ─────────────────────────────────────────────────
    // A real application would fill this store from its login flow; the
    // channels only ever read the current access token at connect time.
    let base_url = std::env::var("BINGO_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
    let token = std::env::var("BINGO_TOKEN").unwrap_or_else(|_| "demo-token".to_string());
    let store = MemoryTokenStore::new();
    store.login(AuthTokens::new(token, "demo-refresh"));

    // ── Channels ────────────────────────────────────────────────────
    let chat = Channel::websocket(ChannelConfig::for_stream(&base_url, "chat"));
    let game = Channel::websocket(ChannelConfig::for_stream(&base_url, "game"));

    let _chat_sub = chat.on_message(|msg| match msg.kind.as_str() {
        kind::MESSAGE => tracing::info!("chat: {:?}", msg.data),
        kind::SYSTEM => tracing::info!("notice: {:?}", msg.data),
        other => tracing::debug!("chat ({other}): {:?}", msg.data),
    });
    let _game_sub = game.on_message(|msg| {
        tracing::info!("game ({}): {:?}", msg.kind, msg.data);
    });

    tracing::info!("connecting to {base_url}");
    chat.connect_from(&store);
    game.connect_from(&store);

    // Give the connections a moment, then say hello. If the dial is still
    // in flight the send is simply dropped; delivery is best-effort.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    chat.send(&ChannelMessage::with_data(
        kind::MESSAGE,
        serde_json::json!({"content": "hello from the demo"}),
    ));

    // ── Idle until Ctrl+C ───────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    chat.disconnect();
    game.disconnect();
    Ok(())
}
