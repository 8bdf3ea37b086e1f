//! Outbound (client-role) WebSocket connection to a generation backend.
//!
//! `slab-server` only ever accepts WebSocket connections; it never dials
//! one. Grounded instead on
//! `other_examples/6e998bcd_groblegark-coop__crates-mux-src-upstream-bridge.rs.rs`'s
//! `WsBridge`, which dials an upstream WS and forwards frames — the
//! read/write split and graceful-close pattern here follow it directly.

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::ServerError;

pub type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial `address`'s `/ws` endpoint, tagging the connection with
/// `client_id` the way the ComfyUI protocol expects
/// (`?clientId=<id>`), so backend-side progress frames can be
/// attributed back to the originating bridge session.
pub async fn connect(address: &str, client_id: &str) -> Result<BackendStream, ServerError> {
    let scheme_host = if address.starts_with("http://") || address.starts_with("https://") {
        address.replacen("http", "ws", 1)
    } else {
        format!("ws://{address}")
    };
    let url = format!("{scheme_host}/ws?clientId={client_id}");

    let (stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| ServerError::BackendUnavailable(e.to_string()))?;
    Ok(stream)
}

/// Read the next JSON text frame from a backend socket, skipping pings
/// and binary preview frames (ComfyUI interleaves binary preview images
/// with JSON status frames; the progress relay only cares about the
/// latter).
pub async fn next_json_frame(stream: &mut BackendStream) -> Result<Option<serde_json::Value>, ServerError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let value = serde_json::from_str(&text)
                    .map_err(|e| ServerError::Internal(format!("malformed backend frame: {e}")))?;
                return Ok(Some(value));
            }
            Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(Message::Frame(_))) => continue,
            Some(Err(e)) => return Err(ServerError::BackendUnavailable(e.to_string())),
        }
    }
}

/// Close a backend socket, best-effort.
pub async fn close(stream: &mut BackendStream) {
    let _ = stream.close(None).await;
}
