//! Socket.IO event channel
//!
//! Keeps a WebSocket to the FinderNate socket server open and forwards the
//! call events (`incoming_call`, `call_declined`, `call_ended`) to the call
//! coordinator in normalized form.

pub mod frame;
pub mod websocket;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::time;
use url::Url;

use crate::auth::Identity;
use crate::calling::coordinator::CallHandle;
use crate::calling::events;
use crate::config::Config;
use frame::Frame;

/// Sessions lasting at least this long reset the reconnect backoff.
const STABLE_SESSION: Duration = Duration::from_secs(60);
const MAX_BACKOFF_SECS: u64 = 64;

/// Run the socket connection with automatic reconnection.
///
/// Reconnects with exponential backoff (1s, 2s, 4s, ... capped at 64s),
/// reset after a stable session. Never returns; the caller aborts the task.
pub async fn run(handle: CallHandle) {
    let mut backoff = 1u64;

    loop {
        let started = Instant::now();
        let reason = match run_session(&handle).await {
            Ok(()) => anyhow::anyhow!("socket closed by server"),
            Err(e) => e,
        };

        if started.elapsed() >= STABLE_SESSION {
            backoff = 1;
        }
        tracing::warn!(
            "Socket disconnected: {:#}. Reconnecting in {}s...",
            reason,
            backoff
        );
        time::sleep(Duration::from_secs(backoff)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
    }
}

/// Build the Engine.IO WebSocket URL from the configured socket base URL.
pub fn socket_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid socket_url {:?}", base))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => bail!("Unsupported socket_url scheme {:?}", other),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("Cannot use scheme {} for {}", scheme, base))?;
    url.set_path("/socket.io/");
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

/// One connection: open, authenticate, forward events until it drops.
async fn run_session(handle: &CallHandle) -> Result<()> {
    // Reload config each attempt so we pick up refreshed tokens.
    let config = Config::load().context("Failed to load config")?;
    let identity = Identity::from_config(&config)
        .context("No valid credentials. Run `findernate-calls login` first.")?;
    let url = socket_url(&config.socket_url)?;

    let mut ws = websocket::EventSocket::connect(&url).await?;

    let open = ws
        .recv_frame()
        .await?
        .context("Connection closed before open packet")?;
    let info = match frame::parse(&open) {
        Frame::Open(info) => info,
        _ => bail!("Expected Engine.IO open packet, got {}", open),
    };
    tracing::info!("Engine.IO session {} opened", info.sid);

    ws.send_text(&frame::connect_packet(identity.bearer()))
        .await?;

    // The server pings every `ping_interval`; silence past that plus the
    // timeout means the connection is dead.
    let idle_limit = info.ping_interval + info.ping_timeout;

    loop {
        let text = match time::timeout(idle_limit, ws.recv_frame()).await {
            Ok(frame) => frame?,
            Err(_) => bail!("No traffic from server for {:?}", idle_limit),
        };
        let Some(text) = text else {
            return Ok(());
        };

        match frame::parse(&text) {
            Frame::Connected => {
                println!("Socket connected as {}. Listening for calls...", identity.user_id);
            }
            Frame::ConnectError(message) => bail!("Socket auth rejected: {}", message),
            Frame::Event { name, payload } => dispatch(&name, &payload, handle),
            Frame::Disconnect | Frame::Close => return Ok(()),
            Frame::Malformed(reason) => tracing::warn!("Dropping malformed frame ({})", reason),
            Frame::Ping => tracing::debug!("Ping from server"),
            Frame::Open(_) | Frame::Pong | Frame::Other => {}
        }
    }
}

fn dispatch(name: &str, payload: &Value, handle: &CallHandle) {
    match events::normalize_socket_event(name, payload) {
        Ok(Some(event)) => handle.deliver(event),
        Ok(None) => tracing::debug!("Ignoring socket event {}", name),
        Err(e) => tracing::warn!("Dropping malformed {} event: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_from_https() {
        let url = socket_url("https://api.findernate.com").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.findernate.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_socket_url_from_http_with_port() {
        let url = socket_url("http://localhost:4000/").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:4000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_socket_url_rejects_other_schemes() {
        assert!(socket_url("ftp://example.com").is_err());
        assert!(socket_url("not a url").is_err());
    }
}
