//! WebSocket control-channel setup

use crate::transport::{apply_socket_opts, connect_via_proxy};
use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::{accept_async, client_async, WebSocketStream};
use tracing::debug;
use url::Url;

/// The control channel as seen by both endpoints
pub type ControlStream = WebSocketStream<TcpStream>;

/// Upgrade an accepted TCP connection to a control channel
pub async fn accept_control(stream: TcpStream) -> Result<ControlStream> {
    apply_socket_opts(&stream);
    accept_async(stream)
        .await
        .context("WebSocket handshake failed")
}

/// Connect out to the server's control endpoint, optionally through an
/// HTTP CONNECT proxy
pub async fn connect_control(server_url: &str, http_proxy: Option<&str>) -> Result<ControlStream> {
    let url = Url::parse(server_url).context("invalid server URL")?;
    if url.scheme() != "ws" {
        bail!("server_url must use the ws:// scheme, got {}", url.scheme());
    }
    let host = url.host_str().context("server URL has no host")?;
    let port = url.port_or_known_default().unwrap_or(80);

    let stream = match http_proxy {
        Some(proxy) => connect_via_proxy(proxy, host, port).await?,
        None => TcpStream::connect((host, port))
            .await
            .with_context(|| format!("failed to connect to {host}:{port}"))?,
    };
    apply_socket_opts(&stream);

    debug!(%server_url, "opening control channel");
    let (ws, _response) = client_async(server_url, stream)
        .await
        .context("WebSocket handshake failed")?;
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_accept_and_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_control(stream).await.unwrap();
            let msg = ws.next().await.unwrap().unwrap();
            assert_eq!(msg, Message::Text("hello".to_string()));
            ws.send(Message::Text("world".to_string()))
                .await
                .unwrap();
        });

        let url = format!("ws://{addr}/");
        let mut ws = connect_control(&url, None).await.unwrap();
        ws.send(Message::Text("hello".to_string()))
            .await
            .unwrap();
        let msg = ws.next().await.unwrap().unwrap();
        assert_eq!(msg, Message::Text("world".to_string()));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_wss() {
        let result = connect_control("wss://example.com/", None).await;
        assert!(result.is_err());
    }
}
