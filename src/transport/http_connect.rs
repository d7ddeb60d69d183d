//! HTTP CONNECT proxy bootstrap for the agent's outbound connection

use anyhow::{bail, Context, Result};
use async_http_proxy::{http_connect_tokio, http_connect_tokio_with_basic_auth};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

/// Open a TCP stream to `host:port` through an HTTP CONNECT proxy.
///
/// Basic-auth credentials are taken from the proxy URL's userinfo part.
pub async fn connect_via_proxy(proxy_url: &str, host: &str, port: u16) -> Result<TcpStream> {
    let proxy = Url::parse(proxy_url).context("invalid proxy URL")?;
    if proxy.scheme() != "http" {
        bail!("http_proxy must use the http:// scheme");
    }
    let proxy_host = proxy.host_str().context("proxy URL has no host")?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(8080);

    debug!(proxy = %format!("{proxy_host}:{proxy_port}"), target = %format!("{host}:{port}"), "connecting via HTTP proxy");
    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .with_context(|| format!("failed to connect to proxy {proxy_host}:{proxy_port}"))?;

    match proxy.password() {
        Some(password) if !proxy.username().is_empty() => {
            http_connect_tokio_with_basic_auth(
                &mut stream,
                host,
                port,
                proxy.username(),
                password,
            )
            .await
            .context("HTTP CONNECT with basic auth failed")?;
        }
        _ => {
            http_connect_tokio(&mut stream, host, port)
                .await
                .context("HTTP CONNECT failed")?;
        }
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // minimal CONNECT responder, enough to drive the client side
    async fn spawn_fake_proxy(response: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            // read until the end of the request headers
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            assert!(request.starts_with(b"CONNECT "));
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_connect_success() {
        let addr = spawn_fake_proxy("HTTP/1.1 200 Connection established\r\n\r\n").await;
        let proxy_url = format!("http://{addr}");
        let stream = connect_via_proxy(&proxy_url, "example.com", 8080).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejected_by_proxy() {
        let addr = spawn_fake_proxy("HTTP/1.1 403 Forbidden\r\n\r\n").await;
        let proxy_url = format!("http://{addr}");
        let stream = connect_via_proxy(&proxy_url, "example.com", 8080).await;
        assert!(stream.is_err());
    }

    #[tokio::test]
    async fn test_bad_scheme_rejected() {
        let result = connect_via_proxy("ftp://proxy:21", "example.com", 80).await;
        assert!(result.is_err());
    }
}
