//! SOCKS5 session engine
//!
//! Runs the full conversation for one client connection: method negotiation,
//! optional username/password subnegotiation, the CONNECT request, the
//! outbound dial, and finally the byte relay. Generic over the transport so
//! the same engine serves plain TCP sockets and multiplexed session streams.

use crate::error::{ReplyCode, Socks5Error};
use crate::relay::relay;
use crate::services::socks5::wire::{
    mutual_preference, read_negotiation, read_plain_auth, read_request, unspecified_bound,
    write_auth_reply, write_negotiation_reply, write_reply, AuthMethod, Request, SocksCommand,
};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Per-session behavior knobs for the SOCKS engine
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Server-side method preference, most preferred first
    pub auth_preference: Vec<AuthMethod>,
    /// Credential table; `None` accepts any username/password pair
    pub users: Option<HashMap<String, String>>,
    /// Bound on the whole handshake up to and including the request
    pub handshake_timeout: Duration,
    /// Bound on the outbound dial
    pub connect_timeout: Duration,
    /// Per-direction relay idle bound
    pub relay_idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            auth_preference: vec![AuthMethod::Plain, AuthMethod::NoAuth],
            users: None,
            handshake_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            relay_idle_timeout: Duration::from_secs(60),
        }
    }
}

impl SessionSettings {
    fn verify(&self, username: &str, password: &str) -> bool {
        match &self.users {
            // open mode: any pair is accepted
            None => true,
            Some(users) => users.get(username).map(String::as_str) == Some(password),
        }
    }
}

/// Serve one SOCKS5 client on `stream` until the session ends.
///
/// A failed handshake or dial sends the matching SOCKS failure reply before
/// returning, so clients always learn why the session died.
pub async fn serve_session<S>(mut stream: S, settings: &SessionSettings) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match timeout(settings.handshake_timeout, async {
        authenticate(&mut stream, settings).await?;
        read_request(&mut stream).await
    })
    .await
    {
        Ok(Ok(request)) => request,
        Ok(Err(err)) => {
            // failures after the method reply still get a SOCKS reply
            if matches!(
                err,
                Socks5Error::CommandNotSupported(_)
                    | Socks5Error::AddressTypeNotSupported(_)
                    | Socks5Error::InvalidDomain(_)
            ) {
                let _ = write_reply(&mut stream, ReplyCode::from(&err), unspecified_bound()).await;
            }
            return Err(err).context("SOCKS5 handshake failed");
        }
        Err(_) => bail!("SOCKS5 handshake timed out"),
    };

    if request.command != SocksCommand::Connect {
        let err = Socks5Error::CommandNotSupported(0x02);
        write_reply(&mut stream, ReplyCode::from(&err), unspecified_bound()).await?;
        bail!("only CONNECT is supported, got {:?}", request.command);
    }

    let upstream = match dial(&request, settings.connect_timeout).await {
        Ok(upstream) => upstream,
        Err(err) => {
            warn!(destination = %request.destination(), %err, "outbound dial failed");
            write_reply(&mut stream, ReplyCode::from(&err), unspecified_bound()).await?;
            return Err(err).context("outbound dial failed");
        }
    };

    write_reply(&mut stream, ReplyCode::Succeeded, unspecified_bound()).await?;
    info!(destination = %request.destination(), "SOCKS5 session established");

    let (up, down) = relay(stream, upstream, settings.relay_idle_timeout)
        .await
        .context("relay failed")?;
    debug!(up, down, destination = %request.destination(), "SOCKS5 session closed");
    Ok(())
}

async fn authenticate<S>(stream: &mut S, settings: &SessionSettings) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let offered = read_negotiation(stream).await?;
    let selected = mutual_preference(&settings.auth_preference, &offered);
    write_negotiation_reply(stream, selected).await?;

    match selected {
        AuthMethod::NoAuth => Ok(()),
        AuthMethod::Plain => {
            let (username, password) = read_plain_auth(stream).await?;
            let accepted = settings.verify(&username, &password);
            write_auth_reply(stream, accepted).await?;
            if accepted {
                debug!(%username, "SOCKS5 client authenticated");
                Ok(())
            } else {
                warn!(%username, "SOCKS5 authentication rejected");
                Err(Socks5Error::AuthFailed)
            }
        }
        AuthMethod::Gssapi => Err(Socks5Error::MethodNotImplemented(0x01)),
        AuthMethod::NotAcceptable => {
            // make sure the refusal reaches the client before we hang up
            let _ = stream.flush().await;
            Err(Socks5Error::NoAcceptableMethod)
        }
    }
}

async fn dial(request: &Request, connect_timeout: Duration) -> Result<TcpStream, Socks5Error> {
    let destination = request.destination();
    let upstream = match timeout(connect_timeout, TcpStream::connect(&destination)).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(err)) => return Err(Socks5Error::UpstreamConnect(err)),
        Err(_) => return Err(Socks5Error::UpstreamTimeout),
    };
    let _ = upstream.set_nodelay(true);
    Ok(upstream)
}
