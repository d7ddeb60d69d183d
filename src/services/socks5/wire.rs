//! SOCKS5 wire parsing and reply encoding (RFC 1928, RFC 1929)

use crate::error::{ReplyCode, Socks5Error};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// SOCKS protocol version accepted by the engine
pub const SOCKS_VERSION: u8 = 0x05;
/// Username/password subnegotiation version (RFC 1929)
pub const AUTH_VERSION: u8 = 0x01;

/// Authentication methods known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// 0x00, no authentication required
    NoAuth,
    /// 0x01, GSSAPI (advertised by clients, never accepted)
    Gssapi,
    /// 0x02, username/password
    Plain,
    /// 0xFF, no acceptable method
    NotAcceptable,
}

impl AuthMethod {
    /// Parse a method byte; unknown bytes map to `NotAcceptable`
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => AuthMethod::NoAuth,
            0x01 => AuthMethod::Gssapi,
            0x02 => AuthMethod::Plain,
            _ => AuthMethod::NotAcceptable,
        }
    }

    /// The wire byte of this method
    pub fn as_byte(self) -> u8 {
        match self {
            AuthMethod::NoAuth => 0x00,
            AuthMethod::Gssapi => 0x01,
            AuthMethod::Plain => 0x02,
            AuthMethod::NotAcceptable => 0xFF,
        }
    }
}

/// Pick the first server-preferred method the client also offered
pub fn mutual_preference(preference: &[AuthMethod], offered: &[AuthMethod]) -> AuthMethod {
    preference
        .iter()
        .copied()
        .find(|method| offered.contains(method))
        .unwrap_or(AuthMethod::NotAcceptable)
}

/// SOCKS5 request commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// 0x01, establish a TCP connection
    Connect,
    /// 0x02, bind a listening socket
    Bind,
    /// 0x03, UDP associate
    UdpAssociate,
}

impl SocksCommand {
    fn from_byte(byte: u8) -> Result<Self, Socks5Error> {
        match byte {
            0x01 => Ok(SocksCommand::Connect),
            0x02 => Ok(SocksCommand::Bind),
            0x03 => Ok(SocksCommand::UdpAssociate),
            other => Err(Socks5Error::CommandNotSupported(other)),
        }
    }
}

/// A destination address from a SOCKS5 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// ATYP 0x01
    Ipv4(Ipv4Addr),
    /// ATYP 0x03, resolved by the connecting side
    Domain(String),
    /// ATYP 0x04
    Ipv6(Ipv6Addr),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{ip}"),
            Address::Domain(name) => write!(f, "{name}"),
            Address::Ipv6(ip) => write!(f, "{ip}"),
        }
    }
}

/// A parsed CONNECT/BIND/UDP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Requested command
    pub command: SocksCommand,
    /// Destination address
    pub address: Address,
    /// Destination port
    pub port: u16,
}

impl Request {
    /// The destination in `host:port` form, suitable for `TcpStream::connect`
    pub fn destination(&self) -> String {
        match &self.address {
            Address::Ipv6(ip) => format!("[{ip}]:{}", self.port),
            other => format!("{other}:{}", self.port),
        }
    }
}

/// Read the client method negotiation: `VER NMETHODS METHODS...`
pub async fn read_negotiation<S>(stream: &mut S) -> Result<Vec<AuthMethod>, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let version = stream.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }
    let count = stream.read_u8().await? as usize;
    let mut methods = vec![0u8; count];
    stream.read_exact(&mut methods).await?;
    Ok(methods.into_iter().map(AuthMethod::from_byte).collect())
}

/// Write the method selection reply: `VER METHOD`
pub async fn write_negotiation_reply<S>(
    stream: &mut S,
    method: AuthMethod,
) -> Result<(), Socks5Error>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, method.as_byte()])
        .await?;
    stream.flush().await?;
    Ok(())
}

/// Read a username/password subnegotiation (RFC 1929)
pub async fn read_plain_auth<S>(stream: &mut S) -> Result<(String, String), Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let version = stream.read_u8().await?;
    if version != AUTH_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }
    let user_len = stream.read_u8().await? as usize;
    let mut user = vec![0u8; user_len];
    stream.read_exact(&mut user).await?;
    let pass_len = stream.read_u8().await? as usize;
    let mut pass = vec![0u8; pass_len];
    stream.read_exact(&mut pass).await?;
    Ok((
        String::from_utf8_lossy(&user).into_owned(),
        String::from_utf8_lossy(&pass).into_owned(),
    ))
}

/// Write the subnegotiation status reply: `VER STATUS` (0x00 = success)
pub async fn write_auth_reply<S>(stream: &mut S, success: bool) -> Result<(), Socks5Error>
where
    S: AsyncWrite + Unpin,
{
    let status = if success { 0x00 } else { 0x01 };
    stream.write_all(&[AUTH_VERSION, status]).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a request: `VER CMD RSV ATYP DST.ADDR DST.PORT`
pub async fn read_request<S>(stream: &mut S) -> Result<Request, Socks5Error>
where
    S: AsyncRead + Unpin,
{
    let version = stream.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }
    let command = SocksCommand::from_byte(stream.read_u8().await?)?;
    let _reserved = stream.read_u8().await?;

    let address = match stream.read_u8().await? {
        0x01 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Address::Ipv4(Ipv4Addr::from(octets))
        }
        0x03 => {
            let len = stream.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await?;
            let name = String::from_utf8(name)
                .map_err(|e| Socks5Error::InvalidDomain(e.to_string()))?;
            if name.is_empty() {
                return Err(Socks5Error::InvalidDomain("empty domain".to_string()));
            }
            Address::Domain(name)
        }
        0x04 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Address::Ipv6(Ipv6Addr::from(octets))
        }
        other => return Err(Socks5Error::AddressTypeNotSupported(other)),
    };
    let port = stream.read_u16().await?;

    Ok(Request {
        command,
        address,
        port,
    })
}

/// Write a reply: `VER REP RSV ATYP BND.ADDR BND.PORT`
pub async fn write_reply<S>(
    stream: &mut S,
    code: ReplyCode,
    bound: SocketAddr,
) -> Result<(), Socks5Error>
where
    S: AsyncWrite + Unpin,
{
    let mut reply = Vec::with_capacity(22);
    reply.extend_from_slice(&[SOCKS_VERSION, code.into(), 0x00]);
    match bound.ip() {
        IpAddr::V4(ip) => {
            reply.push(0x01);
            reply.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            reply.push(0x04);
            reply.extend_from_slice(&ip.octets());
        }
    }
    reply.extend_from_slice(&bound.port().to_be_bytes());
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}

/// The all-zero bound address sent on success
pub fn unspecified_bound() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}
