//! Error types for Socksling
//!
//! Typed errors for the envelope protocol and the SOCKS5 engine. Application
//! plumbing uses `anyhow`; these types cover the cases callers match on.

use std::io;
use thiserror::Error;

/// Errors produced while encoding or decoding control-channel envelopes
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The outer or inner structure of an envelope could not be parsed
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The embedded command/reply tag is not in the registry
    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    /// Payload encryption or decryption failed
    #[error("payload cipher failure: {0}")]
    Cipher(String),

    /// Payload compression or decompression failed
    #[error("payload compression failure: {0}")]
    Compression(String),
}

/// SOCKS5 protocol errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Unsupported SOCKS version byte
    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// No authentication method acceptable to both sides
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    /// Username/password subnegotiation failed
    #[error("authentication failed")]
    AuthFailed,

    /// The negotiated authentication method has no implementation
    #[error("authentication method not implemented: {0}")]
    MethodNotImplemented(u8),

    /// Command other than CONNECT
    #[error("command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type byte outside RFC1928
    #[error("address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Domain name length or encoding out of range
    #[error("invalid domain name: {0}")]
    InvalidDomain(String),

    /// Upstream connection could not be established
    #[error("upstream connect failed: {0}")]
    UpstreamConnect(io::Error),

    /// Upstream connection attempt timed out
    #[error("upstream connect timed out")]
    UpstreamTimeout,

    /// The client socket failed mid-handshake
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

/// Reply codes for SOCKS5 replies (RFC1928 §6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> Self {
        code as u8
    }
}

impl From<&io::Error> for ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut => ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => ReplyCode::HostUnreachable,
            io::ErrorKind::PermissionDenied => ReplyCode::ConnectionNotAllowed,
            _ => ReplyCode::GeneralFailure,
        }
    }
}

impl From<&Socks5Error> for ReplyCode {
    fn from(err: &Socks5Error) -> Self {
        match err {
            Socks5Error::CommandNotSupported(_) => ReplyCode::CommandNotSupported,
            Socks5Error::AddressTypeNotSupported(_) => ReplyCode::AddressTypeNotSupported,
            Socks5Error::UpstreamConnect(e) => ReplyCode::from(e),
            Socks5Error::UpstreamTimeout => ReplyCode::HostUnreachable,
            _ => ReplyCode::GeneralFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_code_to_u8() {
        assert_eq!(u8::from(ReplyCode::Succeeded), 0x00);
        assert_eq!(u8::from(ReplyCode::ConnectionRefused), 0x05);
        assert_eq!(u8::from(ReplyCode::CommandNotSupported), 0x07);
    }

    #[test]
    fn test_reply_code_from_io_error() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(ReplyCode::from(&err), ReplyCode::ConnectionRefused);

        let err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        assert_eq!(ReplyCode::from(&err), ReplyCode::HostUnreachable);

        let err = io::Error::new(io::ErrorKind::Other, "other");
        assert_eq!(ReplyCode::from(&err), ReplyCode::GeneralFailure);
    }

    #[test]
    fn test_reply_code_from_socks5_error() {
        assert_eq!(
            ReplyCode::from(&Socks5Error::CommandNotSupported(0x02)),
            ReplyCode::CommandNotSupported
        );
        assert_eq!(
            ReplyCode::from(&Socks5Error::UpstreamTimeout),
            ReplyCode::HostUnreachable
        );
        assert_eq!(
            ReplyCode::from(&Socks5Error::AuthFailed),
            ReplyCode::GeneralFailure
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownTag(9);
        assert_eq!(format!("{}", err), "unknown message tag: 9");

        let err = ProtocolError::MalformedEnvelope("bad hex".to_string());
        assert_eq!(format!("{}", err), "malformed envelope: bad hex");
    }
}
