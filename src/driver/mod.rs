//! Session drivers
//!
//! A driver owns one or more TCP connections and runs them through the TLS
//! handshake and a single HTTP exchange:
//!
//! - [`run`] is the client side: connect, handshake, one request, one
//!   response, close
//! - [`serve`] / [`Server`] is the server side: accept connections forever,
//!   each on its own thread, handing requests and the verified peer
//!   certificate to a [`RequestHandler`]

pub mod client;
pub mod handler;
pub mod server;

pub use client::{run, Exchange, Target};
pub use handler::DirectoryListing;
pub use server::{serve, RequestHandler, Server};

use std::io;

use crate::http;
use crate::tls::handshake::from_session_io_error;
use crate::tls::HandshakeError;

/// Default HTTPS port of the lab endpoints
pub const DEFAULT_PORT: u16 = 4443;

/// Driver errors
///
/// Every variant renders a distinct, human-readable diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("SSL error: {0}")]
    TlsFailure(#[from] HandshakeError),

    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Error: {0}")]
    Other(String),
}

impl DriverError {
    /// Classify an I/O error raised while talking to `peer`
    pub(crate) fn from_io(err: io::Error, peer: &str) -> Self {
        if err.kind() == io::ErrorKind::ConnectionRefused {
            return DriverError::ConnectionRefused(peer.to_string());
        }
        if let Some(tls) = from_session_io_error(&err) {
            return DriverError::TlsFailure(tls);
        }
        DriverError::Other(format!("{}: {}", peer, err))
    }

    /// Classify an HTTP framing error raised while talking to `peer`
    pub(crate) fn from_http(err: http::Error, peer: &str) -> Self {
        match err {
            http::Error::Io(e) => Self::from_io(e, peer),
            other => DriverError::Other(format!("{}: {}", peer, other)),
        }
    }

    /// Likely causes, for user-facing reports
    pub fn hints(&self) -> &'static [&'static str] {
        match self {
            DriverError::TlsFailure(HandshakeError::HostnameMismatch(_)) => {
                &["Server certificate was issued for a different host name"]
            }
            DriverError::TlsFailure(HandshakeError::Timeout) => {
                &["Server did not complete the handshake in time"]
            }
            DriverError::TlsFailure(_) => &[
                "Invalid client certificate",
                "Server not recognizing our CA",
                "Certificate expired",
            ],
            DriverError::ConnectionRefused(_) => &["Is the server running?"],
            DriverError::InvalidTarget(_) | DriverError::Other(_) => &[],
        }
    }
}
