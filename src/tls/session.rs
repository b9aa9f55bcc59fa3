//! Established TLS session
//!
//! A [`Session`] owns exactly one TCP stream wrapped in TLS. It is only ever
//! handed out by [`handshake`](super::handshake()) once the verification
//! policy has been satisfied, so every live `Session` starts `Established`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use openssl::ssl::SslStream;
use tracing::debug;

use super::cert::PeerCertificateInfo;
use super::config::Role;

/// Lifecycle of a TLS connection
///
/// `Unestablished` and `Handshaking` are the states inside
/// [`handshake`](super::handshake()); a `Session` value is always
/// `Established` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unestablished,
    Handshaking,
    Established,
    Closed,
}

/// TLS session
pub struct Session {
    stream: SslStream<TcpStream>,
    role: Role,
    state: SessionState,
    peer: Option<PeerCertificateInfo>,
    failed: bool,
}

impl Session {
    pub(crate) fn established(stream: SslStream<TcpStream>, role: Role) -> Self {
        let peer = stream
            .ssl()
            .peer_certificate()
            .map(|cert| PeerCertificateInfo::from_x509(&cert));

        Session {
            stream,
            role,
            state: SessionState::Established,
            peer,
            failed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer certificate captured when the handshake completed
    ///
    /// `None` when the peer presented no certificate, which the policy only
    /// allows for `None`/`Optional` verification (and for clients, which
    /// servers are never required to authenticate to).
    pub fn peer_certificate(&self) -> Option<&PeerCertificateInfo> {
        self.peer.as_ref()
    }

    /// Re-read the peer certificate from the live TLS state
    pub fn extract_peer_certificate(&self) -> Option<PeerCertificateInfo> {
        self.stream
            .ssl()
            .peer_certificate()
            .map(|cert| PeerCertificateInfo::from_x509(&cert))
    }

    /// Negotiated protocol version (e.g. "TLSv1.3")
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Negotiated cipher suite
    pub fn cipher(&self) -> Option<&'static str> {
        self.stream.ssl().current_cipher().map(|c| c.name())
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().peer_addr()
    }

    /// Set the read/write timeout of the underlying socket
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        let tcp = self.stream.get_ref();
        tcp.set_read_timeout(timeout)?;
        tcp.set_write_timeout(timeout)
    }

    /// Check if an I/O operation failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Close the session
    ///
    /// Sends close_notify unless the session already failed, then shuts the
    /// TCP stream down. Closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;

        if !self.failed {
            if let Err(e) = self.stream.shutdown() {
                debug!(error = %e, "TLS shutdown failed");
            }
        }

        match self.stream.get_mut().shutdown(Shutdown::Both) {
            // Peer may already have gone away
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl Read for Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).map_err(|e| {
            self.failed = true;
            e
        })
    }
}

impl Write for Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf).map_err(|e| {
            self.failed = true;
            e
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            e
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("version", &self.version())
            .field("peer", &self.peer.as_ref().map(|p| p.subject.to_string()))
            .finish()
    }
}
