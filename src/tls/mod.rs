//! TLS endpoint configuration, handshake and peer identity extraction
//!
//! The TLS layer is split along the life of a connection:
//!
//! 1. [`configure`] turns a role, trust anchors, an optional local identity
//!    and a [`VerificationPolicy`] into an immutable [`EndpointConfig`]
//! 2. [`handshake`] wraps a connected `TcpStream`, negotiates TLS and
//!    enforces the policy, producing an established [`Session`]
//! 3. [`PeerCertificateInfo`] is the typed view of the verified peer leaf
//!    certificate, available from the session once established
//!
//! `EndpointConfig` is an explicit value: there is no process-wide TLS state.
//! It is cheap to clone and safe to share between connection threads.
//!
//! # Examples
//!
//! ## mTLS client
//!
//! ```no_run
//! use mtlslab::tls::{self, EndpointConfig, LocalIdentity, TrustStore, VerificationPolicy};
//! use std::net::TcpStream;
//!
//! let config = EndpointConfig::client()
//!     .trust_store(TrustStore::from_pem_file("ca/ca.crt").unwrap())
//!     .identity(LocalIdentity::from_pem_files("client/client.crt", "client/client.key").unwrap())
//!     .policy(VerificationPolicy::required())
//!     .build()
//!     .unwrap();
//!
//! let tcp_stream = TcpStream::connect("localhost:4443").unwrap();
//! let session = tls::handshake(tcp_stream, &config, Some("localhost")).unwrap();
//! if let Some(peer) = session.peer_certificate() {
//!     println!("server subject: {}", peer.subject);
//! }
//! ```
//!
//! ## mTLS server
//!
//! ```no_run
//! use mtlslab::tls::{self, EndpointConfig, LocalIdentity, TrustStore, VerificationPolicy};
//! use std::net::TcpListener;
//!
//! let config = EndpointConfig::server()
//!     .trust_store(TrustStore::from_pem_file("ca/ca.crt").unwrap())
//!     .identity(LocalIdentity::from_pem_files("server/server.crt", "server/server.key").unwrap())
//!     .policy(VerificationPolicy::required())
//!     .build()
//!     .unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:4443").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let session = tls::handshake(tcp_stream, &config, None).unwrap();
//! ```

pub mod cert;
pub mod config;
pub mod handshake;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use cert::{DistinguishedName, NameAttribute, PeerCertificateInfo};
pub use config::{
    configure, ConfigError, EndpointConfig, EndpointConfigBuilder, LocalIdentity, PeerVerify,
    Role, TrustStore, VerificationPolicy,
};
pub use handshake::{handshake, HandshakeError, DEFAULT_HANDSHAKE_TIMEOUT_SECS};
pub use session::{Session, SessionState};

/// Result type for TLS configuration
pub type Result<T> = std::result::Result<T, ConfigError>;
