//! mtlslab - TLS and mutual-TLS HTTPS endpoints
//!
//! This crate provides the pieces needed to run a TLS or mTLS HTTPS server
//! and a matching single-shot client:
//!
//! - [`tls`] builds endpoint configurations, performs handshakes and
//!   extracts the verified peer identity
//! - [`driver`] runs one client exchange or a connection-accepting server
//! - [`http`] carries the minimal HTTP/1.1 framing used inside the tunnel

pub mod driver;
pub mod http;
pub mod tls;
