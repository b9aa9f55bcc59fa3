//! TLS handshake and failure classification
//!
//! The handshake itself is performed by the `openssl` crate's
//! `Ssl::connect()` and `Ssl::accept()`. This module sets up the per
//! connection state they need (SNI, hostname verification, timeouts) and maps
//! their failures onto [`HandshakeError`].

use std::io;
use std::net::{IpAddr, TcpStream};

use openssl::ssl::{self, Ssl, SslStream};
use tracing::{debug, trace};

use super::config::{EndpointConfig, Role, VerificationPolicy};
use super::session::{Session, SessionState};

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// `X509_V_ERR_HOSTNAME_MISMATCH` from `x509_vfy.h`
const X509_V_ERR_HOSTNAME_MISMATCH: i32 = 62;

/// OpenSSL reason strings meaning the peer's certificate was rejected,
/// either locally or by the peer through an alert
const PEER_AUTH_REASONS: &[&str] = &[
    "peer did not return a certificate",
    "certificate verify failed",
    "alert bad certificate",
    "alert unknown ca",
    "alert certificate required",
    "alert certificate expired",
    "alert certificate revoked",
    "alert certificate unknown",
    "alert unsupported certificate",
    "alert access denied",
];

/// Handshake errors
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Peer authentication failed: {0}")]
    PeerAuthFailed(String),

    #[error("Hostname mismatch: certificate is not valid for {0}")]
    HostnameMismatch(String),

    #[error("TLS protocol error: {0}")]
    ProtocolError(String),

    #[error("Handshake timed out")]
    Timeout,
}

/// Perform the TLS handshake on a connected stream
///
/// The role of `config` decides whether this side initiates (client) or
/// responds (server). `server_name` is the host the client asked for: it is
/// sent as SNI and, when the policy enables it, checked against the server
/// certificate. Servers ignore it.
///
/// A failure is terminal for this stream; nothing is retried.
pub fn handshake(
    stream: TcpStream,
    config: &EndpointConfig,
    server_name: Option<&str>,
) -> Result<Session, HandshakeError> {
    let role = config.role();
    let policy = config.policy();

    stream
        .set_read_timeout(config.handshake_timeout())
        .and_then(|_| stream.set_write_timeout(config.handshake_timeout()))
        .map_err(|e| HandshakeError::ProtocolError(format!("Failed to set socket timeout: {}", e)))?;

    let mut ssl = Ssl::new(&config.ctx)
        .map_err(|e| HandshakeError::ProtocolError(format!("Failed to create SSL: {}", e)))?;

    trace!(role = %role, state = ?SessionState::Handshaking, "starting TLS handshake");

    let result = match role {
        Role::Client => {
            prepare_client(&mut ssl, policy, server_name)?;
            ssl.connect(stream)
        }
        Role::Server => ssl.accept(stream),
    };

    let stream: SslStream<TcpStream> = match result {
        Ok(stream) => stream,
        Err(e) => {
            let err = classify_handshake_failure(e, role, server_name);
            debug!(role = %role, error = %err, "TLS handshake failed");
            return Err(err);
        }
    };

    let session = Session::established(stream, role);

    debug!(
        role = %role,
        version = session.version(),
        cipher = session.cipher().unwrap_or("<undef>"),
        peer_certificate = session.peer_certificate().is_some(),
        "TLS handshake complete"
    );

    Ok(session)
}

fn prepare_client(
    ssl: &mut Ssl,
    policy: VerificationPolicy,
    server_name: Option<&str>,
) -> Result<(), HandshakeError> {
    let Some(name) = server_name else {
        if policy.verifies_hostname() {
            return Err(HandshakeError::ProtocolError(
                "Hostname check enabled but no server name given".to_string(),
            ));
        }
        return Ok(());
    };

    let ip = name.parse::<IpAddr>().ok();

    // SNI carries DNS names only
    if ip.is_none() {
        ssl.set_hostname(name)
            .map_err(|e| HandshakeError::ProtocolError(format!("Invalid server name: {}", e)))?;
    }

    if policy.verifies_hostname() {
        let param = ssl.param_mut();
        let set = match ip {
            Some(ip) => param.set_ip(ip),
            None => param.set_host(name),
        };
        set.map_err(|e| HandshakeError::ProtocolError(format!("Invalid server name: {}", e)))?;
    }

    Ok(())
}

fn classify_handshake_failure(
    err: ssl::HandshakeError<TcpStream>,
    role: Role,
    server_name: Option<&str>,
) -> HandshakeError {
    match err {
        ssl::HandshakeError::SetupFailure(stack) => {
            HandshakeError::ProtocolError(format!("Handshake setup failed: {}", stack))
        }
        // Blocking socket with a timeout: OpenSSL reports the timed-out read
        // as WANT_READ/WANT_WRITE
        ssl::HandshakeError::WouldBlock(_) => HandshakeError::Timeout,
        ssl::HandshakeError::Failure(mid) => {
            if mid.error().io_error().is_some_and(is_timeout) {
                return HandshakeError::Timeout;
            }

            let verify = mid.ssl().verify_result();
            let verify_error = if verify.as_raw() == 0 {
                None
            } else {
                Some((verify.as_raw(), verify.error_string().to_string()))
            };

            classify(role, verify_error, &mid.error().to_string(), server_name)
        }
    }
}

/// Map a failed handshake onto the error taxonomy
///
/// `verify_error` is the certificate verification result when it was not OK,
/// `detail` the rendered OpenSSL error.
pub(crate) fn classify(
    role: Role,
    verify_error: Option<(i32, String)>,
    detail: &str,
    server_name: Option<&str>,
) -> HandshakeError {
    if let Some((code, message)) = verify_error {
        if code == X509_V_ERR_HOSTNAME_MISMATCH && role == Role::Client {
            return HandshakeError::HostnameMismatch(server_name.unwrap_or("<undef>").to_string());
        }
        return HandshakeError::PeerAuthFailed(format!("{} ({})", message, detail));
    }

    if is_peer_auth_failure(detail) {
        return HandshakeError::PeerAuthFailed(detail.to_string());
    }

    HandshakeError::ProtocolError(detail.to_string())
}

fn is_peer_auth_failure(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    PEER_AUTH_REASONS.iter().any(|reason| detail.contains(reason))
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Classify an I/O error from an established session that carries a TLS
/// failure, e.g. the server rejecting our certificate after a TLS 1.3
/// client already finished its side of the handshake.
///
/// Returns `None` for plain transport errors.
pub(crate) fn from_session_io_error(err: &io::Error) -> Option<HandshakeError> {
    let ssl_error = err.get_ref()?.downcast_ref::<ssl::Error>()?;
    ssl_error.ssl_error()?;

    let detail = ssl_error.to_string();
    if is_peer_auth_failure(&detail) {
        Some(HandshakeError::PeerAuthFailed(detail))
    } else {
        Some(HandshakeError::ProtocolError(detail))
    }
}
