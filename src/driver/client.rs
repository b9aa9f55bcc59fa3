//! Single-shot HTTPS client
//!
//! [`run`] opens one connection, completes the TLS handshake, sends one
//! `GET`, reads the whole response and closes. There is no connection reuse
//! and no retry: the first failure is returned to the caller.

use std::fmt;
use std::io::{self, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use super::{DriverError, DEFAULT_PORT};
use crate::http::{self, HttpRequest, HttpResponse, Method};
use crate::tls::{self, EndpointConfig, PeerCertificateInfo, Role, Session};

const USER_AGENT: &str = concat!("mtlslab/", env!("CARGO_PKG_VERSION"));

/// Where the client connects, and which name it expects the server to prove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    port: u16,
    path: String,
    server_name: Option<String>,
}

impl Target {
    /// Target `host:port`, path `/`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Target {
            host: host.into(),
            port,
            path: "/".to_string(),
            server_name: None,
        }
    }

    /// Parse `https://host[:port][/path]`; the scheme may be omitted
    pub fn parse(url: &str) -> Result<Self, DriverError> {
        let rest = match url.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("https") => rest,
            Some((scheme, _)) => {
                return Err(DriverError::InvalidTarget(format!(
                    "unsupported scheme {}",
                    scheme
                )))
            }
            None => url,
        };

        let (authority, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, "/"),
        };

        let (host, port) = split_authority(authority)?;
        if host.is_empty() {
            return Err(DriverError::InvalidTarget(format!("missing host in {}", url)));
        }

        Ok(Target::new(host, port.unwrap_or(DEFAULT_PORT)).with_path(path))
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Use `name` for SNI and hostname verification instead of the host
    /// connected to
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Name the server certificate is checked against
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.host)
    }

    /// `host:port`, with IPv6 literals bracketed
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "https://{}{}", self.authority(), self.path)
    }
}

fn split_authority(authority: &str) -> Result<(String, Option<u16>), DriverError> {
    let invalid_port =
        |p: &str| DriverError::InvalidTarget(format!("invalid port {} in {}", p, authority));

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| DriverError::InvalidTarget(format!("unclosed [ in {}", authority)))?;
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p.parse().map_err(|_| invalid_port(p))?),
            None if after.is_empty() => None,
            None => return Err(invalid_port(after)),
        };
        return Ok((host.to_string(), port));
    }

    // IPv6 literals must be bracketed
    if authority.matches(':').count() > 1 {
        return Err(DriverError::InvalidTarget(format!(
            "unbracketed IPv6 address in {}",
            authority
        )));
    }

    let (host, port) = match authority.split_once(':') {
        Some((host, p)) => (host, Some(p.parse().map_err(|_| invalid_port(p))?)),
        None => (authority, None),
    };

    Ok((host.to_string(), port))
}

/// Result of a successful client run
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Server leaf certificate, absent only when verification is off and the
    /// server sent none
    pub peer_certificate: Option<PeerCertificateInfo>,
    pub response: HttpResponse,
}

impl Exchange {
    pub fn body(&self) -> &[u8] {
        self.response.body()
    }
}

/// Perform one HTTPS exchange with `target`
///
/// Failures are classified as `TlsFailure` (handshake or TLS alert),
/// `ConnectionRefused` (nothing listening) or `Other` (resolution, I/O,
/// HTTP framing).
pub fn run(config: &EndpointConfig, target: &Target) -> Result<Exchange, DriverError> {
    if config.role() != Role::Client {
        return Err(DriverError::Other(
            "client driver needs a client endpoint configuration".to_string(),
        ));
    }

    let authority = target.authority();
    let tcp_stream = connect(target, config.handshake_timeout())?;

    let mut session = tls::handshake(tcp_stream, config, Some(target.server_name()))?;
    let peer_certificate = session.peer_certificate().cloned();

    info!(
        url = %target,
        version = session.version(),
        server_subject = %peer_certificate
            .as_ref()
            .map(|p| p.subject.to_string())
            .unwrap_or_else(|| "<none>".to_string()),
        "TLS session established"
    );

    let request = HttpRequest::builder()
        .method(Method::Get)
        .uri(target.path())
        .header("Host", host_header(target))
        .header("User-Agent", USER_AGENT)
        .header("Accept", "*/*")
        .header("Connection", "close")
        .build();

    let result = exchange(&mut session, &request, &authority);

    if let Err(e) = session.close() {
        debug!(url = %target, error = %e, "close failed");
    }

    let response = result?;
    info!(
        url = %target,
        status = response.status().code(),
        body_len = response.body().len(),
        "response received"
    );

    Ok(Exchange {
        peer_certificate,
        response,
    })
}

fn host_header(target: &Target) -> String {
    if target.port() == 443 {
        target.host().to_string()
    } else {
        target.authority()
    }
}

fn connect(target: &Target, timeout: Option<Duration>) -> Result<TcpStream, DriverError> {
    let authority = target.authority();
    let addrs: Vec<SocketAddr> = (target.host(), target.port())
        .to_socket_addrs()
        .map_err(|e| DriverError::Other(format!("Failed to resolve {}: {}", authority, e)))?
        .collect();

    let mut last_error = None;
    let mut refused = false;

    for addr in addrs {
        let result = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };

        match result {
            Ok(stream) => {
                debug!(%addr, "connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "connect failed");
                refused |= e.kind() == io::ErrorKind::ConnectionRefused;
                last_error = Some(e);
            }
        }
    }

    if refused {
        return Err(DriverError::ConnectionRefused(authority));
    }

    Err(match last_error {
        Some(e) => DriverError::from_io(e, &authority),
        None => DriverError::Other(format!("{} resolved to no addresses", authority)),
    })
}

fn exchange(
    session: &mut Session,
    request: &HttpRequest,
    authority: &str,
) -> Result<HttpResponse, DriverError> {
    session
        .write_all(&request.to_wire())
        .and_then(|_| session.flush())
        .map_err(|e| DriverError::from_io(e, authority))?;

    let mut reader = BufReader::new(&mut *session);
    http::read_response(&mut reader, request.method())
        .map_err(|e| DriverError::from_http(e, authority))
}
