//! Thread-per-connection HTTPS server
//!
//! Every accepted connection runs on its own thread: TLS handshake, one
//! request, one response, close. A failed handshake or a malformed request
//! only costs that connection; the accept loop keeps going.

use std::convert::Infallible;
use std::io::{self, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use super::DriverError;
use crate::http::{self, HttpRequest, HttpResponse, Method, Status};
use crate::tls::{self, EndpointConfig, PeerCertificateInfo, Role, Session};

const LISTEN_BACKLOG: i32 = 128;

/// Pause after a failed accept, so a full fd table does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Produces the response to one request
///
/// `peer` is the client leaf certificate when one was presented and
/// verified.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &HttpRequest, peer: Option<&PeerCertificateInfo>) -> HttpResponse;
}

impl<F> RequestHandler for F
where
    F: Fn(&HttpRequest, Option<&PeerCertificateInfo>) -> HttpResponse + Send + Sync + 'static,
{
    fn handle(&self, request: &HttpRequest, peer: Option<&PeerCertificateInfo>) -> HttpResponse {
        self(request, peer)
    }
}

/// A bound, not yet serving, HTTPS server
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: EndpointConfig,
}

impl Server {
    /// Bind the listening socket
    ///
    /// Binding is separate from [`Server::serve`] so callers can learn the
    /// local address when binding port 0.
    pub fn bind(config: EndpointConfig, addr: impl ToSocketAddrs) -> Result<Self, DriverError> {
        if config.role() != Role::Server {
            return Err(DriverError::Other(
                "server driver needs a server endpoint configuration".to_string(),
            ));
        }

        let addr = addr
            .to_socket_addrs()
            .map_err(|e| DriverError::Other(format!("Failed to resolve bind address: {}", e)))?
            .next()
            .ok_or_else(|| DriverError::Other("Bind address resolved to nothing".to_string()))?;

        let listener = listen(addr)
            .map_err(|e| DriverError::Other(format!("Failed to bind {}: {}", addr, e)))?;

        info!(
            addr = %listener.local_addr().unwrap_or(addr),
            peer_verify = %config.policy().peer,
            "HTTPS server listening"
        );

        Ok(Server { listener, config })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the process ends
    pub fn serve<H: RequestHandler>(self, handler: H) -> Result<Infallible, DriverError> {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer_addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_BACKOFF);
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");

            let config = self.config.clone();
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name(format!("conn-{}", peer_addr))
                .spawn(move || handle_connection(stream, peer_addr, &config, handler.as_ref()));

            if let Err(e) = spawned {
                error!(peer = %peer_addr, error = %e, "failed to spawn connection thread");
            }
        }
    }
}

/// Bind `addr` and serve `handler` forever
pub fn serve<A, H>(config: EndpointConfig, addr: A, handler: H) -> Result<Infallible, DriverError>
where
    A: ToSocketAddrs,
    H: RequestHandler,
{
    Server::bind(config, addr)?.serve(handler)
}

fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

fn handle_connection<H: RequestHandler>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: &EndpointConfig,
    handler: &H,
) {
    let mut session = match tls::handshake(stream, config, None) {
        Ok(session) => session,
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "TLS handshake failed, dropping connection");
            return;
        }
    };

    match session.peer_certificate() {
        Some(cert) => info!(
            peer = %peer_addr,
            subject = %cert.subject,
            issuer = %cert.issuer,
            not_after = %cert.not_after,
            "client certificate verified"
        ),
        None => info!(peer = %peer_addr, "client presented no certificate"),
    }

    if let Err(e) = serve_request(&mut session, handler) {
        warn!(peer = %peer_addr, error = %e, "request failed");
    }

    if let Err(e) = session.close() {
        debug!(peer = %peer_addr, error = %e, "close failed");
    }
}

fn serve_request<H: RequestHandler>(session: &mut Session, handler: &H) -> Result<(), DriverError> {
    let peer = session
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());

    let parsed = {
        let mut reader = BufReader::new(&mut *session);
        http::read_request(&mut reader)
    };

    let request = match parsed {
        Ok(request) => request,
        Err(http::Error::Io(e)) => return Err(DriverError::from_io(e, &peer)),
        Err(http::Error::ConnectionClosed) => {
            debug!(peer = %peer, "connection closed before a request arrived");
            return Ok(());
        }
        Err(e) => {
            let response = HttpResponse::text(Status::BAD_REQUEST, format!("{}\n", e));
            write_response(session, &response, Method::Get, &peer)?;
            return Err(DriverError::from_http(e, &peer));
        }
    };

    let response = handler.handle(&request, session.peer_certificate());

    info!(
        peer = %peer,
        method = %request.method(),
        uri = request.uri(),
        status = response.status().code(),
        "request served"
    );

    write_response(session, &response, request.method(), &peer)
}

fn write_response(
    session: &mut Session,
    response: &HttpResponse,
    method: Method,
    peer: &str,
) -> Result<(), DriverError> {
    let mut response = response.clone();
    response.headers_mut().set("Connection", "close");

    let wire = if method == Method::Head {
        response.head_to_wire()
    } else {
        response.to_wire()
    };

    session
        .write_all(&wire)
        .and_then(|_| session.flush())
        .map_err(|e| DriverError::from_io(e, peer))
}
