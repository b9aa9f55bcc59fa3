//! Minimal HTTP/1.1 framing
//!
//! Just enough HTTP to carry one request and one response over an
//! established TLS session: message types, a header collection, and a
//! blocking reader for each direction.
//!
//! # Examples
//!
//! ```
//! use mtlslab::http::{self, HttpRequest, Method};
//! use std::io::Cursor;
//!
//! let request = HttpRequest::builder()
//!     .method(Method::Get)
//!     .uri("/")
//!     .header("Host", "localhost")
//!     .build();
//!
//! let wire = request.to_wire();
//! let parsed = http::read_request(&mut Cursor::new(wire)).unwrap();
//! assert_eq!(parsed.uri(), "/");
//! ```

pub mod headers;
pub mod message;
pub mod parser;

pub use headers::Headers;
pub use message::{HttpRequest, HttpResponse, Method, Status, Version};
pub use parser::{read_request, read_response};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Message too large")]
    TooLarge,

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 64;

/// Maximum length of the start line or a single header line
pub const MAX_LINE_LEN: usize = 8192;

/// Maximum accepted body size
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
