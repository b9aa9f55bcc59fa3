//! HTTP message parsing
//!
//! Blocking readers that pull exactly one request or response off a
//! buffered stream.

use std::io::{self, BufRead, Read};

use super::{
    Error, Headers, HttpRequest, HttpResponse, Method, Result, Status, Version, MAX_BODY_LEN,
    MAX_LINE_LEN,
};

/// Parse HTTP request line
///
/// Format: METHOD URI VERSION
/// Example: GET /index.html HTTP/1.1
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() != 3 {
        return Err(Error::Parse(format!(
            "Invalid request line: expected 3 parts, got {}",
            parts.len()
        )));
    }

    let method = parts[0].parse::<Method>()?;
    let uri = parts[1].to_string();
    let version = parts[2].parse::<Version>()?;

    Ok((method, uri, version))
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS REASON
/// Example: HTTP/1.1 200 OK
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = parts[0].parse::<Version>()?;
    let status_code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::Parse(format!("Invalid status code: {}", parts[1])))?;
    let status = Status::new(status_code)?;
    let reason = match parts.get(2) {
        Some(reason) => reason.to_string(),
        None => status.reason_phrase().to_string(),
    };

    Ok((version, status, reason))
}

/// Read one line, without its line ending
///
/// Returns `None` on a clean EOF before any byte was read.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut line = Vec::new();
    let limit = MAX_LINE_LEN as u64 + 2;
    let n = reader.by_ref().take(limit).read_until(b'\n', &mut line)?;

    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with(b"\n") {
        return Err(if n as u64 >= limit {
            Error::TooLarge
        } else {
            Error::ConnectionClosed
        });
    }

    line.pop();
    if line.ends_with(b"\r") {
        line.pop();
    }

    String::from_utf8(line)
        .map(Some)
        .map_err(|_| Error::Parse("Line is not valid UTF-8".to_string()))
}

fn read_headers<R: BufRead>(reader: &mut R) -> Result<Headers> {
    let mut headers = Headers::new();

    loop {
        let line = read_line(reader)?.ok_or(Error::ConnectionClosed)?;
        if line.is_empty() {
            return Ok(headers);
        }

        let (name, value) = Headers::parse_header_line(&line)?;
        headers.insert(name, value)?;
    }
}

fn content_length(headers: &Headers) -> Result<Option<usize>> {
    let Some(value) = headers.get("Content-Length") else {
        return Ok(None);
    };

    let length = value
        .parse::<usize>()
        .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", value)))?;
    if length > MAX_BODY_LEN {
        return Err(Error::TooLarge);
    }

    Ok(Some(length))
}

fn is_chunked(headers: &Headers) -> Result<bool> {
    match headers.get("Transfer-Encoding") {
        None => Ok(false),
        Some(te) if te.eq_ignore_ascii_case("chunked") => Ok(true),
        Some(te) => Err(Error::UnsupportedEncoding(te.to_string())),
    }
}

fn read_exact_body<R: Read>(reader: &mut R, length: usize) -> Result<Vec<u8>> {
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        _ => Error::Io(e),
    })?;
    Ok(body)
}

fn read_chunked_body<R: BufRead>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    loop {
        let line = read_line(reader)?.ok_or(Error::ConnectionClosed)?;
        // Chunk extensions follow a ';'
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| Error::Parse(format!("Invalid chunk size: {}", size_str)))?;

        if size == 0 {
            // Trailers, up to the terminating empty line
            read_headers(reader)?;
            return Ok(body);
        }
        if size > MAX_BODY_LEN - body.len() {
            return Err(Error::TooLarge);
        }

        body.extend_from_slice(&read_exact_body(reader, size)?);

        let terminator = read_line(reader)?.ok_or(Error::ConnectionClosed)?;
        if !terminator.is_empty() {
            return Err(Error::Parse("Missing CRLF after chunk data".to_string()));
        }
    }
}

fn read_until_eof<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let limit = MAX_BODY_LEN as u64 + 1;
    reader.take(limit).read_to_end(&mut body)?;
    if body.len() > MAX_BODY_LEN {
        return Err(Error::TooLarge);
    }
    Ok(body)
}

/// Read one HTTP request
///
/// Request bodies are delimited by `Content-Length`; a request without one
/// has an empty body.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<HttpRequest> {
    let line = read_line(reader)?.ok_or(Error::ConnectionClosed)?;
    let (method, uri, version) = parse_request_line(&line)?;
    let headers = read_headers(reader)?;

    let body = if is_chunked(&headers)? {
        read_chunked_body(reader)?
    } else {
        match content_length(&headers)? {
            Some(length) => read_exact_body(reader, length)?,
            None => Vec::new(),
        }
    };

    Ok(HttpRequest::builder()
        .method(method)
        .uri(uri)
        .version(version)
        .headers(headers)
        .body(body)
        .build())
}

/// Read one HTTP response to a request made with `method`
///
/// The body is delimited by chunked encoding, `Content-Length`, or the end
/// of the connection, in that order of preference.
pub fn read_response<R: BufRead>(reader: &mut R, method: Method) -> Result<HttpResponse> {
    let line = read_line(reader)?.ok_or(Error::ConnectionClosed)?;
    let (version, status, reason) = parse_status_line(&line)?;
    let headers = read_headers(reader)?;

    let no_body = method == Method::Head
        || (100..200).contains(&status.code())
        || status.code() == 204
        || status.code() == 304;

    let body = if no_body {
        Vec::new()
    } else if is_chunked(&headers)? {
        read_chunked_body(reader)?
    } else {
        match content_length(&headers)? {
            Some(length) => read_exact_body(reader, length)?,
            None => read_until_eof(reader)?,
        }
    };

    Ok(HttpResponse::builder()
        .version(version)
        .status(status)
        .reason(reason)
        .headers(headers)
        .body(body)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_request_line() {
        let (method, uri, version) = parse_request_line("GET /index.html HTTP/1.1").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(uri, "/index.html");
        assert_eq!(version, Version::Http11);

        assert!(parse_request_line("GET /").is_err());
        assert!(parse_request_line("GET / HTTP/2.0").is_err());
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line("HTTP/1.0 404 Not Found").unwrap();
        assert_eq!(version, Version::Http10);
        assert_eq!(status.code(), 404);
        assert_eq!(reason, "Not Found");

        // Reason phrase is optional
        let (_, status, reason) = parse_status_line("HTTP/1.1 200").unwrap();
        assert_eq!(status, Status::OK);
        assert_eq!(reason, "OK");
    }

    #[test]
    fn test_read_request_with_body() {
        let raw = b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nHello";
        let request = read_request(&mut Cursor::new(&raw[..])).unwrap();

        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.uri(), "/upload");
        assert_eq!(request.headers().get("host"), Some("localhost"));
        assert_eq!(request.body(), b"Hello");
    }

    #[test]
    fn test_read_request_bare_lf() {
        let raw = b"GET / HTTP/1.0\nHost: localhost\n\n";
        let request = read_request(&mut Cursor::new(&raw[..])).unwrap();

        assert_eq!(request.version(), Version::Http10);
        assert!(request.body().is_empty());
    }

    #[test]
    fn test_read_request_truncated() {
        let raw = b"GET / HTTP/1.1\r\nHost: local";
        let result = read_request(&mut Cursor::new(&raw[..]));
        assert!(matches!(result, Err(Error::ConnectionClosed)));

        let result = read_request(&mut Cursor::new(&b""[..]));
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_read_response_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 17\r\n\r\nDirectory listingTRAILING";
        let response = read_response(&mut Cursor::new(&raw[..]), Method::Get).unwrap();

        assert_eq!(response.status(), Status::OK);
        assert_eq!(response.body(), b"Directory listing");
    }

    #[test]
    fn test_read_response_until_eof() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nno length here";
        let response = read_response(&mut Cursor::new(&raw[..]), Method::Get).unwrap();

        assert_eq!(response.body_text(), "no length here");
    }

    #[test]
    fn test_read_response_chunked() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                    5;ext=1\r\nHello\r\n6\r\n World\r\n0\r\nX-Trailer: yes\r\n\r\n";
        let response = read_response(&mut Cursor::new(&raw[..]), Method::Get).unwrap();

        assert_eq!(response.body_text(), "Hello World");
    }

    #[test]
    fn test_read_response_head_has_no_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 17\r\n\r\n";
        let response = read_response(&mut Cursor::new(&raw[..]), Method::Head).unwrap();

        assert!(response.body().is_empty());
        assert_eq!(response.headers().get("Content-Length"), Some("17"));
    }

    #[test]
    fn test_unsupported_transfer_encoding() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\n\r\n";
        let result = read_response(&mut Cursor::new(&raw[..]), Method::Get);
        assert!(matches!(result, Err(Error::UnsupportedEncoding(_))));
    }

    #[test]
    fn test_chunk_size_beyond_limit() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    5\r\nHello\r\nffffffffffffffff\r\n";
        let result = read_request(&mut Cursor::new(&raw[..]));
        assert!(matches!(result, Err(Error::TooLarge)));

        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\n";
        let result = read_response(&mut Cursor::new(&raw[..]), Method::Get);
        assert!(matches!(result, Err(Error::TooLarge)));
    }

    #[test]
    fn test_line_too_long() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN + 10));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");

        let result = read_request(&mut Cursor::new(raw));
        assert!(matches!(result, Err(Error::TooLarge)));
    }
}
