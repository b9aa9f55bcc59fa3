//! HTTP headers handling
//!
//! Headers keep insertion order, compare names case-insensitively and allow
//! repeated names.

use super::{Error, Result, MAX_HEADERS};
use std::fmt;

/// HTTP headers collection
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Append a header without any limit (for locally built messages)
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Append a header received from the wire
    ///
    /// Fails once `MAX_HEADERS` entries are stored.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        if self.headers.len() >= MAX_HEADERS {
            return Err(Error::InvalidHeader(format!(
                "More than {} headers",
                MAX_HEADERS
            )));
        }

        self.headers.push((name.into(), value.into()));
        Ok(())
    }

    /// Replace every value of a header with a single one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.headers.push((name, value.into()));
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn remove(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a header line into name and value
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHeader(format!("No colon in header: {}", line)))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidHeader("Empty header name".to_string()));
        }

        Ok((name.to_string(), value.trim().to_string()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html").unwrap();

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert!(headers.contains("Content-type"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_set_replaces() {
        let mut headers = Headers::new();
        headers.insert("Connection", "keep-alive").unwrap();
        headers.insert("connection", "upgrade").unwrap();
        headers.set("Connection", "close");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Connection"), Some("close"));
    }

    #[test]
    fn test_header_limit() {
        let mut headers = Headers::new();
        for i in 0..MAX_HEADERS {
            headers.insert(format!("X-{}", i), "v").unwrap();
        }
        assert!(headers.insert("X-Overflow", "v").is_err());
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Length:  42 ").unwrap();
        assert_eq!(name, "Content-Length");
        assert_eq!(value, "42");

        // Colons in the value are kept
        let (_, value) = Headers::parse_header_line("Host: localhost:4443").unwrap();
        assert_eq!(value, "localhost:4443");

        assert!(Headers::parse_header_line("NoColon").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
    }
}
