//! fOS Transport
//!
//! Fetch the raw bytes of a media resource.
//!
//! Media loading only needs "give me the bytes behind this URL and tell me
//! how it went". Everything here implements [`Transport`], which is called
//! from a blocking worker, never from the media thread.

mod client;
mod memory;

pub use client::{DefaultTransport, FetchConfig, FileTransport, HttpTransport};
pub use memory::MemoryTransport;

/// Transport capability used by the media resource loader
pub trait Transport: Send + Sync {
    /// Fetch the resource at `url`, blocking until the body is complete
    fn fetch(&self, url: &str) -> Result<Response, TransportError>;
}

/// Completed response
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    /// 200 response with the given body
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Bodyless response with the given status
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport error
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        assert!(Response::ok("x").is_success());
        assert!(Response::with_status(206).is_success());
        assert!(!Response::with_status(404).is_success());
        assert!(!Response::with_status(500).is_success());
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let mut resp = Response::ok(vec![]);
        resp.headers.push(("Content-Type".into(), "audio/mpeg".into()));
        assert_eq!(resp.header("content-type"), Some("audio/mpeg"));
        assert_eq!(resp.header("etag"), None);
    }
}
