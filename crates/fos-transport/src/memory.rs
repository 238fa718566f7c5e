//! In-memory transport
//!
//! Serves canned responses and counts fetches per URL. Unknown URLs fail
//! with a network error.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::{Response, Transport, TransportError};

#[derive(Debug, Clone)]
enum Canned {
    Respond(Response),
    Fail(String),
}

/// Transport backed by a URL -> response table
#[derive(Debug, Default)]
pub struct MemoryTransport {
    routes: Mutex<HashMap<String, Canned>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for `url`
    pub fn insert(&self, url: &str, response: Response) {
        self.lock_routes().insert(url.to_string(), Canned::Respond(response));
    }

    /// Fail every fetch of `url` with a network error
    pub fn fail(&self, url: &str, reason: &str) {
        self.lock_routes().insert(url.to_string(), Canned::Fail(reason.to_string()));
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(self, url: &str, response: Response) -> Self {
        self.insert(url, response);
        self
    }

    /// Number of fetches issued for `url`
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches
            .lock()
            .map(|f| f.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of fetches issued for any URL
    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().map(|f| f.values().sum()).unwrap_or(0)
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, HashMap<String, Canned>> {
        // A poisoned table is still a valid table.
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn fetch(&self, url: &str) -> Result<Response, TransportError> {
        if let Ok(mut fetches) = self.fetches.lock() {
            *fetches.entry(url.to_string()).or_insert(0) += 1;
        }

        let canned = self.lock_routes().get(url).cloned();
        match canned {
            Some(Canned::Respond(resp)) => Ok(resp),
            Some(Canned::Fail(reason)) => Err(TransportError::Network(reason)),
            None => Err(TransportError::Network(format!("no route to {url}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport_counts_fetches() {
        let transport = MemoryTransport::new().with("a.mp3", Response::ok(b"abc".to_vec()));

        assert_eq!(transport.fetch_count("a.mp3"), 0);
        let resp = transport.fetch("a.mp3").unwrap();
        assert_eq!(resp.body, b"abc");
        transport.fetch("a.mp3").unwrap();
        assert_eq!(transport.fetch_count("a.mp3"), 2);
    }

    #[test]
    fn test_memory_transport_unknown_url() {
        let transport = MemoryTransport::new();
        assert!(matches!(transport.fetch("nope.mp3"), Err(TransportError::Network(_))));
        assert_eq!(transport.total_fetches(), 1);
    }

    #[test]
    fn test_memory_transport_failure_route() {
        let transport = MemoryTransport::new();
        transport.fail("down.mp3", "connection reset");
        let err = transport.fetch("down.mp3").unwrap_err();
        assert_eq!(err.to_string(), "Network error: connection reset");
    }
}
