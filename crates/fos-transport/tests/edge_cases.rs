//! Edge case tests for fos-transport
//!
//! Response helpers, scheme routing and the in-memory transport.

use std::sync::Arc;

use fos_transport::*;

// ============================================================================
// RESPONSE TESTS
// ============================================================================

#[test]
fn test_response_success_codes() {
    for code in [200, 201, 202, 204, 206] {
        assert!(Response::with_status(code).is_success(), "Status {} should be success", code);
    }
}

#[test]
fn test_response_error_codes() {
    for code in [301, 400, 401, 403, 404, 500, 502, 503] {
        assert!(!Response::with_status(code).is_success(), "Status {} should be error", code);
    }
}

#[test]
fn test_response_ok_keeps_body() {
    let resp = Response::ok(vec![1, 2, 3]);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, vec![1, 2, 3]);
    assert!(resp.headers.is_empty());
}

// ============================================================================
// ROUTING TESTS
// ============================================================================

#[test]
fn test_default_transport_bare_path_goes_to_file() {
    let transport = DefaultTransport::new(&FetchConfig::default()).unwrap();
    let resp = transport.fetch("no/such/dir/clip.ogg").unwrap();
    assert_eq!(resp.status, 404);
}

#[test]
fn test_default_transport_file_url() {
    let path = std::env::temp_dir().join("fos-transport-edge-file.wav");
    std::fs::write(&path, b"data").unwrap();

    let transport = DefaultTransport::new(&FetchConfig::default()).unwrap();
    let url = format!("file://{}", path.display());
    let resp = transport.fetch(&url).unwrap();
    assert_eq!(resp.body, b"data");

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_default_transport_unsupported_scheme() {
    let transport = DefaultTransport::new(&FetchConfig::default()).unwrap();
    assert!(matches!(
        transport.fetch("data:audio/wav;base64,AAAA"),
        Err(TransportError::UnsupportedScheme(_))
    ));
}

#[test]
fn test_http_transport_builds_without_redirects() {
    let config = FetchConfig {
        max_redirects: 0,
        ..Default::default()
    };
    assert!(HttpTransport::new(&config).is_ok());
}

// ============================================================================
// MEMORY TRANSPORT TESTS
// ============================================================================

#[test]
fn test_memory_transport_as_trait_object() {
    let memory = Arc::new(MemoryTransport::new());
    memory.insert("a.mp3", Response::ok(b"x".to_vec()));

    let transport: Arc<dyn Transport> = memory.clone();
    transport.fetch("a.mp3").unwrap();
    transport.fetch("b.mp3").unwrap_err();

    assert_eq!(memory.fetch_count("a.mp3"), 1);
    assert_eq!(memory.fetch_count("b.mp3"), 1);
    assert_eq!(memory.total_fetches(), 2);
}

#[test]
fn test_memory_transport_route_replaced() {
    let memory = MemoryTransport::new();
    memory.insert("a.mp3", Response::with_status(404));
    memory.insert("a.mp3", Response::ok(b"ok".to_vec()));
    assert_eq!(memory.fetch("a.mp3").unwrap().status, 200);
}

#[test]
fn test_memory_transport_is_shareable_across_threads() {
    let memory = Arc::new(MemoryTransport::new().with("t.mp3", Response::ok(vec![0u8; 4])));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let memory = memory.clone();
            std::thread::spawn(move || memory.fetch("t.mp3").map(|r| r.body.len()))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 4);
    }
    assert_eq!(memory.fetch_count("t.mp3"), 4);
}

#[test]
fn test_fetch_config_from_partial_json() {
    let config: FetchConfig =
        serde_json::from_str(r#"{"user_agent": "fetcher/1.0", "max_redirects": 2}"#).unwrap();
    assert_eq!(config.user_agent, "fetcher/1.0");
    assert_eq!(config.max_redirects, 2);
    assert_eq!(config.connect_timeout, FetchConfig::default().connect_timeout);
}
