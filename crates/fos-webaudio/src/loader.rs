//! Resource Loader
//!
//! Fetch-and-decode pipeline with a per-URL cache shared by every element
//! of a [`MediaContext`](crate::MediaContext).
//!
//! Fetch and decode run on smol's blocking pool. Nothing is delivered from
//! those threads: finished work is picked up by [`ResourceLoader::poll`] (or
//! [`ResourceLoader::flush`]) on the media thread and handed back as
//! [`Completions`] so callbacks run outside any borrow of the loader.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use fos_transport::Transport;
use smol::Task;
use url::Url;

use crate::audio::AudioBuffer;
use crate::decode::Decoder;

/// Loader shared between elements on one thread
pub type SharedLoader = Rc<RefCell<ResourceLoader>>;

/// Outcome handed to a load callback
pub type LoadResult = Result<Arc<AudioBuffer>, LoadFailure>;

/// Load completion callback
pub type LoadCallback = Box<dyn FnOnce(LoadResult)>;

/// Transfer progress of a cache entry, after XMLHttpRequest's ready states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Unsent,
    /// Fetch handed to the worker
    Loading,
    /// Transfer and decode finished, successfully or not
    Done,
    /// Cancelled before completion
    Aborted,
}

/// Why a load failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("HTTP error: {status}")]
    Http { status: u16 },

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Fetch aborted")]
    Aborted,
}

/// Snapshot of a failed cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    pub url: String,
    pub http_status: Option<u16>,
    pub state: TransportState,
    pub error: ResourceError,
}

/// How a `load` call was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Callback already ran with the cached buffer
    Cached,
    /// A new fetch was started
    Fetching,
    /// Attached to a fetch already in flight for the same URL
    Joined,
}

struct FetchOutcome {
    status: Option<u16>,
    result: Result<AudioBuffer, ResourceError>,
}

struct PendingFetch {
    task: Task<FetchOutcome>,
    waiters: Vec<LoadCallback>,
}

/// Cache entry for one URL
#[derive(Default)]
pub struct CacheEntry {
    buffer: Option<Arc<AudioBuffer>>,
    pending: Option<PendingFetch>,
    http_status: Option<u16>,
    state: TransportState,
    error: Option<ResourceError>,
}

impl CacheEntry {
    /// Decoded buffer, once a fetch succeeded
    pub fn buffer(&self) -> Option<&Arc<AudioBuffer>> {
        self.buffer.as_ref()
    }

    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn transport_state(&self) -> TransportState {
        self.state
    }

    pub fn error(&self) -> Option<&ResourceError> {
        self.error.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Served from cache without touching the network
    pub fn is_hit(&self) -> bool {
        self.http_status == Some(200) && self.buffer.is_some()
    }

    fn failure(&self, url: &str, error: ResourceError) -> LoadFailure {
        LoadFailure {
            url: url.to_string(),
            http_status: self.http_status,
            state: self.state,
            error,
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("buffered", &self.buffer.is_some())
            .field("pending", &self.pending.as_ref().map(|p| p.waiters.len()))
            .field("http_status", &self.http_status)
            .field("state", &self.state)
            .field("error", &self.error)
            .finish()
    }
}

/// Finished loads waiting for their callbacks
#[must_use = "completions do nothing until delivered"]
#[derive(Default)]
pub struct Completions {
    ready: Vec<(LoadCallback, LoadResult)>,
}

impl Completions {
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Run every callback in completion order
    pub fn deliver(self) -> usize {
        let count = self.ready.len();
        for (callback, result) in self.ready {
            callback(result);
        }
        count
    }

    fn extend(&mut self, waiters: Vec<LoadCallback>, result: LoadResult) {
        for waiter in waiters {
            self.ready.push((waiter, result.clone()));
        }
    }
}

impl fmt::Debug for Completions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completions").field("ready", &self.ready.len()).finish()
    }
}

/// Deduplicating, caching audio resource loader
pub struct ResourceLoader {
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn Decoder>,
    cache: HashMap<String, CacheEntry>,
    // URLs in fetch order, so completions are handed out in submission order
    order: Vec<String>,
}

impl ResourceLoader {
    pub fn new(transport: Arc<dyn Transport>, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            transport,
            decoder,
            cache: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Wrap for sharing between elements
    pub fn shared(self) -> SharedLoader {
        Rc::new(RefCell::new(self))
    }

    /// Load `url`, calling `callback` with the decoded buffer or a failure.
    ///
    /// A cache hit calls back before returning. A URL that is already being
    /// fetched gets the callback queued on that fetch.
    pub fn load(&mut self, url: &str, callback: impl FnOnce(LoadResult) + 'static) -> LoadStatus {
        if let Some(entry) = self.cache.get_mut(url) {
            if entry.is_hit() {
                if let Some(buffer) = entry.buffer.clone() {
                    tracing::debug!("Cache hit: {}", url);
                    callback(Ok(buffer));
                    return LoadStatus::Cached;
                }
            }
            if let Some(pending) = entry.pending.as_mut() {
                tracing::debug!("Joining pending fetch: {}", url);
                pending.waiters.push(Box::new(callback));
                return LoadStatus::Joined;
            }
        }

        tracing::info!("Fetching {}", url);
        let task = self.spawn_fetch(url);
        self.cache.insert(
            url.to_string(),
            CacheEntry {
                pending: Some(PendingFetch {
                    task,
                    waiters: vec![Box::new(callback)],
                }),
                state: TransportState::Loading,
                ..Default::default()
            },
        );
        self.order.retain(|u| u != url);
        self.order.push(url.to_string());
        LoadStatus::Fetching
    }

    fn spawn_fetch(&self, url: &str) -> Task<FetchOutcome> {
        let transport = self.transport.clone();
        let decoder = self.decoder.clone();
        let url = url.to_string();

        smol::unblock(move || {
            let response = match transport.fetch(&url) {
                Ok(response) => response,
                Err(e) => {
                    return FetchOutcome {
                        status: None,
                        result: Err(ResourceError::Transport(e.to_string())),
                    };
                }
            };

            let status = Some(response.status);
            if !response.is_success() {
                return FetchOutcome {
                    status,
                    result: Err(ResourceError::Http {
                        status: response.status,
                    }),
                };
            }

            let hint = extension_hint(&url);
            let result = decoder
                .decode(response.body, hint.as_deref())
                .map_err(|e| ResourceError::Decode(e.to_string()));
            FetchOutcome { status, result }
        })
    }

    /// Cancel the in-flight fetch for `url`.
    ///
    /// Best effort: a worker already running keeps running, its result is
    /// dropped. Callbacks still queued on the fetch receive
    /// [`ResourceError::Aborted`]. The entry stays in the cache.
    pub fn abort(&mut self, url: &str) -> bool {
        let Some(entry) = self.cache.get_mut(url) else {
            return false;
        };
        let Some(pending) = entry.pending.take() else {
            return false;
        };

        tracing::info!("Aborting fetch: {}", url);
        drop(pending.task);
        entry.state = TransportState::Aborted;
        entry.error = Some(ResourceError::Aborted);

        let failure = entry.failure(url, ResourceError::Aborted);
        let mut aborted = Completions::default();
        aborted.extend(pending.waiters, Err(failure));
        aborted.deliver();
        true
    }

    /// Drop every entry; pending fetches are aborted
    pub fn clear_cache(&mut self) {
        let pending: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, e)| e.is_pending())
            .map(|(url, _)| url.clone())
            .collect();
        for url in pending {
            self.abort(&url);
        }
        self.cache.clear();
        self.order.clear();
    }

    /// Collect fetches that finished, without blocking
    pub fn poll(&mut self) -> Completions {
        let finished: Vec<String> = self
            .order
            .iter()
            .filter(|url| {
                self.cache
                    .get(*url)
                    .and_then(|e| e.pending.as_ref())
                    .is_some_and(|p| p.task.is_finished())
            })
            .cloned()
            .collect();

        let mut completions = Completions::default();
        for url in finished {
            self.complete(&url, &mut completions);
        }
        completions
    }

    /// Block until every pending fetch has finished
    pub fn flush(&mut self) -> Completions {
        let pending: Vec<String> = self
            .order
            .iter()
            .filter(|url| self.cache.get(*url).is_some_and(CacheEntry::is_pending))
            .cloned()
            .collect();

        let mut completions = Completions::default();
        for url in pending {
            self.complete(&url, &mut completions);
        }
        completions
    }

    fn complete(&mut self, url: &str, completions: &mut Completions) {
        let Some(entry) = self.cache.get_mut(url) else {
            return;
        };
        let Some(pending) = entry.pending.take() else {
            return;
        };
        self.order.retain(|u| u != url);

        let outcome = smol::block_on(pending.task);
        entry.http_status = outcome.status;
        entry.state = TransportState::Done;

        let result = match outcome.result {
            Ok(buffer) => {
                tracing::info!("Loaded {} ({:.3}s)", url, buffer.duration());
                let buffer = Arc::new(buffer);
                entry.buffer = Some(buffer.clone());
                entry.error = None;
                Ok(buffer)
            }
            Err(error) => {
                tracing::warn!("Load failed for {}: {}", url, error);
                entry.error = Some(error.clone());
                Err(entry.failure(url, error))
            }
        };
        completions.extend(pending.waiters, result);
    }

    pub fn entry(&self, url: &str) -> Option<&CacheEntry> {
        self.cache.get(url)
    }

    /// Number of fetches still in flight
    pub fn pending(&self) -> usize {
        self.cache.values().filter(|e| e.is_pending()).count()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("entries", &self.cache.len())
            .field("pending", &self.pending())
            .finish()
    }
}

/// File extension of the URL path, for decoder probing
fn extension_hint(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodeError;
    use fos_transport::{MemoryTransport, Response};

    /// Body is the buffer duration in seconds, as text
    struct TextDecoder;

    impl Decoder for TextDecoder {
        fn decode(&self, bytes: Vec<u8>, _hint: Option<&str>) -> Result<AudioBuffer, DecodeError> {
            let text = String::from_utf8(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
            let seconds: f64 = text
                .trim()
                .parse()
                .map_err(|_| DecodeError::Unsupported(text.clone()))?;
            Ok(AudioBuffer::silent(1, seconds, 100.0))
        }
    }

    fn loader(memory: &Arc<MemoryTransport>) -> ResourceLoader {
        ResourceLoader::new(memory.clone(), Arc::new(TextDecoder))
    }

    fn capture() -> (Rc<RefCell<Vec<LoadResult>>>, impl Fn() -> Box<dyn FnOnce(LoadResult)>) {
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = results.clone();
        let make = move || {
            let sink = sink.clone();
            Box::new(move |r: LoadResult| sink.borrow_mut().push(r)) as Box<dyn FnOnce(LoadResult)>
        };
        (results, make)
    }

    #[test]
    fn test_extension_hint() {
        assert_eq!(extension_hint("https://cdn.example.com/a/b/track.MP3?x=1").as_deref(), Some("mp3"));
        assert_eq!(extension_hint("clip.ogg#t=3").as_deref(), Some("ogg"));
        assert_eq!(extension_hint("https://example.com/stream"), None);
        assert_eq!(extension_hint(".hidden"), None);
    }

    #[test]
    fn test_load_then_cache_hit() {
        let memory = Arc::new(MemoryTransport::new().with("a.mp3", Response::ok(b"2.0".to_vec())));
        let mut loader = loader(&memory);
        let (results, make) = capture();

        assert_eq!(loader.load("a.mp3", make()), LoadStatus::Fetching);
        assert!(results.borrow().is_empty());
        assert_eq!(loader.flush().deliver(), 1);

        assert_eq!(loader.load("a.mp3", make()), LoadStatus::Cached);
        assert_eq!(results.borrow().len(), 2);
        assert_eq!(memory.fetch_count("a.mp3"), 1);

        let entry = loader.entry("a.mp3").unwrap();
        assert_eq!(entry.http_status(), Some(200));
        assert_eq!(entry.transport_state(), TransportState::Done);
        assert!(entry.is_hit());
    }

    #[test]
    fn test_failed_entry_is_not_a_hit() {
        let memory = Arc::new(MemoryTransport::new().with("gone.mp3", Response::with_status(404)));
        let mut loader = loader(&memory);
        let (results, make) = capture();

        loader.load("gone.mp3", make());
        loader.flush().deliver();
        let failure = results.borrow()[0].clone().unwrap_err();
        assert_eq!(failure.http_status, Some(404));
        assert_eq!(failure.error, ResourceError::Http { status: 404 });

        assert_eq!(loader.load("gone.mp3", make()), LoadStatus::Fetching);
        loader.flush().deliver();
        assert_eq!(memory.fetch_count("gone.mp3"), 2);
        assert!(loader.entry("gone.mp3").unwrap().error().is_some());
    }

    #[test]
    fn test_decode_failure_reported() {
        let memory = Arc::new(MemoryTransport::new().with("bad.mp3", Response::ok(b"noise".to_vec())));
        let mut loader = loader(&memory);
        let (results, make) = capture();

        loader.load("bad.mp3", make());
        loader.flush().deliver();

        let failure = results.borrow()[0].clone().unwrap_err();
        assert!(matches!(failure.error, ResourceError::Decode(_)));
        assert_eq!(failure.state, TransportState::Done);
        assert_eq!(failure.http_status, Some(200));
    }

    #[test]
    fn test_abort_notifies_waiters_and_keeps_entry() {
        let memory = Arc::new(MemoryTransport::new().with("a.mp3", Response::ok(b"1.0".to_vec())));
        let mut loader = loader(&memory);
        let (results, make) = capture();

        loader.load("a.mp3", make());
        assert!(loader.abort("a.mp3"));
        assert!(!loader.abort("a.mp3"));
        assert!(!loader.abort("never.mp3"));

        let failure = results.borrow()[0].clone().unwrap_err();
        assert_eq!(failure.error, ResourceError::Aborted);
        assert_eq!(loader.entry("a.mp3").unwrap().transport_state(), TransportState::Aborted);
        assert_eq!(loader.flush().len(), 0);
    }

    #[test]
    fn test_clear_cache_forces_refetch() {
        let memory = Arc::new(MemoryTransport::new().with("a.mp3", Response::ok(b"1.0".to_vec())));
        let mut loader = loader(&memory);
        let (_results, make) = capture();

        loader.load("a.mp3", make());
        loader.flush().deliver();
        loader.clear_cache();
        assert!(loader.is_empty());

        assert_eq!(loader.load("a.mp3", make()), LoadStatus::Fetching);
        loader.flush().deliver();
        assert_eq!(memory.fetch_count("a.mp3"), 2);
    }

    #[test]
    fn test_poll_eventually_completes() {
        let memory = Arc::new(MemoryTransport::new().with("a.mp3", Response::ok(b"0.5".to_vec())));
        let mut loader = loader(&memory);
        let (results, make) = capture();

        loader.load("a.mp3", make());
        for _ in 0..500 {
            if loader.poll().deliver() > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(results.borrow().len(), 1);
        assert_eq!(loader.pending(), 0);
    }
}
