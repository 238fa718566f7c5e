//! Media Events
//!
//! Lifecycle event vocabulary and synchronous dispatch.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Media element event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaEvent {
    // Resource fetching
    LoadStart,
    Progress,
    Suspend,
    Abort,
    Error,
    Emptied,
    Stalled,

    // Ready state
    LoadedMetadata,
    LoadedData,
    CanPlay,
    CanPlayThrough,
    Playing,
    Waiting,

    // Seeking and timeline
    Seeking,
    Seeked,
    Ended,
    DurationChange,
    TimeUpdate,

    // Transport and attributes
    Play,
    Pause,
    RateChange,
    VolumeChange,
}

impl MediaEvent {
    pub const ALL: [MediaEvent; 22] = [
        MediaEvent::LoadStart,
        MediaEvent::Progress,
        MediaEvent::Suspend,
        MediaEvent::Abort,
        MediaEvent::Error,
        MediaEvent::Emptied,
        MediaEvent::Stalled,
        MediaEvent::LoadedMetadata,
        MediaEvent::LoadedData,
        MediaEvent::CanPlay,
        MediaEvent::CanPlayThrough,
        MediaEvent::Playing,
        MediaEvent::Waiting,
        MediaEvent::Seeking,
        MediaEvent::Seeked,
        MediaEvent::Ended,
        MediaEvent::DurationChange,
        MediaEvent::TimeUpdate,
        MediaEvent::Play,
        MediaEvent::Pause,
        MediaEvent::RateChange,
        MediaEvent::VolumeChange,
    ];

    /// DOM event type name
    pub fn as_str(self) -> &'static str {
        match self {
            MediaEvent::LoadStart => "loadstart",
            MediaEvent::Progress => "progress",
            MediaEvent::Suspend => "suspend",
            MediaEvent::Abort => "abort",
            MediaEvent::Error => "error",
            MediaEvent::Emptied => "emptied",
            MediaEvent::Stalled => "stalled",
            MediaEvent::LoadedMetadata => "loadedmetadata",
            MediaEvent::LoadedData => "loadeddata",
            MediaEvent::CanPlay => "canplay",
            MediaEvent::CanPlayThrough => "canplaythrough",
            MediaEvent::Playing => "playing",
            MediaEvent::Waiting => "waiting",
            MediaEvent::Seeking => "seeking",
            MediaEvent::Seeked => "seeked",
            MediaEvent::Ended => "ended",
            MediaEvent::DurationChange => "durationchange",
            MediaEvent::TimeUpdate => "timeupdate",
            MediaEvent::Play => "play",
            MediaEvent::Pause => "pause",
            MediaEvent::RateChange => "ratechange",
            MediaEvent::VolumeChange => "volumechange",
        }
    }

    /// Parse an `on<type>` handler attribute name
    pub fn from_handler_name(name: &str) -> Result<Self, UnknownEvent> {
        name.strip_prefix("on")
            .ok_or_else(|| UnknownEvent(name.to_string()))?
            .parse()
    }
}

impl fmt::Display for MediaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaEvent::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// Unknown event type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown media event: {0}")]
pub struct UnknownEvent(pub String);

/// Zero-argument event callback
pub type Listener = Box<dyn FnMut()>;

/// Handle returned by [`EventDispatcher::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event dispatcher
///
/// Each event type has an optional `on<type>` handler and an ordered list of
/// listeners. A handler, when set, is the only callback a dispatch reaches.
/// Callbacks are not isolated: a panicking callback unwinds out of
/// [`dispatch`](Self::dispatch) and the rest of the list is skipped.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<MediaEvent, Listener>,
    listeners: HashMap<MediaEvent, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `on<type>` handler, replacing any previous one
    pub fn set_handler(&mut self, event: MediaEvent, handler: impl FnMut() + 'static) {
        self.handlers.insert(event, Box::new(handler));
    }

    /// Remove the `on<type>` handler
    pub fn clear_handler(&mut self, event: MediaEvent) -> bool {
        self.handlers.remove(&event).is_some()
    }

    pub fn has_handler(&self, event: MediaEvent) -> bool {
        self.handlers.contains_key(&event)
    }

    /// Append a listener; listeners run in registration order
    pub fn add_listener(&mut self, event: MediaEvent, listener: impl FnMut() + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(event)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Remove a listener
    pub fn remove_listener(&mut self, event: MediaEvent, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        before != list.len()
    }

    pub fn listener_count(&self, event: MediaEvent) -> usize {
        self.listeners.get(&event).map_or(0, Vec::len)
    }

    /// Dispatch an event, returning how many callbacks ran
    pub fn dispatch(&mut self, event: MediaEvent) -> usize {
        tracing::debug!("event: {}", event);

        if let Some(handler) = self.handlers.get_mut(&event) {
            handler();
            return 1;
        }

        let Some(list) = self.listeners.get_mut(&event) else {
            return 0;
        };
        for (_, listener) in list.iter_mut() {
            listener();
        }
        list.len()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field(
                "listeners",
                &self.listeners.iter().map(|(e, l)| (*e, l.len())).collect::<Vec<_>>(),
            )
            .finish()
    }
}
