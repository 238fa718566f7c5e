//! fOS WebAudio
//!
//! HTML audio element semantics on top of a buffer-based audio engine.
//!
//! The engine underneath can only decode a whole resource into a buffer and
//! play or stop a scheduled grain of it. [`MediaElement`] layers the media
//! element lifecycle over that:
//! - network and ready states with the standard event cascade
//! - watched properties (volume, currentTime, playbackRate, ...)
//! - a shared, deduplicating fetch-and-decode cache
//! - play/pause/seek mapped onto grain scheduling

pub mod audio;
pub mod config;
pub mod decode;
pub mod element;
pub mod engine;
pub mod events;
pub mod loader;
pub mod watch;

pub use audio::{
    AudioBuffer, AudioBufferSourceNode, AudioContext, AudioContextOptions, AudioContextState,
    AudioParam, ClockMode, Grain, GrainSource, Scheduler,
};
pub use config::{ConfigError, MediaConfig};
pub use decode::{DecodeError, Decoder, SymphoniaDecoder};
pub use element::{
    CanPlayType, ElementError, ElementHandler, MediaContext, MediaElement, MediaElementBuilder,
    MediaErrorCode, NetworkState, PreloadHint, Property, PropertyValue, ReadyState, SourceElement,
};
pub use engine::{PlaybackEngine, PlaybackSession};
pub use events::{EventDispatcher, ListenerId, MediaEvent, UnknownEvent};
pub use loader::{
    CacheEntry, Completions, LoadFailure, LoadResult, LoadStatus, ResourceError, ResourceLoader,
    SharedLoader, TransportState,
};
pub use watch::{Observed, PropertyWatch, WatchHandler};

/// Media error
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// A watched property rejected the written value
    #[error("{property} out of range: {value}")]
    Range { property: &'static str, value: String },

    /// Element bookkeeping reached a state no transition produces
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl MediaError {
    pub(crate) fn range(property: &'static str, value: impl std::fmt::Debug) -> Self {
        MediaError::Range {
            property,
            value: format!("{value:?}"),
        }
    }
}
