//! Media Element
//!
//! HTMLMediaElement lifecycle over the buffer engine: network and ready
//! states, the event cascade tied to ready-state edges, watched attributes
//! and play/pause/seek on top of [`PlaybackEngine`].
//!
//! All attribute writes, including the element's own state transitions,
//! go through the [`PropertyWatch`] handler table so that every ready-state
//! change passes the emission rules.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use fos_transport::Transport;

use crate::audio::{AudioBuffer, Scheduler};
use crate::config::MediaConfig;
use crate::decode::Decoder;
use crate::engine::PlaybackEngine;
use crate::events::{EventDispatcher, ListenerId, MediaEvent, UnknownEvent};
use crate::loader::{LoadFailure, LoadResult, ResourceError, ResourceLoader, SharedLoader};
use crate::watch::{Observed, PropertyWatch, WatchHandler};
use crate::MediaError;

/// Network state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkState {
    #[default]
    Empty = 0,
    Idle = 1,
    Loading = 2,
    NoSource = 3,
}

impl NetworkState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Empty),
            1 => Some(Self::Idle),
            2 => Some(Self::Loading),
            3 => Some(Self::NoSource),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "NETWORK_EMPTY",
            Self::Idle => "NETWORK_IDLE",
            Self::Loading => "NETWORK_LOADING",
            Self::NoSource => "NETWORK_NO_SOURCE",
        }
    }

    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Network(state) => Some(*state),
            PropertyValue::Number(n) => integral(*n).and_then(Self::from_code),
            _ => None,
        }
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ReadyState {
    #[default]
    HaveNothing = 0,
    HaveMetadata = 1,
    HaveCurrentData = 2,
    HaveFutureData = 3,
    HaveEnoughData = 4,
}

impl ReadyState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::HaveNothing),
            1 => Some(Self::HaveMetadata),
            2 => Some(Self::HaveCurrentData),
            3 => Some(Self::HaveFutureData),
            4 => Some(Self::HaveEnoughData),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HaveNothing => "HAVE_NOTHING",
            Self::HaveMetadata => "HAVE_METADATA",
            Self::HaveCurrentData => "HAVE_CURRENT_DATA",
            Self::HaveFutureData => "HAVE_FUTURE_DATA",
            Self::HaveEnoughData => "HAVE_ENOUGH_DATA",
        }
    }

    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Ready(state) => Some(*state),
            PropertyValue::Number(n) => integral(*n).and_then(Self::from_code),
            _ => None,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn integral(n: f64) -> Option<u8> {
    (n.fract() == 0.0 && (0.0..=255.0).contains(&n)).then_some(n as u8)
}

/// Preload hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreloadHint {
    None,
    Metadata,
    #[default]
    Auto,
}

/// Answer of [`MediaElement::can_play_type`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanPlayType {
    /// Unknown
    Empty,
    Maybe,
    Probably,
}

impl CanPlayType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::Maybe => "maybe",
            Self::Probably => "probably",
        }
    }
}

/// MediaError codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorCode {
    Aborted = 1,
    Network = 2,
    Decode = 3,
    SrcNotSupported = 4,
}

impl MediaErrorCode {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for MediaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Aborted => "MEDIA_ERR_ABORTED",
            Self::Network => "MEDIA_ERR_NETWORK",
            Self::Decode => "MEDIA_ERR_DECODE",
            Self::SrcNotSupported => "MEDIA_ERR_SRC_NOT_SUPPORTED",
        })
    }
}

/// Value of the element's `error` attribute
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ElementError {
    pub code: MediaErrorCode,
    pub message: String,
}

impl From<&ResourceError> for ElementError {
    fn from(error: &ResourceError) -> Self {
        let code = match error {
            ResourceError::Transport(_) | ResourceError::Http { .. } => MediaErrorCode::Network,
            ResourceError::Decode(_) => MediaErrorCode::Decode,
            ResourceError::Aborted => MediaErrorCode::Aborted,
        };
        Self {
            code,
            message: error.to_string(),
        }
    }
}

/// Child `<source>` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceElement {
    pub src: String,
    pub mime: Option<String>,
}

/// Watched attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Src,
    Volume,
    CurrentTime,
    PlaybackRate,
    Duration,
    Loop,
    Muted,
    ReadyState,
    NetworkState,
}

impl Property {
    pub const ALL: [Property; 9] = [
        Property::Src,
        Property::Volume,
        Property::CurrentTime,
        Property::PlaybackRate,
        Property::Duration,
        Property::Loop,
        Property::Muted,
        Property::ReadyState,
        Property::NetworkState,
    ];

    /// IDL attribute name
    pub fn name(self) -> &'static str {
        match self {
            Property::Src => "src",
            Property::Volume => "volume",
            Property::CurrentTime => "currentTime",
            Property::PlaybackRate => "playbackRate",
            Property::Duration => "duration",
            Property::Loop => "loop",
            Property::Muted => "muted",
            Property::ReadyState => "readyState",
            Property::NetworkState => "networkState",
        }
    }
}

/// Stored attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Number(f64),
    Flag(bool),
    Text(String),
    Ready(ReadyState),
    Network(NetworkState),
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            PropertyValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        PropertyValue::Number(n)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Flag(b)
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<ReadyState> for PropertyValue {
    fn from(state: ReadyState) -> Self {
        PropertyValue::Ready(state)
    }
}

impl From<NetworkState> for PropertyValue {
    fn from(state: NetworkState) -> Self {
        PropertyValue::Network(state)
    }
}

/// Attribute write handler of a [`MediaElement`]
pub type ElementHandler = WatchHandler<MediaElement, Property, PropertyValue, MediaError>;

/// Loader, clock and defaults shared by a group of elements
#[derive(Clone)]
pub struct MediaContext {
    loader: SharedLoader,
    scheduler: Rc<dyn Scheduler>,
    config: MediaConfig,
}

impl MediaContext {
    pub fn new(loader: SharedLoader, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            loader,
            scheduler,
            config: MediaConfig::default(),
        }
    }

    /// Context with a fresh loader over `transport` and `decoder`
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn Decoder>,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        Self::new(ResourceLoader::new(transport, decoder).shared(), scheduler)
    }

    pub fn with_config(mut self, config: MediaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn loader(&self) -> &SharedLoader {
        &self.loader
    }

    pub fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }
}

impl fmt::Debug for MediaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaContext")
            .field("loader", &self.loader)
            .field("config", &self.config)
            .finish()
    }
}

struct Completion {
    generation: u64,
    url: String,
    result: LoadResult,
}

/// Audio media element
pub struct MediaElement {
    props: PropertyWatch<Property, PropertyValue, MediaElement, MediaError>,
    events: EventDispatcher,
    engine: PlaybackEngine,
    ctx: MediaContext,
    sources: Vec<SourceElement>,
    current_src: String,
    default_playback_rate: f64,
    autoplay: bool,
    paused: bool,
    ended: bool,
    seeking: bool,
    buffered: bool,
    error: Option<ElementError>,
    preload: PreloadHint,
    /// Bumped by every `load()`; completions from older loads are dropped
    generation: u64,
    inflight: Option<String>,
    inbox: Rc<RefCell<VecDeque<Completion>>>,
}

impl Observed for MediaElement {
    type Key = Property;
    type Value = PropertyValue;
    type Error = MediaError;

    fn watch_table(&mut self) -> &mut PropertyWatch<Property, PropertyValue, MediaElement, MediaError> {
        &mut self.props
    }
}

impl MediaElement {
    /// Create an element with no source. Nothing is loaded.
    pub fn new(ctx: MediaContext) -> Self {
        let config = ctx.config.clone();
        let mut props = PropertyWatch::new();
        props.define(Property::Src, PropertyValue::Text(String::new()));
        props.define(Property::Volume, PropertyValue::Number(1.0));
        props.define(Property::CurrentTime, PropertyValue::Number(0.0));
        props.define(Property::PlaybackRate, PropertyValue::Number(config.default_playback_rate));
        props.define(Property::Duration, PropertyValue::Number(f64::NAN));
        props.define(Property::Loop, PropertyValue::Flag(false));
        props.define(Property::Muted, PropertyValue::Flag(config.default_muted));
        props.define(Property::ReadyState, PropertyValue::Ready(ReadyState::HaveNothing));
        props.define(Property::NetworkState, PropertyValue::Network(NetworkState::Empty));
        for (property, handler) in default_handlers() {
            props.watch(property, handler);
        }

        Self {
            props,
            events: EventDispatcher::new(),
            engine: PlaybackEngine::new(ctx.scheduler.clone()),
            ctx,
            sources: Vec::new(),
            current_src: String::new(),
            default_playback_rate: config.default_playback_rate,
            autoplay: config.autoplay,
            paused: true,
            ended: false,
            seeking: false,
            buffered: false,
            error: None,
            preload: PreloadHint::Auto,
            generation: 0,
            inflight: None,
            inbox: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Create an element for `src` and start loading it
    pub fn with_src(ctx: MediaContext, src: &str) -> Result<Self, MediaError> {
        Self::builder(ctx).src(src).build()
    }

    pub fn builder(ctx: MediaContext) -> MediaElementBuilder {
        MediaElementBuilder {
            element: Self::new(ctx),
        }
    }

    // ---- attributes ----

    fn number(&self, property: Property) -> f64 {
        self.props
            .get(property)
            .and_then(PropertyValue::as_number)
            .unwrap_or(f64::NAN)
    }

    fn flag(&self, property: Property) -> bool {
        self.props
            .get(property)
            .and_then(PropertyValue::as_flag)
            .unwrap_or(false)
    }

    /// Raw stored value of a watched attribute
    pub fn get(&self, property: Property) -> Option<&PropertyValue> {
        self.props.get(property)
    }

    /// Write an attribute through its handler
    pub fn set_property(&mut self, property: Property, value: impl Into<PropertyValue>) -> Result<(), MediaError> {
        self.assign(property, value.into())
    }

    /// Replace the handler for `property`
    pub fn watch(&mut self, property: Property, handler: ElementHandler) -> bool {
        self.props.watch(property, handler)
    }

    /// Make `property` a plain field holding its current value
    pub fn unwatch(&mut self, property: Property) -> bool {
        self.props.unwatch(property)
    }

    pub fn src(&self) -> &str {
        self.props
            .get(Property::Src)
            .and_then(PropertyValue::as_text)
            .unwrap_or("")
    }

    pub fn set_src(&mut self, src: impl Into<String>) -> Result<(), MediaError> {
        self.assign(Property::Src, PropertyValue::Text(src.into()))
    }

    pub fn volume(&self) -> f64 {
        self.number(Property::Volume)
    }

    pub fn set_volume(&mut self, volume: f64) -> Result<(), MediaError> {
        self.assign(Property::Volume, volume.into())
    }

    /// Stored `currentTime`; see [`position`](Self::position) for the live value
    pub fn current_time(&self) -> f64 {
        self.number(Property::CurrentTime)
    }

    pub fn set_current_time(&mut self, time: f64) -> Result<(), MediaError> {
        self.assign(Property::CurrentTime, time.into())
    }

    pub fn playback_rate(&self) -> f64 {
        self.number(Property::PlaybackRate)
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<(), MediaError> {
        self.assign(Property::PlaybackRate, rate.into())
    }

    pub fn default_playback_rate(&self) -> f64 {
        self.default_playback_rate
    }

    /// Rate `load()` resets `playbackRate` to
    pub fn set_default_playback_rate(&mut self, rate: f64) -> Result<(), MediaError> {
        if !(-1.0..=2.0).contains(&rate) {
            return Err(MediaError::range("defaultPlaybackRate", rate));
        }
        self.default_playback_rate = rate;
        Ok(())
    }

    /// Duration in seconds, NaN until a resource is loaded
    pub fn duration(&self) -> f64 {
        self.number(Property::Duration)
    }

    pub fn set_duration(&mut self, duration: f64) -> Result<(), MediaError> {
        self.assign(Property::Duration, duration.into())
    }

    pub fn looping(&self) -> bool {
        self.flag(Property::Loop)
    }

    pub fn set_loop(&mut self, looping: bool) -> Result<(), MediaError> {
        self.assign(Property::Loop, looping.into())
    }

    pub fn muted(&self) -> bool {
        self.flag(Property::Muted)
    }

    pub fn set_muted(&mut self, muted: bool) -> Result<(), MediaError> {
        self.assign(Property::Muted, muted.into())
    }

    /// Current ready state.
    ///
    /// Fails with [`MediaError::ContractViolation`] if the stored value is
    /// not a ready state, which only a write around the handler can produce.
    pub fn ready_state(&self) -> Result<ReadyState, MediaError> {
        let value = self.props.get(Property::ReadyState);
        value.and_then(ReadyState::from_value).ok_or_else(|| {
            MediaError::ContractViolation(format!("readyState not defined: {value:?}"))
        })
    }

    pub fn set_ready_state(&mut self, state: ReadyState) -> Result<(), MediaError> {
        self.assign(Property::ReadyState, state.into())
    }

    pub fn network_state(&self) -> Result<NetworkState, MediaError> {
        let value = self.props.get(Property::NetworkState);
        value.and_then(NetworkState::from_value).ok_or_else(|| {
            MediaError::ContractViolation(format!("networkState not defined: {value:?}"))
        })
    }

    pub fn set_network_state(&mut self, state: NetworkState) -> Result<(), MediaError> {
        self.assign(Property::NetworkState, state.into())
    }

    pub fn current_src(&self) -> &str {
        &self.current_src
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn set_autoplay(&mut self, autoplay: bool) {
        self.autoplay = autoplay;
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn seeking(&self) -> bool {
        self.seeking
    }

    pub fn buffered(&self) -> bool {
        self.buffered
    }

    pub fn preload(&self) -> PreloadHint {
        self.preload
    }

    pub fn error(&self) -> Option<&ElementError> {
        self.error.as_ref()
    }

    pub fn sources(&self) -> &[SourceElement] {
        &self.sources
    }

    /// Append a child `<source>`
    pub fn add_source(&mut self, src: impl Into<String>, mime: Option<&str>) {
        self.sources.push(SourceElement {
            src: src.into(),
            mime: mime.map(str::to_string),
        });
    }

    /// Decoded buffer of the current resource
    pub fn buffer(&self) -> Option<&Arc<AudioBuffer>> {
        self.engine.buffer()
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    /// Playback position: live while a session runs, `currentTime` otherwise
    pub fn position(&self) -> f64 {
        self.engine.position().unwrap_or_else(|| self.current_time())
    }

    /// Always the empty answer; type sniffing is left to the decoder
    pub fn can_play_type(&self, _mime: &str) -> CanPlayType {
        CanPlayType::Empty
    }

    // ---- events ----

    /// Set the `on<type>` handler
    pub fn set_handler(&mut self, event: MediaEvent, handler: impl FnMut() + 'static) {
        self.events.set_handler(event, handler);
    }

    /// Set a handler by its attribute name, e.g. `"onplay"`
    pub fn set_handler_by_name(&mut self, name: &str, handler: impl FnMut() + 'static) -> Result<(), UnknownEvent> {
        let event = MediaEvent::from_handler_name(name)?;
        self.events.set_handler(event, handler);
        Ok(())
    }

    pub fn clear_handler(&mut self, event: MediaEvent) -> bool {
        self.events.clear_handler(event)
    }

    pub fn add_event_listener(&mut self, event: MediaEvent, listener: impl FnMut() + 'static) -> ListenerId {
        self.events.add_listener(event, listener)
    }

    pub fn remove_event_listener(&mut self, event: MediaEvent, id: ListenerId) -> bool {
        self.events.remove_listener(event, id)
    }

    fn emit(&mut self, event: MediaEvent) {
        self.events.dispatch(event);
    }

    // ---- lifecycle ----

    /// Run the resource selection and fetch algorithm
    pub fn load(&mut self) -> Result<(), MediaError> {
        let network = self.network_state()?;

        // Completions of the previous load are stale from here on.
        self.generation += 1;
        if let Some(url) = self.inflight.take() {
            tracing::debug!("Abandoning load of {}", url);
        }

        if network != NetworkState::Empty {
            self.emit(MediaEvent::Emptied);
            self.engine.stop();
            self.engine.clear_buffer();
            self.buffered = false;
            self.current_src.clear();
            self.assign(Property::NetworkState, NetworkState::Empty.into())?;
            self.assign(Property::ReadyState, ReadyState::HaveNothing.into())?;
            self.paused = true;
            self.seeking = false;
            self.ended = false;
            if self.current_time() != 0.0 {
                self.assign(Property::CurrentTime, 0.0.into())?;
                self.emit(MediaEvent::TimeUpdate);
            }
            self.assign(Property::Duration, f64::NAN.into())?;
        }

        self.assign(Property::PlaybackRate, self.default_playback_rate.into())?;
        self.error = None;
        self.autoplay = self.ctx.config.autoplay;

        let Some(url) = self.select_source() else {
            tracing::debug!("No source to load");
            return self.assign(Property::NetworkState, NetworkState::NoSource.into());
        };

        self.preload = PreloadHint::Auto;
        self.assign(Property::NetworkState, NetworkState::Loading.into())?;
        self.emit(MediaEvent::LoadStart);
        self.fetch(url);

        // Cache hits complete synchronously
        self.drain_inbox()
    }

    /// First candidate URL: `src`, else the first child source
    fn select_source(&self) -> Option<String> {
        let src = self.src();
        let candidate = if src.is_empty() {
            self.sources.iter().map(|s| s.src.as_str()).find(|s| !s.is_empty())?
        } else {
            src
        };
        Some(self.ctx.config.resolve(candidate))
    }

    fn fetch(&mut self, url: String) {
        let generation = self.generation;
        let inbox = self.inbox.clone();
        let tag = url.clone();
        self.inflight = Some(url.clone());

        let status = self.ctx.loader.borrow_mut().load(&url, move |result| {
            inbox.borrow_mut().push_back(Completion {
                generation,
                url: tag,
                result,
            });
        });
        tracing::debug!("Load {} ({:?}, generation {})", url, status, generation);
    }

    fn drain_inbox(&mut self) -> Result<(), MediaError> {
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(completion) = next else {
                return Ok(());
            };

            if completion.generation != self.generation {
                tracing::warn!(
                    "Discarding stale load of {} (generation {}, current {})",
                    completion.url,
                    completion.generation,
                    self.generation
                );
                continue;
            }

            self.inflight = None;
            match completion.result {
                Ok(buffer) => self.resource_loaded(completion.url, buffer)?,
                Err(failure) => self.resource_failed(failure)?,
            }
        }
    }

    fn resource_loaded(&mut self, url: String, buffer: Arc<AudioBuffer>) -> Result<(), MediaError> {
        let duration = buffer.duration();
        self.engine.set_buffer(buffer);
        self.buffered = true;
        self.current_src = url;
        self.assign(Property::Duration, duration.into())?;
        self.emit(MediaEvent::LoadedData);

        // play() below announces autoplay; keep the cascade from doing it too
        let autoplay = std::mem::replace(&mut self.autoplay, false);
        self.assign(Property::ReadyState, ReadyState::HaveEnoughData.into())?;
        self.preload = PreloadHint::None;

        if autoplay {
            self.autoplay = true;
            self.play()?;
        }
        Ok(())
    }

    fn resource_failed(&mut self, failure: LoadFailure) -> Result<(), MediaError> {
        tracing::warn!("Media load failed for {}: {}", failure.url, failure.error);
        self.assign(Property::NetworkState, NetworkState::NoSource.into())?;
        self.preload = PreloadHint::None;
        self.error = Some(ElementError::from(&failure.error));
        self.emit(MediaEvent::Error);
        Ok(())
    }

    /// Start or resume playback
    pub fn play(&mut self) -> Result<(), MediaError> {
        if self.network_state()? == NetworkState::Empty {
            tracing::trace!("play() on empty element, candidate {:?}", self.select_source());
        }
        if self.ended {
            self.seek(0.0)?;
        }
        if !self.paused {
            return Ok(());
        }

        self.emit(MediaEvent::Play);
        match self.ready_state()? {
            ReadyState::HaveNothing | ReadyState::HaveMetadata | ReadyState::HaveCurrentData => {
                self.emit(MediaEvent::Waiting);
                return Ok(());
            }
            ReadyState::HaveFutureData | ReadyState::HaveEnoughData => {}
        }

        self.emit(MediaEvent::Playing);
        self.start_session(self.current_time())?;
        self.paused = false;
        self.autoplay = false;
        Ok(())
    }

    /// Pause playback, storing the reached position in `currentTime`
    pub fn pause(&mut self) -> Result<(), MediaError> {
        if self.network_state()? == NetworkState::Empty {
            tracing::trace!("pause() on empty element, candidate {:?}", self.select_source());
        }
        self.autoplay = false;
        if self.paused {
            return Ok(());
        }

        self.paused = true;
        self.emit(MediaEvent::TimeUpdate);
        self.emit(MediaEvent::Pause);
        if let Some(position) = self.engine.stop() {
            let position = self.within_duration(position);
            self.assign(Property::CurrentTime, position.into())?;
        }
        Ok(())
    }

    /// Clamp an engine position into the `currentTime` domain of the
    /// `duration` attribute, which may be shorter than the buffer
    fn within_duration(&self, position: f64) -> f64 {
        let duration = self.duration();
        if duration.is_nan() {
            0.0
        } else {
            position.clamp(0.0, duration)
        }
    }

    fn seek(&mut self, position: f64) -> Result<(), MediaError> {
        self.ended = false;
        self.assign(Property::CurrentTime, position.into())?;
        self.emit(MediaEvent::TimeUpdate);
        Ok(())
    }

    fn effective_gain(&self) -> f64 {
        if self.muted() { 0.0 } else { self.volume() }
    }

    fn start_session(&mut self, position: f64) -> Result<(), MediaError> {
        let gain = self.effective_gain();
        self.engine
            .start(position, self.playback_rate(), self.looping(), gain)
    }

    /// Apply finished loads and detect the end of playback. Never blocks.
    pub fn poll(&mut self) -> Result<(), MediaError> {
        let completions = self.ctx.loader.borrow_mut().poll();
        completions.deliver();
        self.drain_inbox()?;
        self.check_ended()
    }

    /// Wait for every in-flight load of the shared loader and apply this
    /// element's results
    pub fn settle(&mut self) -> Result<(), MediaError> {
        let completions = self.ctx.loader.borrow_mut().flush();
        completions.deliver();
        self.drain_inbox()?;
        self.check_ended()
    }

    fn check_ended(&mut self) -> Result<(), MediaError> {
        if self.paused || self.looping() {
            return Ok(());
        }
        let (Some(raw), Some(session)) = (self.engine.raw_position(), self.engine.session()) else {
            return Ok(());
        };
        let duration = session.buffer().duration();
        let boundary = if raw >= duration {
            duration
        } else if raw <= 0.0 && session.rate() < 0.0 {
            0.0
        } else {
            return Ok(());
        };

        tracing::debug!("Playback ended at {:.3}s", boundary);
        self.engine.stop();
        self.paused = true;
        let boundary = self.within_duration(boundary);
        self.assign(Property::CurrentTime, boundary.into())?;
        self.ended = true;
        self.emit(MediaEvent::TimeUpdate);
        self.emit(MediaEvent::Pause);
        self.emit(MediaEvent::Ended);
        Ok(())
    }

    /// Events for a ready-state edge
    fn ready_state_changed(&mut self, prev: ReadyState, next: ReadyState) {
        use ReadyState::*;

        if prev == HaveNothing && next == HaveMetadata {
            self.emit(MediaEvent::LoadedMetadata);
        }
        if prev == HaveMetadata && next == HaveCurrentData {
            self.emit(MediaEvent::LoadedData);
        }
        if prev >= HaveFutureData
            && next <= HaveCurrentData
            && !self.ended
            && !self.paused
            && self.error.is_none()
        {
            self.emit(MediaEvent::TimeUpdate);
            self.emit(MediaEvent::Waiting);
        }
        if prev <= HaveCurrentData && next == HaveFutureData {
            self.emit(MediaEvent::CanPlay);
            if !self.paused {
                self.emit(MediaEvent::Playing);
            }
        }
        if next == HaveEnoughData {
            if prev <= HaveCurrentData {
                self.emit(MediaEvent::CanPlay);
            }
            if !self.paused {
                self.emit(MediaEvent::Playing);
            }
            if self.autoplay && self.paused {
                self.emit(MediaEvent::Play);
                self.emit(MediaEvent::Playing);
            }
            self.emit(MediaEvent::CanPlayThrough);
        }
    }
}

impl fmt::Debug for MediaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaElement")
            .field("props", &self.props)
            .field("current_src", &self.current_src)
            .field("paused", &self.paused)
            .field("ended", &self.ended)
            .field("autoplay", &self.autoplay)
            .field("error", &self.error)
            .field("generation", &self.generation)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Configures handlers, listeners and sources before the initial load
pub struct MediaElementBuilder {
    element: MediaElement,
}

impl MediaElementBuilder {
    pub fn src(mut self, src: impl Into<String>) -> Self {
        self.element
            .props
            .define(Property::Src, PropertyValue::Text(src.into()));
        self
    }

    pub fn source(mut self, src: impl Into<String>, mime: Option<&str>) -> Self {
        self.element.add_source(src, mime);
        self
    }

    /// Set the `on<type>` handler
    pub fn on(mut self, event: MediaEvent, handler: impl FnMut() + 'static) -> Self {
        self.element.set_handler(event, handler);
        self
    }

    pub fn listen(mut self, event: MediaEvent, listener: impl FnMut() + 'static) -> Self {
        self.element.add_event_listener(event, listener);
        self
    }

    /// Finish; loads immediately when a `src` was given
    pub fn build(self) -> Result<MediaElement, MediaError> {
        let mut element = self.element;
        if !element.src().is_empty() {
            element.load()?;
        }
        Ok(element)
    }
}

// ---- attribute handlers ----

fn default_handlers() -> [(Property, ElementHandler); 9] {
    [
        (Property::Src, on_src),
        (Property::Volume, on_volume),
        (Property::CurrentTime, on_current_time),
        (Property::PlaybackRate, on_playback_rate),
        (Property::Duration, on_duration),
        (Property::Loop, on_loop),
        (Property::Muted, on_muted),
        (Property::ReadyState, on_ready_state),
        (Property::NetworkState, on_network_state),
    ]
}

fn expect_number(property: Property, value: &PropertyValue) -> Result<f64, MediaError> {
    value
        .as_number()
        .ok_or_else(|| MediaError::range(property.name(), value))
}

fn expect_flag(property: Property, value: &PropertyValue) -> Result<bool, MediaError> {
    value
        .as_flag()
        .ok_or_else(|| MediaError::range(property.name(), value))
}

fn on_src(_: &mut MediaElement, key: Property, _: &PropertyValue, new: PropertyValue) -> Result<PropertyValue, MediaError> {
    match new {
        PropertyValue::Text(_) => Ok(new),
        other => Err(MediaError::range(key.name(), other)),
    }
}

fn on_volume(
    el: &mut MediaElement,
    key: Property,
    _: &PropertyValue,
    new: PropertyValue,
) -> Result<PropertyValue, MediaError> {
    let volume = expect_number(key, &new)?;
    if !(0.0..=1.0).contains(&volume) {
        return Err(MediaError::range(key.name(), volume));
    }
    if el.engine.is_active() {
        let gain = if el.muted() { 0.0 } else { volume };
        el.engine.set_gain(gain);
        el.emit(MediaEvent::VolumeChange);
    }
    Ok(new)
}

fn on_current_time(
    el: &mut MediaElement,
    key: Property,
    _: &PropertyValue,
    new: PropertyValue,
) -> Result<PropertyValue, MediaError> {
    let time = expect_number(key, &new)?;
    // NaN duration admits only 0
    if !(time >= 0.0 && (time <= el.duration() || time == 0.0)) {
        return Err(MediaError::range(key.name(), time));
    }
    if el.engine.is_active() && !el.paused {
        el.engine.stop();
        el.emit(MediaEvent::TimeUpdate);
        if let Err(e) = el.start_session(time) {
            // The old session is gone; leave the element paused
            el.paused = true;
            return Err(e);
        }
    }
    Ok(new)
}

fn on_playback_rate(
    el: &mut MediaElement,
    key: Property,
    old: &PropertyValue,
    new: PropertyValue,
) -> Result<PropertyValue, MediaError> {
    let rate = expect_number(key, &new)?;
    if !(-1.0..=2.0).contains(&rate) {
        return Err(MediaError::range(key.name(), rate));
    }
    el.engine.set_rate(rate);
    if old.as_number() != Some(rate) {
        el.emit(MediaEvent::RateChange);
    }
    Ok(new)
}

fn on_duration(
    el: &mut MediaElement,
    key: Property,
    _: &PropertyValue,
    new: PropertyValue,
) -> Result<PropertyValue, MediaError> {
    let duration = expect_number(key, &new)?;
    if duration < 0.0 {
        return Err(MediaError::range(key.name(), duration));
    }
    el.emit(MediaEvent::DurationChange);
    Ok(new)
}

fn on_loop(el: &mut MediaElement, key: Property, _: &PropertyValue, new: PropertyValue) -> Result<PropertyValue, MediaError> {
    el.engine.set_loop(expect_flag(key, &new)?);
    Ok(new)
}

fn on_muted(el: &mut MediaElement, key: Property, _: &PropertyValue, new: PropertyValue) -> Result<PropertyValue, MediaError> {
    let muted = expect_flag(key, &new)?;
    let gain = if muted { 0.0 } else { el.volume() };
    el.engine.set_gain(gain);
    Ok(new)
}

fn on_ready_state(
    el: &mut MediaElement,
    key: Property,
    old: &PropertyValue,
    new: PropertyValue,
) -> Result<PropertyValue, MediaError> {
    let next = ReadyState::from_value(&new).ok_or_else(|| MediaError::range(key.name(), &new))?;
    let prev = ReadyState::from_value(old).unwrap_or_default();
    tracing::debug!("readyState: {}", next);
    if prev != next {
        el.ready_state_changed(prev, next);
    }
    Ok(PropertyValue::Ready(next))
}

fn on_network_state(
    _: &mut MediaElement,
    key: Property,
    _: &PropertyValue,
    new: PropertyValue,
) -> Result<PropertyValue, MediaError> {
    let next = NetworkState::from_value(&new).ok_or_else(|| MediaError::range(key.name(), &new))?;
    tracing::debug!("networkState: {}", next);
    Ok(PropertyValue::Network(next))
}
