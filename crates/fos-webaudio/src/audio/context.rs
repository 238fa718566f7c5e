//! Audio Context
//!
//! AudioContext, buffer source nodes and audio buffers.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Instant;

use super::{Grain, GrainSource, Scheduler};
use crate::MediaError;

/// Audio context state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioContextState {
    Suspended,
    #[default]
    Running,
    Closed,
}

/// Where `current_time` comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClockMode {
    /// Wall clock since the context was created
    #[default]
    Realtime,
    /// Only moves when [`AudioContext::advance`] is called
    Manual,
}

/// Audio context options
#[derive(Debug, Clone, Default)]
pub struct AudioContextOptions {
    pub sample_rate: Option<f32>,
    pub clock: ClockMode,
}

#[derive(Debug)]
enum Clock {
    Realtime(Instant),
    Manual(Cell<f64>),
}

/// Base audio context
#[derive(Debug)]
pub struct AudioContext {
    state: Cell<AudioContextState>,
    sample_rate: f32,
    clock: Clock,
    next_id: Cell<u32>,
}

impl AudioContext {
    pub fn new() -> Self {
        Self::with_options(AudioContextOptions::default())
    }

    /// Context with a manually advanced clock
    pub fn offline() -> Self {
        Self::with_options(AudioContextOptions {
            clock: ClockMode::Manual,
            ..Default::default()
        })
    }

    pub fn with_options(options: AudioContextOptions) -> Self {
        let clock = match options.clock {
            ClockMode::Realtime => Clock::Realtime(Instant::now()),
            ClockMode::Manual => Clock::Manual(Cell::new(0.0)),
        };
        Self {
            state: Cell::new(AudioContextState::Running),
            sample_rate: options.sample_rate.unwrap_or(44100.0),
            clock,
            next_id: Cell::new(1),
        }
    }

    pub fn state(&self) -> AudioContextState {
        self.state.get()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Seconds since the context started
    pub fn current_time(&self) -> f64 {
        match &self.clock {
            Clock::Realtime(origin) => origin.elapsed().as_secs_f64(),
            Clock::Manual(time) => time.get(),
        }
    }

    /// Move a manual clock forward. Returns false on a realtime clock.
    pub fn advance(&self, seconds: f64) -> bool {
        match &self.clock {
            Clock::Manual(time) => {
                time.set(time.get() + seconds.max(0.0));
                true
            }
            Clock::Realtime(_) => false,
        }
    }

    /// Resume playback
    pub fn resume(&self) -> Result<(), MediaError> {
        if self.state.get() == AudioContextState::Closed {
            return Err(MediaError::InvalidState("audio context is closed".into()));
        }
        self.state.set(AudioContextState::Running);
        Ok(())
    }

    /// Suspend playback
    pub fn suspend(&self) -> Result<(), MediaError> {
        if self.state.get() == AudioContextState::Closed {
            return Err(MediaError::InvalidState("audio context is closed".into()));
        }
        self.state.set(AudioContextState::Suspended);
        Ok(())
    }

    /// Close context
    pub fn close(&self) {
        self.state.set(AudioContextState::Closed);
    }

    /// Create buffer source
    pub fn create_buffer_source(&self, buffer: Arc<AudioBuffer>) -> AudioBufferSourceNode {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        AudioBufferSourceNode::new(id, buffer)
    }
}

impl Default for AudioContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for AudioContext {
    fn now(&self) -> f64 {
        self.current_time()
    }

    fn create_session(&self, buffer: Arc<AudioBuffer>) -> Result<Box<dyn GrainSource>, MediaError> {
        match self.state.get() {
            AudioContextState::Running => Ok(Box::new(self.create_buffer_source(buffer))),
            state => Err(MediaError::InvalidState(format!(
                "cannot schedule audio on a {state:?} context"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Idle,
    Playing,
    Stopped,
}

/// Audio buffer source node
///
/// Single-shot like its Web Audio namesake: once started it cannot be
/// started again, the engine creates a fresh node per grain.
#[derive(Debug)]
pub struct AudioBufferSourceNode {
    pub id: u32,
    pub buffer: Arc<AudioBuffer>,
    pub playback_rate: AudioParam,
    pub gain: AudioParam,
    pub loop_: bool,
    offset: f64,
    duration: f64,
    state: SourceState,
}

impl AudioBufferSourceNode {
    pub fn new(id: u32, buffer: Arc<AudioBuffer>) -> Self {
        Self {
            id,
            buffer,
            playback_rate: AudioParam::with_range(1.0, -1.0, 2.0),
            gain: AudioParam::with_range(1.0, 0.0, 1.0),
            loop_: false,
            offset: 0.0,
            duration: 0.0,
            state: SourceState::Idle,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == SourceState::Playing
    }

    /// Scheduled (offset, duration) of the current grain
    pub fn grain(&self) -> (f64, f64) {
        (self.offset, self.duration)
    }
}

impl GrainSource for AudioBufferSourceNode {
    fn start(&mut self, grain: Grain) -> Result<(), MediaError> {
        if self.state != SourceState::Idle {
            return Err(MediaError::InvalidState(format!(
                "buffer source {} already started",
                self.id
            )));
        }

        let length = self.buffer.duration();
        if grain.offset.is_nan() {
            return Err(MediaError::InvalidState("grain offset is NaN".into()));
        }
        self.offset = grain.offset.clamp(0.0, length);
        self.duration = grain.duration.clamp(0.0, length - self.offset);
        self.playback_rate.set_value(grain.rate);
        self.gain.set_value(grain.gain);
        self.loop_ = grain.looping;
        self.state = SourceState::Playing;

        tracing::trace!(
            "source {} grain on: offset={:.3} duration={:.3} rate={} loop={}",
            self.id,
            self.offset,
            self.duration,
            self.playback_rate.value,
            self.loop_
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.state == SourceState::Playing {
            tracing::trace!("source {} off", self.id);
        }
        self.state = SourceState::Stopped;
    }

    fn set_gain(&mut self, gain: f64) {
        self.gain.set_value(gain);
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.playback_rate.set_value(rate);
    }

    fn set_loop(&mut self, looping: bool) {
        self.loop_ = looping;
    }
}

/// Audio buffer
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub number_of_channels: u32,
    pub length: u32,
    pub sample_rate: f32,
    data: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(channels: u32, length: u32, sample_rate: f32) -> Self {
        Self {
            number_of_channels: channels,
            length,
            sample_rate,
            data: vec![vec![0.0; length as usize]; channels as usize],
        }
    }

    /// Silent buffer lasting `seconds`
    pub fn silent(channels: u32, seconds: f64, sample_rate: f32) -> Self {
        let length = (seconds.max(0.0) * sample_rate as f64).round() as u32;
        Self::new(channels, length, sample_rate)
    }

    /// Build from planar channel data; shorter channels are zero-padded
    pub fn from_channels(mut data: Vec<Vec<f32>>, sample_rate: f32) -> Self {
        let length = data.iter().map(Vec::len).max().unwrap_or(0);
        for channel in &mut data {
            channel.resize(length, 0.0);
        }
        Self {
            number_of_channels: data.len() as u32,
            length: length as u32,
            sample_rate,
            data,
        }
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.length as f64 / self.sample_rate as f64
    }

    pub fn get_channel_data(&self, channel: u32) -> Option<&[f32]> {
        self.data.get(channel as usize).map(|v| v.as_slice())
    }

    pub fn copy_to_channel(&mut self, source: &[f32], channel: u32) {
        if let Some(ch) = self.data.get_mut(channel as usize) {
            let len = ch.len().min(source.len());
            ch[..len].copy_from_slice(&source[..len]);
        }
    }
}

/// Audio parameter
#[derive(Debug, Clone)]
pub struct AudioParam {
    pub value: f64,
    pub default_value: f64,
    pub min_value: f64,
    pub max_value: f64,
}

impl AudioParam {
    pub fn new(default: f64) -> Self {
        Self::with_range(default, f64::MIN, f64::MAX)
    }

    pub fn with_range(default: f64, min: f64, max: f64) -> Self {
        Self {
            value: default,
            default_value: default,
            min_value: min,
            max_value: max,
        }
    }

    /// Set the value, clamped to the nominal range
    pub fn set_value(&mut self, value: f64) {
        self.value = value.clamp(self.min_value, self.max_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_context_states() {
        let ctx = AudioContext::new();
        assert_eq!(ctx.state(), AudioContextState::Running);

        ctx.suspend().unwrap();
        assert_eq!(ctx.state(), AudioContextState::Suspended);
        ctx.resume().unwrap();

        ctx.close();
        assert!(ctx.resume().is_err());
        assert!(ctx.suspend().is_err());
    }

    #[test]
    fn test_manual_clock() {
        let ctx = AudioContext::offline();
        assert_eq!(ctx.current_time(), 0.0);
        assert!(ctx.advance(1.5));
        ctx.advance(-3.0);
        assert_eq!(ctx.now(), 1.5);

        assert!(!AudioContext::new().advance(1.0));
    }

    #[test]
    fn test_sessions_need_running_context() {
        let ctx = AudioContext::offline();
        let buffer = Arc::new(AudioBuffer::silent(1, 1.0, 8000.0));
        assert!(ctx.create_session(buffer.clone()).is_ok());

        ctx.suspend().unwrap();
        assert!(matches!(ctx.create_session(buffer), Err(MediaError::InvalidState(_))));
    }

    #[test]
    fn test_source_node_is_single_shot() {
        let ctx = AudioContext::offline();
        let mut node = ctx.create_buffer_source(Arc::new(AudioBuffer::silent(2, 4.0, 1000.0)));
        let grain = Grain {
            offset: 1.0,
            duration: 10.0,
            rate: 1.0,
            looping: false,
            gain: 0.5,
        };

        node.start(grain).unwrap();
        assert!(node.is_playing());
        assert_eq!(node.grain(), (1.0, 3.0));
        assert_eq!(node.gain.value, 0.5);

        node.stop();
        assert!(!node.is_playing());
        assert!(node.start(grain).is_err());
    }

    #[test]
    fn test_node_ids_increase() {
        let ctx = AudioContext::offline();
        let buffer = Arc::new(AudioBuffer::silent(1, 0.1, 8000.0));
        let a = ctx.create_buffer_source(buffer.clone());
        let b = ctx.create_buffer_source(buffer);
        assert!(b.id > a.id);
    }

    #[test]
    fn test_audio_buffer_duration() {
        let buffer = AudioBuffer::silent(2, 2.5, 44100.0);
        assert_eq!(buffer.length, 110250);
        assert!((buffer.duration() - 2.5).abs() < 1e-9);
        assert_eq!(buffer.get_channel_data(1).map(<[f32]>::len), Some(110250));
        assert!(buffer.get_channel_data(2).is_none());
    }

    #[test]
    fn test_buffer_from_channels_pads() {
        let mut buffer = AudioBuffer::from_channels(vec![vec![0.5; 4], vec![0.25; 2]], 4.0);
        assert_eq!(buffer.number_of_channels, 2);
        assert_eq!(buffer.length, 4);
        assert_eq!(buffer.get_channel_data(1), Some(&[0.25, 0.25, 0.0, 0.0][..]));

        buffer.copy_to_channel(&[1.0, 1.0, 1.0, 1.0, 1.0], 1);
        assert_eq!(buffer.get_channel_data(1), Some(&[1.0; 4][..]));
    }

    #[test]
    fn test_param_clamps() {
        let mut param = AudioParam::with_range(1.0, 0.0, 1.0);
        param.set_value(3.0);
        assert_eq!(param.value, 1.0);
        param.set_value(-1.0);
        assert_eq!(param.value, 0.0);
        assert_eq!(param.default_value, 1.0);
    }
}
