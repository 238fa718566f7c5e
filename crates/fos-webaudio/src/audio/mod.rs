//! Audio primitives
//!
//! Decoded buffers and the grain scheduling capability the playback engine
//! drives.

mod context;

use std::fmt;
use std::sync::Arc;

use crate::MediaError;

pub use context::{
    AudioBuffer, AudioBufferSourceNode, AudioContext, AudioContextOptions, AudioContextState,
    AudioParam, ClockMode,
};

/// One scheduled playback of a buffer region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grain {
    /// Start offset into the buffer, in seconds
    pub offset: f64,
    /// Length of buffer time to play, in seconds
    pub duration: f64,
    pub rate: f64,
    pub looping: bool,
    pub gain: f64,
}

/// A playing (or playable) buffer source
pub trait GrainSource: fmt::Debug {
    fn start(&mut self, grain: Grain) -> Result<(), MediaError>;
    fn stop(&mut self);
    fn set_gain(&mut self, gain: f64);
    fn set_playback_rate(&mut self, rate: f64);
    fn set_loop(&mut self, looping: bool);
}

/// Clock and source factory
pub trait Scheduler {
    /// Monotonic time in seconds
    fn now(&self) -> f64;

    /// Create a source that plays `buffer`
    fn create_session(&self, buffer: Arc<AudioBuffer>) -> Result<Box<dyn GrainSource>, MediaError>;
}
