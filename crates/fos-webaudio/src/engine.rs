//! Playback Engine
//!
//! Maps transport commands onto grain scheduling. A session exists only
//! while audio is scheduled; elapsed time is always derived from the
//! scheduler clock, never accumulated.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::audio::{AudioBuffer, Grain, GrainSource, Scheduler};
use crate::MediaError;

/// One scheduled run of the current buffer
pub struct PlaybackSession {
    buffer: Arc<AudioBuffer>,
    start_wall_clock: f64,
    grain_start: f64,
    rate: f64,
    looping: bool,
    gain: f64,
    source: Box<dyn GrainSource>,
}

impl PlaybackSession {
    pub fn buffer(&self) -> &Arc<AudioBuffer> {
        &self.buffer
    }

    /// Scheduler time the grain clock is anchored at
    pub fn start_wall_clock(&self) -> f64 {
        self.start_wall_clock
    }

    /// Buffer position at `start_wall_clock`
    pub fn grain_start(&self) -> f64 {
        self.grain_start
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    fn elapsed_position(&self, now: f64) -> f64 {
        (now - self.start_wall_clock) * self.rate + self.grain_start
    }
}

impl fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("start_wall_clock", &self.start_wall_clock)
            .field("grain_start", &self.grain_start)
            .field("rate", &self.rate)
            .field("looping", &self.looping)
            .field("gain", &self.gain)
            .finish()
    }
}

/// Owns the decoded buffer and at most one playback session
pub struct PlaybackEngine {
    scheduler: Rc<dyn Scheduler>,
    buffer: Option<Arc<AudioBuffer>>,
    session: Option<PlaybackSession>,
}

impl PlaybackEngine {
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            buffer: None,
            session: None,
        }
    }

    /// Replace the buffer. Any running session keeps its old buffer until stopped.
    pub fn set_buffer(&mut self, buffer: Arc<AudioBuffer>) {
        self.buffer = Some(buffer);
    }

    pub fn clear_buffer(&mut self) {
        self.buffer = None;
    }

    pub fn buffer(&self) -> Option<&Arc<AudioBuffer>> {
        self.buffer.as_ref()
    }

    /// Buffer duration in seconds, NaN with no buffer
    pub fn duration(&self) -> f64 {
        self.buffer.as_ref().map_or(f64::NAN, |b| b.duration())
    }

    /// Start a grain at `position`. An existing session is replaced.
    pub fn start(&mut self, position: f64, rate: f64, looping: bool, gain: f64) -> Result<(), MediaError> {
        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| MediaError::InvalidState("no buffer to play".into()))?;

        self.stop();

        let mut source = self.scheduler.create_session(buffer.clone())?;
        let duration = (buffer.duration() - position).max(0.0);
        source.start(Grain {
            offset: position,
            duration,
            rate,
            looping,
            gain,
        })?;

        tracing::debug!("Session start at {:.3}s (rate {}, loop {})", position, rate, looping);
        self.session = Some(PlaybackSession {
            buffer,
            start_wall_clock: self.scheduler.now(),
            grain_start: position,
            rate,
            looping,
            gain,
            source,
        });
        Ok(())
    }

    /// Stop the session, returning the position it reached
    pub fn stop(&mut self) -> Option<f64> {
        let position = self.position()?;
        if let Some(mut session) = self.session.take() {
            session.source.stop();
            tracing::debug!("Session stop at {:.3}s", position);
        }
        Some(position)
    }

    /// Position within the buffer, wrapped when looping and clamped otherwise
    pub fn position(&self) -> Option<f64> {
        let session = self.session.as_ref()?;
        let raw = session.elapsed_position(self.scheduler.now());
        let duration = session.buffer.duration();
        if duration <= 0.0 {
            return Some(0.0);
        }
        Some(if session.looping {
            raw.rem_euclid(duration)
        } else {
            raw.clamp(0.0, duration)
        })
    }

    /// Unclamped `(now - start) * rate + grain_start`
    pub fn raw_position(&self) -> Option<f64> {
        self.session
            .as_ref()
            .map(|s| s.elapsed_position(self.scheduler.now()))
    }

    pub fn set_gain(&mut self, gain: f64) {
        if let Some(session) = self.session.as_mut() {
            session.gain = gain;
            session.source.set_gain(gain);
        }
    }

    /// Change the rate, re-anchoring the clock so the position stays continuous
    pub fn set_rate(&mut self, rate: f64) {
        let now = self.scheduler.now();
        if let Some(session) = self.session.as_mut() {
            session.grain_start = session.elapsed_position(now);
            session.start_wall_clock = now;
            session.rate = rate;
            session.source.set_playback_rate(rate);
        }
    }

    /// Toggle looping, re-anchoring at the current (wrapped) position
    pub fn set_loop(&mut self, looping: bool) {
        let now = self.scheduler.now();
        let position = self.position();
        if let (Some(session), Some(position)) = (self.session.as_mut(), position) {
            session.grain_start = position;
            session.start_wall_clock = now;
            session.looping = looping;
            session.source.set_loop(looping);
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }
}

impl fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("duration", &self.duration())
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioContext;

    fn engine(seconds: f64) -> (Rc<AudioContext>, PlaybackEngine) {
        let ctx = Rc::new(AudioContext::offline());
        let mut engine = PlaybackEngine::new(ctx.clone());
        engine.set_buffer(Arc::new(AudioBuffer::silent(1, seconds, 1000.0)));
        (ctx, engine)
    }

    #[test]
    fn test_start_requires_buffer() {
        let ctx = Rc::new(AudioContext::offline());
        let mut engine = PlaybackEngine::new(ctx);
        assert!(engine.start(0.0, 1.0, false, 1.0).is_err());
        assert!(engine.duration().is_nan());
    }

    #[test]
    fn test_elapsed_time() {
        let (ctx, mut engine) = engine(10.0);
        engine.start(1.0, 1.0, false, 1.0).unwrap();
        ctx.advance(2.0);
        assert!((engine.position().unwrap() - 3.0).abs() < 1e-9);

        let stopped = engine.stop().unwrap();
        assert!((stopped - 3.0).abs() < 1e-9);
        assert!(!engine.is_active());
        assert_eq!(engine.stop(), None);
    }

    #[test]
    fn test_position_clamped_and_wrapped() {
        let (ctx, mut engine) = engine(4.0);
        engine.start(3.0, 1.0, false, 1.0).unwrap();
        ctx.advance(5.0);
        assert_eq!(engine.position(), Some(4.0));
        assert!((engine.raw_position().unwrap() - 8.0).abs() < 1e-9);

        engine.start(3.0, 1.0, true, 1.0).unwrap();
        ctx.advance(2.0);
        assert!((engine.position().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_change_reanchors() {
        let (ctx, mut engine) = engine(20.0);
        engine.start(0.0, 1.0, false, 1.0).unwrap();
        ctx.advance(2.0);
        engine.set_rate(2.0);
        ctx.advance(1.0);
        assert!((engine.position().unwrap() - 4.0).abs() < 1e-9);
        assert_eq!(engine.session().unwrap().rate(), 2.0);
    }

    #[test]
    fn test_loop_off_keeps_wrapped_position() {
        let (ctx, mut engine) = engine(5.0);
        engine.start(0.0, 1.0, true, 1.0).unwrap();
        ctx.advance(12.0);
        engine.set_loop(false);

        assert!((engine.raw_position().unwrap() - 2.0).abs() < 1e-9);
        ctx.advance(1.0);
        assert!((engine.position().unwrap() - 3.0).abs() < 1e-9);
        assert!(!engine.session().unwrap().looping());
    }

    #[test]
    fn test_gain_applies_to_session() {
        let (_ctx, mut engine) = engine(1.0);
        engine.set_gain(0.5);
        assert!(engine.session().is_none());

        engine.start(0.0, 1.0, false, 1.0).unwrap();
        engine.set_gain(0.25);
        assert_eq!(engine.session().unwrap().gain(), 0.25);
    }

    #[test]
    fn test_closed_context_refuses_session() {
        let (ctx, mut engine) = engine(1.0);
        ctx.close();
        assert!(matches!(
            engine.start(0.0, 1.0, false, 1.0),
            Err(MediaError::InvalidState(_))
        ));
        assert!(!engine.is_active());
    }
}
