//! The beat clock.
//!
//! [`Metronome`] owns the tempo, the beat counter, the tap window, the timer
//! and the click output. It is polled by its host: every call to
//! [`Metronome::poll`] fires the beat that came due, if any, and renders the
//! audio that elapsed since the previous poll. The host waits for
//! [`Metronome::next_delay`] between polls.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    next_grid_deadline, AppConfig, AudioBackend, BeatTimer, Bpm, BpmRange, ClickAudio, ClickKind,
    Clock, DanceCueError, Result, TapTempo,
};

/// Beat counter value while stopped.
pub const REST_BEAT: u32 = 0;

/// Transport state of the beat clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Stopped,
    Running,
}

/// Notification sent to the host for every fired beat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub beat_number: u32,
    pub is_downbeat: bool,
    pub bpm: f64,
    /// Grid instant the beat belonged to.
    pub scheduled_at: Duration,
    /// Instant the beat was actually dispatched.
    pub fired_at: Duration,
}

impl BeatEvent {
    pub fn lateness(&self) -> Duration {
        self.fired_at.saturating_sub(self.scheduled_at)
    }
}

type BeatListener = Box<dyn FnMut(&BeatEvent) + Send>;

/// Whether `beat` is accented in a cycle of `beats_per_measure`: the first
/// beat and the first beat of the second half.
pub fn is_downbeat(beat: u32, beats_per_measure: u32) -> bool {
    beat == 1 || beat == beats_per_measure / 2 + 1
}

/// Tempo-driven beat clock with tap tempo and an accented click.
pub struct Metronome {
    clock: Arc<dyn Clock>,
    range: BpmRange,
    beats_per_measure: u32,
    bpm: Option<Bpm>,
    state: TransportState,
    current_beat: u32,
    last_beat_at: Option<Duration>,
    taps: TapTempo,
    timer: BeatTimer,
    audio: ClickAudio,
    listeners: Vec<BeatListener>,
}

impl Metronome {
    /// Validates the configuration and builds a stopped metronome. No audio
    /// output is acquired until [`Metronome::enable_audio`].
    pub fn configure(
        config: &AppConfig,
        clock: Arc<dyn Clock>,
        backend: Box<dyn AudioBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let metronome = &config.metronome;
        let range = BpmRange::from_config(metronome)?;
        let bpm = metronome
            .initial_bpm
            .map(|raw| range.validate(raw))
            .transpose()?;

        Ok(Self {
            clock,
            range,
            beats_per_measure: metronome.beats_per_measure,
            bpm,
            state: TransportState::Stopped,
            current_beat: REST_BEAT,
            last_beat_at: None,
            taps: TapTempo::from_config(metronome),
            timer: BeatTimer::new(),
            audio: ClickAudio::new(config.click.clone(), &config.audio, backend),
            listeners: Vec::new(),
        })
    }

    pub fn bpm(&self) -> Option<f64> {
        self.bpm.map(Bpm::value)
    }

    pub fn bpm_range(&self) -> BpmRange {
        self.range
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TransportState::Running
    }

    /// Most recently fired beat, or [`REST_BEAT`] while stopped.
    pub fn current_beat(&self) -> u32 {
        self.current_beat
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.beats_per_measure
    }

    /// The beat to stamp on a cue created right now. Only meaningful while
    /// the clock runs.
    pub fn beat_snapshot(&self) -> Option<u32> {
        (self.is_running() && self.current_beat != REST_BEAT).then_some(self.current_beat)
    }

    pub fn is_muted(&self) -> bool {
        self.audio.is_muted()
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.audio.is_enabled()
    }

    /// Clicks still sounding.
    pub fn active_voices(&self) -> usize {
        self.audio.active_voices()
    }

    pub fn on_beat<F>(&mut self, listener: F)
    where
        F: FnMut(&BeatEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Acquires the audio output. Safe to call repeatedly. On failure the
    /// beat clock keeps running without sound.
    pub fn enable_audio(&mut self) -> Result<()> {
        let now = self.clock.now();
        self.audio.enable(now).inspect_err(|err| {
            tracing::warn!(error = %err, "audio unavailable, beats will be silent");
        })
    }

    pub fn release_audio(&mut self) {
        self.audio.release();
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.set_muted(!self.audio.is_muted());
        self.audio.is_muted()
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.audio.set_muted(muted);
        tracing::debug!(muted, "click mute changed");
    }

    /// Starts the clock and fires beat 1 immediately. Does nothing without
    /// a BPM or while already running.
    pub fn start(&mut self) {
        if self.is_running() {
            tracing::debug!("start ignored, metronome already running");
            return;
        }
        let Some(bpm) = self.bpm else {
            tracing::debug!("start ignored, no bpm configured");
            return;
        };

        let now = self.clock.now();
        self.audio.advance_to(now);
        self.state = TransportState::Running;
        self.current_beat = REST_BEAT;
        tracing::info!(bpm = bpm.value(), "metronome started");

        self.fire_beat(bpm, now, now);
        self.timer.schedule(now + bpm.period());
    }

    /// Stops the clock. The pending tick is invalidated, so no beat fires
    /// after this returns. Clicks already sounding finish their envelope.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.timer.cancel();
        self.state = TransportState::Stopped;
        self.current_beat = REST_BEAT;
        self.last_beat_at = None;
        tracing::info!("metronome stopped");
    }

    /// Validates, rounds and clamps `value`, then retimes a running clock
    /// without touching the beat counter. Invalid values leave the current
    /// BPM in place.
    pub fn set_bpm(&mut self, value: f64) -> Result<f64> {
        let bpm = self.range.validate(value).inspect_err(|err| {
            tracing::warn!(error = %err, "rejected bpm change");
        })?;
        if !self.range.contains(value) {
            tracing::debug!(requested = value, applied = bpm.value(), "bpm clamped");
        }

        self.bpm = Some(bpm);
        if self.is_running() {
            self.reschedule(bpm);
        }
        Ok(bpm.value())
    }

    /// Relative change through [`Metronome::set_bpm`]. Overshooting either
    /// bound lands on the bound.
    pub fn adjust_bpm(&mut self, delta: f64) -> Result<f64> {
        if !delta.is_finite() {
            tracing::warn!(delta, "rejected bpm adjustment");
            return Err(DanceCueError::InvalidBpm(delta));
        }
        let current = self.bpm.ok_or(DanceCueError::BpmUnset)?;
        let target = (current.value() + delta).clamp(self.range.min, self.range.max);
        self.set_bpm(target)
    }

    /// Records a tap now. Returns the applied BPM once the window holds at
    /// least two taps.
    pub fn tap_tempo(&mut self) -> Option<f64> {
        let now = self.clock.now();
        let estimate = self.taps.tap(now)?;
        match self.set_bpm(estimate) {
            Ok(bpm) => {
                tracing::debug!(taps = self.taps.len(), estimate, bpm, "tap tempo");
                Some(bpm)
            }
            Err(_) => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timer.deadline()
    }

    /// Time the host should wait before polling again.
    pub fn next_delay(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.timer
            .deadline()
            .map(|deadline| deadline.saturating_sub(now))
    }

    /// Renders elapsed audio and fires the beat that came due, if any.
    pub fn poll(&mut self) -> Vec<BeatEvent> {
        let now = self.clock.now();
        self.audio.advance_to(now);

        let mut fired = Vec::new();
        let (Some(bpm), Some(tick)) = (self.bpm, self.timer.take_due(now)) else {
            return fired;
        };

        fired.push(self.fire_beat(bpm, tick.deadline, now));

        let (next, skipped) = next_grid_deadline(tick.deadline, bpm.period(), now);
        if skipped > 0 {
            let late_by = now - tick.deadline;
            tracing::warn!(skipped, ?late_by, "host fell behind, skipping beats");
            // The late beat stands in for the last skipped grid point.
            self.last_beat_at = Some(next - bpm.period());
        }
        self.timer.schedule(next);
        fired
    }

    fn reschedule(&mut self, bpm: Bpm) {
        let now = self.clock.now();
        let anchor = self.last_beat_at.unwrap_or(now);
        let deadline = (anchor + bpm.period()).max(now);
        self.timer.schedule(deadline);
        let next_in = deadline - now;
        tracing::debug!(bpm = bpm.value(), ?next_in, "beat clock retimed");
    }

    fn fire_beat(&mut self, bpm: Bpm, scheduled_at: Duration, fired_at: Duration) -> BeatEvent {
        self.current_beat = self.current_beat % self.beats_per_measure + 1;
        self.last_beat_at = Some(scheduled_at);

        let event = BeatEvent {
            beat_number: self.current_beat,
            is_downbeat: is_downbeat(self.current_beat, self.beats_per_measure),
            bpm: bpm.value(),
            scheduled_at,
            fired_at,
        };

        self.audio.trigger(ClickKind::for_beat(event.is_downbeat));
        for listener in &mut self.listeners {
            listener(&event);
        }
        tracing::trace!(beat = event.beat_number, downbeat = event.is_downbeat, "beat");
        event
    }
}

impl fmt::Debug for Metronome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metronome")
            .field("bpm", &self.bpm)
            .field("state", &self.state)
            .field("current_beat", &self.current_beat)
            .field("beats_per_measure", &self.beats_per_measure)
            .field("taps", &self.taps.len())
            .field("next_deadline", &self.timer.deadline())
            .field("audio", &self.audio)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
