use std::f32::consts::TAU;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AudioConfig, ClickConfig, DanceCueError, EnvelopeConfig, Result};

/// Accent of a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClickKind {
    Downbeat,
    Regular,
}

impl ClickKind {
    pub fn for_beat(is_downbeat: bool) -> Self {
        if is_downbeat {
            Self::Downbeat
        } else {
            Self::Regular
        }
    }

    fn envelope(self, config: &ClickConfig) -> EnvelopeConfig {
        match self {
            Self::Downbeat => config.downbeat,
            Self::Regular => config.regular,
        }
    }
}

/// Platform audio output. Opened once per [`ClickAudio::enable`] and fed
/// mono blocks afterwards.
pub trait AudioBackend: fmt::Debug + Send {
    fn open(&mut self, sample_rate: u32) -> Result<()>;
    fn write(&mut self, block: &[f32]) -> Result<()>;
    fn close(&mut self);
}

/// Backend without a device. Keeps enough bookkeeping for the host to show
/// a level meter.
#[derive(Debug, Default, Clone)]
pub struct OfflineBackend {
    open: bool,
    frames_written: u64,
    peak: f32,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }
}

impl AudioBackend for OfflineBackend {
    fn open(&mut self, _sample_rate: u32) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn write(&mut self, block: &[f32]) -> Result<()> {
        if !self.open {
            return Err(DanceCueError::AudioUnavailable(
                "offline backend is closed".to_string(),
            ));
        }
        self.frames_written += block.len() as u64;
        self.peak = block.iter().fold(self.peak, |peak, s| peak.max(s.abs()));
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// One sounding click: a sine oscillator behind its own envelope. Dropped
/// as soon as the envelope has run out.
#[derive(Debug, Clone)]
struct Voice {
    id: u64,
    phase_step: f32,
    attack_frames: u32,
    decay_frames: u32,
    peak: f32,
    floor: f32,
    position: u32,
}

impl Voice {
    fn new(id: u64, kind: ClickKind, config: &ClickConfig, sample_rate: u32) -> Self {
        let envelope = kind.envelope(config);
        let rate = sample_rate as f32;
        Self {
            id,
            phase_step: TAU * config.frequency_hz / rate,
            attack_frames: (config.attack_ms * rate / 1_000.0).round() as u32,
            decay_frames: ((envelope.decay_ms * rate / 1_000.0).round() as u32).max(1),
            peak: envelope.peak_gain,
            floor: config.floor_gain,
            position: 0,
        }
    }

    fn len(&self) -> u32 {
        self.attack_frames.saturating_add(self.decay_frames)
    }

    fn is_finished(&self) -> bool {
        self.position >= self.len()
    }

    fn gain_at(&self, frame: u32) -> f32 {
        if frame < self.attack_frames {
            return self.peak * frame as f32 / self.attack_frames as f32;
        }
        let progress = (frame - self.attack_frames) as f32 / self.decay_frames as f32;
        self.peak * (self.floor / self.peak).powf(progress)
    }

    /// Mixes the remaining envelope into `out`. Returns the frames consumed.
    fn mix_into(&mut self, out: &mut [f32]) -> usize {
        let remaining = self.len().saturating_sub(self.position) as usize;
        let frames = remaining.min(out.len());
        for slot in out.iter_mut().take(frames) {
            let phase = self.phase_step * self.position as f32;
            *slot += phase.sin() * self.gain_at(self.position);
            self.position += 1;
        }
        frames
    }
}

/// Renders a single click to a buffer without any backend.
pub fn render_click(config: &ClickConfig, kind: ClickKind, sample_rate: u32) -> Vec<f32> {
    let mut voice = Voice::new(0, kind, config, sample_rate);
    let mut out = vec![0.0; voice.len() as usize];
    voice.mix_into(&mut out);
    out
}

/// Mixer state that only exists while the output is acquired.
#[derive(Debug)]
struct AudioContext {
    sample_rate: u32,
    rendered_frames: u64,
    voices: Vec<Voice>,
    next_voice_id: u64,
}

impl AudioContext {
    fn new(sample_rate: u32, now: Duration) -> Self {
        Self {
            sample_rate,
            rendered_frames: frames_at(now, sample_rate),
            voices: Vec::new(),
            next_voice_id: 0,
        }
    }
}

fn frames_at(time: Duration, sample_rate: u32) -> u64 {
    (time.as_secs_f64() * f64::from(sample_rate)) as u64
}

/// Owner of the click output.
///
/// Construction acquires nothing. [`ClickAudio::enable`] opens the backend,
/// after which every [`ClickAudio::trigger`] spawns an independent voice.
pub struct ClickAudio {
    click: ClickConfig,
    sample_rate: u32,
    block_size: usize,
    backend: Box<dyn AudioBackend>,
    context: Option<AudioContext>,
    muted: bool,
    scratch: Vec<f32>,
}

impl ClickAudio {
    pub fn new(click: ClickConfig, audio: &AudioConfig, backend: Box<dyn AudioBackend>) -> Self {
        Self {
            click,
            sample_rate: audio.sample_rate,
            block_size: audio.block_size.max(1),
            backend,
            context: None,
            muted: false,
            scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_enabled(&self) -> bool {
        self.context.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Number of clicks whose envelope has not completed yet.
    pub fn active_voices(&self) -> usize {
        self.context.as_ref().map_or(0, |ctx| ctx.voices.len())
    }

    /// Opens the backend. Calling it again while enabled is a no-op.
    pub fn enable(&mut self, now: Duration) -> Result<()> {
        if self.context.is_some() {
            return Ok(());
        }

        self.backend.open(self.sample_rate).map_err(|err| match err {
            DanceCueError::AudioUnavailable(reason) => DanceCueError::AudioUnavailable(reason),
            other => DanceCueError::AudioUnavailable(other.to_string()),
        })?;
        self.context = Some(AudioContext::new(self.sample_rate, now));
        tracing::debug!(sample_rate = self.sample_rate, "click audio enabled");
        Ok(())
    }

    /// Drops every voice and closes the backend.
    pub fn release(&mut self) {
        if let Some(context) = self.context.take() {
            tracing::debug!(dropped_voices = context.voices.len(), "click audio released");
            self.backend.close();
        }
    }

    /// Starts a click at the current render position. Returns `None` when
    /// muted or when no output has been acquired.
    pub fn trigger(&mut self, kind: ClickKind) -> Option<u64> {
        if self.muted {
            return None;
        }
        let context = self.context.as_mut()?;
        let id = context.next_voice_id;
        context.next_voice_id += 1;
        context
            .voices
            .push(Voice::new(id, kind, &self.click, context.sample_rate));
        Some(id)
    }

    /// Renders everything between the last call and `now` to the backend.
    pub fn advance_to(&mut self, now: Duration) {
        let Some(context) = self.context.as_mut() else {
            return;
        };

        let target = frames_at(now, context.sample_rate);
        let mut pending = target.saturating_sub(context.rendered_frames);
        let mut failure = None;

        while pending > 0 && !context.voices.is_empty() {
            let frames = pending.min(self.block_size as u64) as usize;
            self.scratch.clear();
            self.scratch.resize(frames, 0.0);

            for voice in &mut context.voices {
                voice.mix_into(&mut self.scratch);
            }
            context.voices.retain(|voice| {
                let done = voice.is_finished();
                if done {
                    tracing::trace!(voice = voice.id, "click finished");
                }
                !done
            });

            if let Err(err) = self.backend.write(&self.scratch) {
                failure = Some(err);
                break;
            }
            pending -= frames as u64;
        }

        // Silence between clicks is not rendered.
        context.rendered_frames = context.rendered_frames.max(target);

        if let Some(err) = failure {
            tracing::warn!(error = %err, "audio output failed, continuing without sound");
            self.release();
        }
    }
}

impl Drop for ClickAudio {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ClickAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickAudio")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("backend", &self.backend)
            .field("enabled", &self.is_enabled())
            .field("active_voices", &self.active_voices())
            .field("muted", &self.muted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Default)]
    struct Probe {
        opens: u32,
        closes: u32,
        frames: u64,
    }

    #[derive(Debug, Clone, Default)]
    struct ProbeBackend {
        probe: Arc<Mutex<Probe>>,
        fail_writes: bool,
    }

    impl AudioBackend for ProbeBackend {
        fn open(&mut self, _sample_rate: u32) -> Result<()> {
            self.probe.lock().unwrap().opens += 1;
            Ok(())
        }

        fn write(&mut self, block: &[f32]) -> Result<()> {
            if self.fail_writes {
                return Err(DanceCueError::AudioUnavailable("device lost".into()));
            }
            self.probe.lock().unwrap().frames += block.len() as u64;
            Ok(())
        }

        fn close(&mut self) {
            self.probe.lock().unwrap().closes += 1;
        }
    }

    #[derive(Debug)]
    struct DeniedBackend;

    impl AudioBackend for DeniedBackend {
        fn open(&mut self, _sample_rate: u32) -> Result<()> {
            Err(DanceCueError::msg("permission denied"))
        }

        fn write(&mut self, _block: &[f32]) -> Result<()> {
            unreachable!("never opened")
        }

        fn close(&mut self) {}
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn audio_with(backend: impl AudioBackend + 'static) -> ClickAudio {
        ClickAudio::new(
            ClickConfig::default(),
            &AudioConfig::default(),
            Box::new(backend),
        )
    }

    #[test]
    fn click_envelope_matches_accent() {
        let config = ClickConfig::default();
        let downbeat = render_click(&config, ClickKind::Downbeat, 48_000);
        let regular = render_click(&config, ClickKind::Regular, 48_000);

        // 1 ms attack plus the decay.
        assert_eq!(downbeat.len(), 48 + 9_600);
        assert_eq!(regular.len(), 48 + 4_800);

        let peak = |samples: &[f32]| samples.iter().fold(0.0_f32, |p, s| p.max(s.abs()));
        assert!((peak(&downbeat) - 0.7).abs() < 0.03);
        assert!((peak(&regular) - 0.5).abs() < 0.03);
        assert!(downbeat.last().unwrap().abs() <= 0.0011);
    }

    #[test]
    fn oversized_envelope_does_not_overflow() {
        let mut config = ClickConfig::default();
        config.attack_ms = 1.0e12;
        config.downbeat.decay_ms = 1.0e12;
        let voice = Voice::new(0, ClickKind::Downbeat, &config, 48_000);
        assert_eq!(voice.len(), u32::MAX);
    }

    #[test]
    fn nothing_plays_before_enable() {
        let mut audio = audio_with(OfflineBackend::new());
        assert_eq!(audio.trigger(ClickKind::Downbeat), None);
        assert_eq!(audio.active_voices(), 0);
        assert!(!audio.is_enabled());
    }

    #[test]
    fn enable_is_idempotent() {
        let backend = ProbeBackend::default();
        let probe = backend.probe.clone();
        let mut audio = audio_with(backend);

        audio.enable(ms(0)).unwrap();
        audio.enable(ms(10)).unwrap();
        assert_eq!(probe.lock().unwrap().opens, 1);

        drop(audio);
        assert_eq!(probe.lock().unwrap().closes, 1);
    }

    #[test]
    fn denied_output_reports_unavailable() {
        let mut audio = audio_with(DeniedBackend);
        let err = audio.enable(ms(0)).unwrap_err();
        assert!(matches!(err, DanceCueError::AudioUnavailable(_)));
        assert_eq!(audio.trigger(ClickKind::Regular), None);
    }

    #[test]
    fn overlapping_clicks_release_their_voices() {
        let backend = ProbeBackend::default();
        let probe = backend.probe.clone();
        let mut audio = audio_with(backend);
        audio.enable(ms(1_000)).unwrap();

        audio.trigger(ClickKind::Downbeat);
        audio.advance_to(ms(1_050));
        audio.trigger(ClickKind::Regular);
        assert_eq!(audio.active_voices(), 2);

        audio.advance_to(ms(1_160));
        assert_eq!(audio.active_voices(), 1);

        audio.advance_to(ms(1_300));
        assert_eq!(audio.active_voices(), 0);
        assert!(probe.lock().unwrap().frames >= 48 + 9_600);
    }

    #[test]
    fn many_clicks_leave_no_voices_behind() {
        let mut audio = audio_with(OfflineBackend::new());
        audio.enable(ms(0)).unwrap();

        for i in 0..64 {
            audio.trigger(if i % 4 == 0 {
                ClickKind::Downbeat
            } else {
                ClickKind::Regular
            });
            audio.advance_to(ms(i * 20));
        }
        audio.advance_to(ms(64 * 20 + 500));
        assert_eq!(audio.active_voices(), 0);
    }

    #[test]
    fn muted_output_spawns_nothing() {
        let mut audio = audio_with(OfflineBackend::new());
        audio.enable(ms(0)).unwrap();
        audio.set_muted(true);

        assert_eq!(audio.trigger(ClickKind::Downbeat), None);
        audio.set_muted(false);
        assert!(audio.trigger(ClickKind::Downbeat).is_some());
    }

    #[test]
    fn failed_write_releases_the_output() {
        let backend = ProbeBackend {
            fail_writes: true,
            ..Default::default()
        };
        let probe = backend.probe.clone();
        let mut audio = audio_with(backend);
        audio.enable(ms(0)).unwrap();
        audio.trigger(ClickKind::Regular);

        audio.advance_to(ms(20));
        assert!(!audio.is_enabled());
        assert_eq!(audio.active_voices(), 0);
        assert_eq!(probe.lock().unwrap().closes, 1);
    }
}
