//! Core library for the Dance Cue tool.
//!
//! The heart of the crate is the [`Metronome`]: a polled beat clock with a
//! self-correcting schedule, tap tempo and an accented click whose audio
//! output is acquired lazily. Around it sit the cue sheet that stamps video
//! annotations with the active beat, and a small analysis helper used to
//! inspect the click tone.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod cues;
pub mod error;
pub mod metronome;
pub mod tempo;
pub mod timeline;

pub use analysis::{profile_click, ClickProfile};
pub use audio::{render_click, AudioBackend, ClickAudio, ClickKind, OfflineBackend};
pub use config::{AppConfig, AudioConfig, ClickConfig, EnvelopeConfig, MetronomeConfig};
pub use cues::{format_timestamp, parse_timestamp, CueDraft, CueId, CuePoint, CueSheet};
pub use error::{DanceCueError, Result};
pub use metronome::{is_downbeat, BeatEvent, Metronome, TransportState, REST_BEAT};
pub use tempo::{Bpm, BpmRange, TapTempo};
pub use timeline::{
    next_grid_deadline, BeatTimer, Clock, DueTick, ManualClock, SystemClock, TimerToken,
};
