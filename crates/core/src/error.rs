/// Result alias that carries the custom [`DanceCueError`] type.
pub type Result<T> = std::result::Result<T, DanceCueError>;

/// Common error type for the core crate.
///
/// Nothing in the engine is fatal. Every variant describes a call that was
/// refused or a resource that could not be obtained while the beat clock
/// keeps working.
#[derive(Debug, thiserror::Error)]
pub enum DanceCueError {
    /// A BPM value that is not finite or not strictly positive.
    #[error("invalid bpm value {0}")]
    InvalidBpm(f64),
    /// A relative adjustment was requested before any BPM was set.
    #[error("no bpm has been configured")]
    BpmUnset,
    /// The platform refused to provide an audio output.
    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unknown cue point #{0}")]
    UnknownCue(u64),
    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl DanceCueError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}
