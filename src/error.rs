//! Error types for the PiBot voice engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone could not be claimed or configured
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Another capture handle is already open
    #[error("audio device busy: another capture stream is open")]
    DeviceBusy,

    /// Transient fault while reading a frame
    #[error("audio read error: {0}")]
    DeviceRead(String),

    /// Recognition session could not be opened
    #[error("recognition session failed to start: {0}")]
    SessionStart(String),

    /// A frame could not be delivered to the recognizer
    #[error("recognition send error: {0}")]
    SessionSend(String),

    /// Session did not finalize within the allowed wait
    #[error("recognition session did not finalize within {0:?}")]
    SessionTimeout(Duration),

    /// Recognizer reported an error through its callback channel
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Session restart budget exhausted while waiting for a wake phrase
    #[error("listening exhausted after {restarts} session restarts")]
    ListeningExhausted {
        /// Number of restarts performed before giving up
        restarts: usize,
    },

    /// No speech was detected before the timeout
    #[error("no speech detected")]
    NoSpeechTimeout,

    /// Recognition finished without usable text
    #[error("recognition produced no text")]
    RecognitionEmpty,

    /// The caller cancelled the operation
    #[error("cancelled")]
    Cancelled,

    /// Playback or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Command handler error
    #[error("handler error: {0}")]
    Handler(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding or decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Whether the error must be surfaced to the caller instead of retried
    ///
    /// Only failures to claim the microphone qualify; every other error ends
    /// the current cycle and the engine goes back to waiting for a wake phrase.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_) | Self::DeviceBusy)
    }
}
