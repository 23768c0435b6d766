//! Voice processing module
//!
//! Leaf components of the engine: audio capture, endpointing, recognition
//! sessions, wake phrase matching and prompt output. The turn-taking state
//! machine that ties them together lives in [`crate::turn`].

mod capture;
mod endpoint;
mod frame;
mod playback;
mod prompt;
pub mod scripted;
mod segmenting;
mod session;
mod stt;
mod tts;
mod wake_word;

/// Sample rate of every frame the engine handles
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per frame unless configured otherwise
pub const DEFAULT_FRAME_SAMPLES: usize = 1024;

pub use capture::{AudioSource, CaptureStream, DeviceClaim, DeviceLock, MicrophoneSource};
pub use endpoint::{
    Activity, AmplitudeEndpointer, DEFAULT_SILENCE_THRESHOLD, DEFAULT_SPEAKING_THRESHOLD,
    EndpointConfig, EndpointEvent, VoiceActivityState,
};
pub use frame::{AudioFrame, frame_duration, frames_for, frames_to_wav, wav_to_frames};
pub use playback::AudioPlayback;
pub use prompt::{PromptEmitter, SpokenPrompter, TextPrompter};
pub use segmenting::SegmentingRecognizer;
pub use session::{
    RecognitionConfig, RecognitionResult, RecognitionSession, SessionEvents, SessionSnapshot,
    SessionState, SessionTransport, SpeechRecognitionService, recognize_frames,
};
pub use stt::{SpeechToText, SttProvider, Transcriber};
pub use tts::{TextToSpeech, TtsProvider};
pub use wake_word::{CommandTag, WakeWordEntry, WakeWordMatcher, default_wake_words};
