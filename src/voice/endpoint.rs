//! Amplitude-based endpointing
//!
//! Classifies each frame by its rectified average level and carries two run
//! counters: trailing silence after speech, and frames without any speech.
//! Speech is inclusive at the threshold, silence is strictly below its own
//! threshold, and the band in between decays the silence run instead of
//! resetting it so short blips inside a pause don't restart the wait.

use std::time::Duration;

use super::frame::{AudioFrame, frames_for};

/// Level at or above which a frame counts as speech
pub const DEFAULT_SPEAKING_THRESHOLD: f32 = 800.0;

/// Level below which a frame counts as silence
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 300.0;

/// Endpointer thresholds, already converted to frame counts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointConfig {
    /// Speech threshold (inclusive)
    pub speaking_threshold: f32,
    /// Silence threshold (exclusive)
    pub silence_threshold: f32,
    /// Consecutive silent frames after speech that end an utterance
    pub silence_frames: usize,
    /// Frames without any speech before giving up
    pub no_speech_frames: usize,
}

impl EndpointConfig {
    /// Derive frame counts from durations
    #[must_use]
    pub fn from_durations(
        speaking_threshold: f32,
        silence_threshold: f32,
        silence: Duration,
        no_speech: Duration,
        sample_rate: u32,
        frame_samples: usize,
    ) -> Self {
        Self {
            speaking_threshold,
            silence_threshold,
            silence_frames: frames_for(silence, sample_rate, frame_samples).max(1),
            no_speech_frames: frames_for(no_speech, sample_rate, frame_samples).max(1),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::from_durations(
            DEFAULT_SPEAKING_THRESHOLD,
            DEFAULT_SILENCE_THRESHOLD,
            Duration::from_secs(1),
            Duration::from_secs(5),
            super::SAMPLE_RATE,
            super::DEFAULT_FRAME_SAMPLES,
        )
    }
}

/// Coarse voice-activity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceActivityState {
    /// No speech yet in this cycle
    Idle,
    /// Speech in progress
    Speaking,
    /// Speech happened, currently in a pause
    TrailingSilence,
}

/// Signed per-frame activity signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Level at or above the speaking threshold
    Speech,
    /// Between the two thresholds
    Ambiguous,
    /// Below the silence threshold
    Silence,
}

impl Activity {
    /// +1 for speech, 0 for ambiguous, -1 for silence
    #[must_use]
    pub const fn signal(self) -> i8 {
        match self {
            Self::Speech => 1,
            Self::Ambiguous => 0,
            Self::Silence => -1,
        }
    }
}

/// What a frame meant for the current utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Nothing decisive
    Continue,
    /// First speech frame of the cycle
    SpeechStarted,
    /// Trailing silence reached the configured length
    UtteranceEnded,
    /// No speech within the configured window
    NoSpeechTimeout,
}

/// Hysteretic amplitude endpointer
#[derive(Debug, Clone)]
pub struct AmplitudeEndpointer {
    config: EndpointConfig,
    state: VoiceActivityState,
    has_started_speaking: bool,
    silence_run_length: usize,
    no_speech_run_length: usize,
}

impl AmplitudeEndpointer {
    /// Create an endpointer in the `Idle` state
    #[must_use]
    pub const fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            state: VoiceActivityState::Idle,
            has_started_speaking: false,
            silence_run_length: 0,
            no_speech_run_length: 0,
        }
    }

    /// Classify a level against the thresholds
    #[must_use]
    pub fn classify(&self, level: f32) -> Activity {
        if level >= self.config.speaking_threshold {
            Activity::Speech
        } else if level < self.config.silence_threshold {
            Activity::Silence
        } else {
            Activity::Ambiguous
        }
    }

    /// Feed one frame
    pub fn run(&mut self, frame: &AudioFrame) -> EndpointEvent {
        self.update_level(frame.level())
    }

    /// Feed one precomputed frame level
    pub fn update_level(&mut self, level: f32) -> EndpointEvent {
        let activity = self.classify(level);

        if activity == Activity::Speech {
            let first = !self.has_started_speaking;
            self.has_started_speaking = true;
            self.silence_run_length = 0;
            self.no_speech_run_length = 0;
            self.state = VoiceActivityState::Speaking;
            if first {
                tracing::trace!(level, "speech started");
                return EndpointEvent::SpeechStarted;
            }
            return EndpointEvent::Continue;
        }

        if self.has_started_speaking {
            if activity == Activity::Silence {
                self.silence_run_length += 1;
            } else {
                self.silence_run_length = self.silence_run_length.saturating_sub(1);
            }

            self.state = if self.silence_run_length == 0 {
                VoiceActivityState::Speaking
            } else {
                VoiceActivityState::TrailingSilence
            };

            if self.utterance_ended() {
                return EndpointEvent::UtteranceEnded;
            }
            return EndpointEvent::Continue;
        }

        self.no_speech_run_length += 1;
        if self.no_speech_timed_out() {
            return EndpointEvent::NoSpeechTimeout;
        }
        EndpointEvent::Continue
    }

    /// Whether the trailing silence has reached the configured length
    #[must_use]
    pub const fn utterance_ended(&self) -> bool {
        self.has_started_speaking && self.silence_run_length >= self.config.silence_frames
    }

    /// Whether the no-speech window has elapsed
    #[must_use]
    pub const fn no_speech_timed_out(&self) -> bool {
        !self.has_started_speaking && self.no_speech_run_length >= self.config.no_speech_frames
    }

    /// Return to `Idle` with cleared counters
    pub const fn reset(&mut self) {
        self.state = VoiceActivityState::Idle;
        self.has_started_speaking = false;
        self.silence_run_length = 0;
        self.no_speech_run_length = 0;
    }

    /// Current activity state
    #[must_use]
    pub const fn state(&self) -> VoiceActivityState {
        self.state
    }

    /// Whether any speech frame was seen since the last reset
    #[must_use]
    pub const fn has_started_speaking(&self) -> bool {
        self.has_started_speaking
    }

    /// Consecutive (decayed) silent frames since speech
    #[must_use]
    pub const fn silence_run_length(&self) -> usize {
        self.silence_run_length
    }

    /// Frames seen without any speech
    #[must_use]
    pub const fn no_speech_run_length(&self) -> usize {
        self.no_speech_run_length
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &EndpointConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(silence_frames: usize, no_speech_frames: usize) -> EndpointConfig {
        EndpointConfig {
            speaking_threshold: 800.0,
            silence_threshold: 300.0,
            silence_frames,
            no_speech_frames,
        }
    }

    #[test]
    fn test_threshold_is_inclusive_for_speech() {
        let endpointer = AmplitudeEndpointer::new(config(10, 10));
        assert_eq!(endpointer.classify(800.0), Activity::Speech);
        assert_eq!(endpointer.classify(799.9), Activity::Ambiguous);
        assert_eq!(endpointer.classify(300.0), Activity::Ambiguous);
        assert_eq!(endpointer.classify(299.9), Activity::Silence);
        assert_eq!(Activity::Speech.signal(), 1);
        assert_eq!(Activity::Silence.signal(), -1);
    }

    #[test]
    fn test_utterance_ends_after_silence_run() {
        let mut endpointer = AmplitudeEndpointer::new(config(3, 100));

        assert_eq!(endpointer.update_level(1000.0), EndpointEvent::SpeechStarted);
        assert_eq!(endpointer.update_level(1000.0), EndpointEvent::Continue);
        assert_eq!(endpointer.state(), VoiceActivityState::Speaking);

        assert_eq!(endpointer.update_level(100.0), EndpointEvent::Continue);
        assert_eq!(endpointer.state(), VoiceActivityState::TrailingSilence);
        assert_eq!(endpointer.update_level(100.0), EndpointEvent::Continue);
        assert_eq!(endpointer.update_level(100.0), EndpointEvent::UtteranceEnded);
        assert_eq!(endpointer.silence_run_length(), 3);
    }

    #[test]
    fn test_blip_decays_silence_run() {
        let mut endpointer = AmplitudeEndpointer::new(config(3, 100));
        endpointer.update_level(1000.0);
        endpointer.update_level(100.0);
        endpointer.update_level(100.0);
        assert_eq!(endpointer.silence_run_length(), 2);

        // Between thresholds: decay by one instead of resetting
        endpointer.update_level(500.0);
        assert_eq!(endpointer.silence_run_length(), 1);
        assert_eq!(endpointer.state(), VoiceActivityState::TrailingSilence);

        endpointer.update_level(500.0);
        endpointer.update_level(500.0);
        assert_eq!(endpointer.silence_run_length(), 0);
        assert_eq!(endpointer.state(), VoiceActivityState::Speaking);

        // Loud frame resets outright
        endpointer.update_level(100.0);
        endpointer.update_level(100.0);
        endpointer.update_level(900.0);
        assert_eq!(endpointer.silence_run_length(), 0);
    }

    #[test]
    fn test_no_speech_timeout() {
        let mut endpointer = AmplitudeEndpointer::new(config(3, 4));
        for _ in 0..3 {
            assert_eq!(endpointer.update_level(500.0), EndpointEvent::Continue);
        }
        assert_eq!(endpointer.update_level(100.0), EndpointEvent::NoSpeechTimeout);
        assert_eq!(endpointer.state(), VoiceActivityState::Idle);
        assert!(!endpointer.has_started_speaking());
    }

    #[test]
    fn test_speech_clears_no_speech_counter() {
        let mut endpointer = AmplitudeEndpointer::new(config(3, 4));
        endpointer.update_level(100.0);
        endpointer.update_level(100.0);
        endpointer.update_level(1000.0);
        assert_eq!(endpointer.no_speech_run_length(), 0);

        // Once speaking has started, quiet frames never time out
        for _ in 0..2 {
            endpointer.update_level(500.0);
        }
        assert!(!endpointer.no_speech_timed_out());
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut endpointer = AmplitudeEndpointer::new(config(2, 4));
        endpointer.update_level(1000.0);
        endpointer.update_level(100.0);
        endpointer.update_level(100.0);
        assert!(endpointer.utterance_ended());

        endpointer.reset();
        assert_eq!(endpointer.state(), VoiceActivityState::Idle);
        assert!(!endpointer.utterance_ended());
        assert_eq!(endpointer.update_level(1000.0), EndpointEvent::SpeechStarted);
    }

    #[test]
    fn test_default_config_matches_calibration() {
        let config = EndpointConfig::default();
        assert!((config.speaking_threshold - 800.0).abs() < f32::EPSILON);
        assert!((config.silence_threshold - 300.0).abs() < f32::EPSILON);
        assert_eq!(config.silence_frames, 16);
        assert_eq!(config.no_speech_frames, 79);
    }
}
