//! Engine parameters passed to the turn controller at construction

use std::time::Duration;

use crate::voice::{
    DEFAULT_FRAME_SAMPLES, DEFAULT_SILENCE_THRESHOLD, DEFAULT_SPEAKING_THRESHOLD, EndpointConfig,
    RecognitionConfig, SAMPLE_RATE, SpeechRecognitionService, frames_for,
};
use crate::{Error, Result};

/// Spoken once at startup
pub const DEFAULT_GREETING: &str = "你好，我是机器人。我已经准备就绪，请给我指令。";

/// Spoken when a command was recorded but nothing usable was recognized
pub const DEFAULT_NOT_UNDERSTOOD: &str = "未能识别您的问题，请重试";

/// Timing, threshold and budget parameters of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Capture sample rate
    pub sample_rate: u32,

    /// Samples per frame
    pub frame_samples: usize,

    /// Longest a single frame read may block
    pub read_timeout: Duration,

    /// Mean absolute level at or above which a frame is speech
    pub speaking_threshold: f32,

    /// Mean absolute level below which a frame is silence
    pub silence_threshold: f32,

    /// Trailing silence that ends an utterance
    pub silence_duration: Duration,

    /// Time without speech before a recording gives up
    pub no_speech_timeout: Duration,

    /// Time the recognized text may stop growing before recording ends
    pub stale_result_timeout: Duration,

    /// Hard cap on a single command recording
    pub max_recording: Duration,

    /// Natural session completions tolerated while waiting for a wake phrase
    pub max_restarts: usize,

    /// How long to wait for a final result after stopping a session
    pub final_result_timeout: Duration,

    /// How long the command handler may run
    pub handler_timeout: Duration,

    /// Consecutive transient read faults tolerated within one cycle
    pub max_read_errors: usize,

    /// Pause before the next cycle after a failed one
    pub retry_delay: Duration,

    /// Convert spoken numbers to digits in command results
    pub inverse_text_normalization: bool,

    /// Ask the recognizer for partial results
    pub intermediate_results: bool,

    /// Ask the recognizer for punctuation
    pub punctuation: bool,

    /// Spoken once when the engine starts
    pub greeting: Option<String>,

    /// Spoken when a command could not be recognized
    pub not_understood_prompt: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            read_timeout: Duration::from_millis(100),
            speaking_threshold: DEFAULT_SPEAKING_THRESHOLD,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            silence_duration: Duration::from_secs(1),
            no_speech_timeout: Duration::from_secs(5),
            stale_result_timeout: Duration::from_secs(2),
            max_recording: Duration::from_secs(15),
            max_restarts: 50,
            final_result_timeout: Duration::from_secs(2),
            handler_timeout: Duration::from_secs(60),
            max_read_errors: 10,
            retry_delay: Duration::from_secs(1),
            inverse_text_normalization: true,
            intermediate_results: true,
            punctuation: true,
            greeting: Some(DEFAULT_GREETING.to_string()),
            not_understood_prompt: DEFAULT_NOT_UNDERSTOOD.to_string(),
        }
    }
}

impl EngineConfig {
    /// Check the parameters are usable
    ///
    /// # Errors
    ///
    /// Returns `Config` if a value is out of range
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".to_string()));
        }
        if self.frame_samples == 0 {
            return Err(Error::Config("frame size must be positive".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be positive".to_string()));
        }
        if self.silence_threshold > self.speaking_threshold {
            return Err(Error::Config(format!(
                "silence threshold {} exceeds speaking threshold {}",
                self.silence_threshold, self.speaking_threshold
            )));
        }
        Ok(())
    }

    /// Endpointer thresholds in frames
    #[must_use]
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig::from_durations(
            self.speaking_threshold,
            self.silence_threshold,
            self.silence_duration,
            self.no_speech_timeout,
            self.sample_rate,
            self.frame_samples,
        )
    }

    /// Frames the result may stay unchanged before a recording ends
    #[must_use]
    pub fn stale_result_frames(&self) -> usize {
        self.frames(self.stale_result_timeout)
    }

    /// Frames in the longest allowed recording
    #[must_use]
    pub fn max_recording_frames(&self) -> usize {
        self.frames(self.max_recording)
    }

    /// Session parameters while listening for a wake phrase
    ///
    /// Wake phrases are matched on the literal transcript, so no
    /// normalization is requested.
    #[must_use]
    pub const fn wake_recognition(&self) -> RecognitionConfig {
        RecognitionConfig {
            sample_rate: self.sample_rate,
            inverse_text_normalization: false,
            intermediate_results: self.intermediate_results,
            punctuation: self.punctuation,
        }
    }

    /// Session parameters while recording a command
    #[must_use]
    pub const fn command_recognition(&self) -> RecognitionConfig {
        RecognitionConfig {
            sample_rate: self.sample_rate,
            inverse_text_normalization: self.inverse_text_normalization,
            intermediate_results: self.intermediate_results,
            punctuation: self.punctuation,
        }
    }

    /// How long to wait for a final result from `service` after stopping it
    ///
    /// The longer of the configured wait and the recognizer's own
    /// finalization budget.
    #[must_use]
    pub fn final_wait(&self, service: &dyn SpeechRecognitionService) -> Duration {
        service
            .final_result_timeout()
            .map_or(self.final_result_timeout, |own| own.max(self.final_result_timeout))
    }

    fn frames(&self, duration: Duration) -> usize {
        frames_for(duration, self.sample_rate, self.frame_samples).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_in_frames() {
        let config = EngineConfig::default();
        config.validate().unwrap();

        let endpoint = config.endpoint_config();
        assert_eq!(endpoint.silence_frames, 16);
        assert_eq!(endpoint.no_speech_frames, 79);
        assert_eq!(config.stale_result_frames(), 32);
        assert_eq!(config.max_recording_frames(), 235);
        assert_eq!(config.max_restarts, 50);
        assert_eq!(config.final_result_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_wake_sessions_skip_normalization() {
        let config = EngineConfig::default();
        assert!(!config.wake_recognition().inverse_text_normalization);
        assert!(config.command_recognition().inverse_text_normalization);
    }

    #[test]
    fn test_final_wait_defers_to_slower_recognizers() {
        use crate::voice::scripted::ScriptedRecognizer;

        let config = EngineConfig::default();
        assert_eq!(config.final_wait(&ScriptedRecognizer::new()), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let config = EngineConfig {
            speaking_threshold: 200.0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
