//! TOML configuration file loading
//!
//! Supports `~/.config/pibot/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::voice::WakeWordEntry;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct PibotConfigFile {
    /// Capture and endpointing parameters
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Speech services and prompts
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Where recognized commands go
    #[serde(default)]
    pub handler: HandlerFileConfig,

    /// Wake phrases in registration order; replaces the built-in set
    #[serde(default)]
    pub wake_words: Option<Vec<WakeWordEntry>>,
}

/// Capture and endpointing configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Samples per frame (e.g. 1024)
    pub frame_samples: Option<usize>,

    /// Frame read timeout in milliseconds
    pub read_timeout_ms: Option<u64>,

    /// Speech level threshold (mean absolute sample)
    pub speaking_threshold: Option<f32>,

    /// Silence level threshold (mean absolute sample)
    pub silence_threshold: Option<f32>,

    /// Trailing silence that ends an utterance, in seconds
    pub silence_secs: Option<f64>,

    /// No-speech timeout, in seconds
    pub no_speech_secs: Option<f64>,

    /// Stale result timeout, in seconds
    pub stale_result_secs: Option<f64>,

    /// Maximum command length, in seconds
    pub max_recording_secs: Option<f64>,

    /// Recognition session restarts tolerated per wake wait
    pub max_restarts: Option<usize>,

    /// Final result wait, in seconds
    pub final_result_secs: Option<f64>,

    /// Consecutive read faults tolerated per cycle
    pub max_read_errors: Option<usize>,
}

/// Speech service and prompt configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Speak prompts (false prints them instead)
    pub enabled: Option<bool>,

    /// Greeting spoken at startup; empty disables it
    pub greeting: Option<String>,

    /// Prompt spoken when a command is not understood
    pub not_understood: Option<String>,

    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Spoken language hint (e.g. "zh")
    pub stt_language: Option<String>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Command handler configuration
#[derive(Debug, Default, Deserialize)]
pub struct HandlerFileConfig {
    /// Webhook receiving recognized commands
    pub url: Option<String>,

    /// Handler timeout, in seconds
    pub timeout_secs: Option<f64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `PibotConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> PibotConfigFile {
    config_file_path().map_or_else(PibotConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &Path) -> PibotConfigFile {
    if !path.exists() {
        return PibotConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                PibotConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            PibotConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/pibot/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("pibot").join("config.toml"))
}
