//! Configuration management for the PiBot voice engine

mod engine;
pub mod file;

use std::time::Duration;

pub use engine::{DEFAULT_GREETING, DEFAULT_NOT_UNDERSTOOD, EngineConfig};

use crate::voice::{SttProvider, TtsProvider, WakeWordEntry, default_wake_words};
use crate::{Error, Result};

/// Default `ElevenLabs` voice ("Rachel")
const ELEVENLABS_DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

/// PiBot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Engine parameters
    pub engine: EngineConfig,

    /// Wake phrases in registration order
    pub wake_words: Vec<WakeWordEntry>,

    /// Speech service configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Webhook receiving recognized commands
    pub handler_url: Option<String>,
}

/// Speech service configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Speak prompts aloud
    pub enabled: bool,

    /// STT backend
    pub stt_provider: SttProvider,

    /// STT model
    pub stt_model: String,

    /// Spoken language hint
    pub stt_language: Option<String>,

    /// TTS backend
    pub tts_provider: TtsProvider,

    /// TTS model
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

impl Config {
    /// Load configuration
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        // Load optional TOML config file (env > toml > default)
        let fc = file::load_config_file();
        let config = Self::from_sources(fc, |key| std::env::var(key).ok(), disable_voice)?;

        if disable_voice {
            tracing::info!("voice output explicitly disabled via --no-voice");
        }

        Ok(config)
    }

    /// Layer `env` over the file over defaults
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is unknown or the engine
    /// parameters are inconsistent
    pub fn from_sources(
        fc: file::PibotConfigFile,
        env: impl Fn(&str) -> Option<String>,
        disable_voice: bool,
    ) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // Load API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let stt_provider: SttProvider = env("PIBOT_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .map_or(Ok(SttProvider::Whisper), |p| p.parse())?;
        let tts_provider: TtsProvider = env("PIBOT_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .map_or(Ok(TtsProvider::OpenAi), |p| p.parse())?;

        let voice = VoiceConfig {
            enabled: !disable_voice && fc.voice.enabled.unwrap_or(true),
            stt_provider,
            stt_model: env("PIBOT_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| default_stt_model(stt_provider).to_string()),
            stt_language: env("PIBOT_STT_LANGUAGE")
                .or(fc.voice.stt_language)
                .or_else(|| Some("zh".to_string())),
            tts_provider,
            tts_model: env("PIBOT_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| default_tts_model(tts_provider).to_string()),
            tts_voice: env("PIBOT_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| default_tts_voice(tts_provider).to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0).clamp(0.25, 4.0),
        };

        let defaults = EngineConfig::default();
        let audio = fc.audio;
        let engine = EngineConfig {
            frame_samples: audio.frame_samples.unwrap_or(defaults.frame_samples),
            read_timeout: audio
                .read_timeout_ms
                .map_or(defaults.read_timeout, Duration::from_millis),
            speaking_threshold: audio
                .speaking_threshold
                .unwrap_or(defaults.speaking_threshold),
            silence_threshold: audio
                .silence_threshold
                .unwrap_or(defaults.silence_threshold),
            silence_duration: secs(audio.silence_secs)?.unwrap_or(defaults.silence_duration),
            no_speech_timeout: secs(audio.no_speech_secs)?.unwrap_or(defaults.no_speech_timeout),
            stale_result_timeout: secs(audio.stale_result_secs)?
                .unwrap_or(defaults.stale_result_timeout),
            max_recording: secs(audio.max_recording_secs)?.unwrap_or(defaults.max_recording),
            max_restarts: audio.max_restarts.unwrap_or(defaults.max_restarts),
            final_result_timeout: secs(audio.final_result_secs)?
                .unwrap_or(defaults.final_result_timeout),
            handler_timeout: secs(fc.handler.timeout_secs)?.unwrap_or(defaults.handler_timeout),
            max_read_errors: audio.max_read_errors.unwrap_or(defaults.max_read_errors),
            greeting: match fc.voice.greeting {
                Some(g) if g.trim().is_empty() => None,
                Some(g) => Some(g),
                None => defaults.greeting.clone(),
            },
            not_understood_prompt: fc
                .voice
                .not_understood
                .unwrap_or_else(|| defaults.not_understood_prompt.clone()),
            ..defaults
        };
        engine.validate()?;

        let mut wake_words = fc.wake_words.unwrap_or_else(default_wake_words);
        if let Some(phrase) = env("WAKE_WORD") {
            match wake_words.first_mut() {
                Some(first) => first.phrase = phrase,
                None => {
                    return Err(Error::Config(
                        "WAKE_WORD set but no wake words are configured".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            engine,
            wake_words,
            voice,
            api_keys,
            handler_url: env("PIBOT_HANDLER_URL").or(fc.handler.url),
        })
    }
}

/// Seconds from the file as a `Duration`
fn secs(value: Option<f64>) -> Result<Option<Duration>> {
    value
        .map(|s| {
            Duration::try_from_secs_f64(s)
                .map_err(|e| Error::Config(format!("invalid duration {s}: {e}")))
        })
        .transpose()
}

const fn default_stt_model(provider: SttProvider) -> &'static str {
    match provider {
        SttProvider::Whisper => "whisper-1",
        SttProvider::Deepgram => "nova-2",
    }
}

const fn default_tts_model(provider: TtsProvider) -> &'static str {
    match provider {
        TtsProvider::OpenAi => "tts-1",
        TtsProvider::ElevenLabs => "eleven_multilingual_v2",
    }
}

const fn default_tts_voice(provider: TtsProvider) -> &'static str {
    match provider {
        TtsProvider::OpenAi => "alloy",
        TtsProvider::ElevenLabs => ELEVENLABS_DEFAULT_VOICE,
    }
}
