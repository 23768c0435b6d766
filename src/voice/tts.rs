//! Prompt synthesis through a hosted TTS API
//!
//! The engine only ever says a handful of fixed lines (greeting,
//! acknowledgements, the retry prompt), so synthesized audio is cached by
//! text and each line costs one API call per process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const ELEVENLABS_SPEECH_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Upper bound on one synthesis request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Cached prompts kept at most
const CACHE_CAPACITY: usize = 32;

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    /// `OpenAI` speech endpoint
    OpenAi,
    /// `ElevenLabs` text-to-speech
    ElevenLabs,
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

#[derive(Serialize)]
struct OpenAiSpeech<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
}

#[derive(Serialize)]
struct ElevenLabsSpeech<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Turns prompt text into MP3 audio
pub struct TextToSpeech {
    client: reqwest::Client,
    provider: TtsProvider,
    api_key: String,
    voice: String,
    model: String,
    speed: f32,
    cache: Mutex<HashMap<String, Arc<[u8]>>>,
}

impl TextToSpeech {
    /// `OpenAI` voice such as `alloy` at the given speaking rate
    ///
    /// # Errors
    ///
    /// Returns `Config` if the API key is empty
    pub fn new_openai(api_key: String, voice: String, speed: f32, model: String) -> Result<Self> {
        Self::build(TtsProvider::OpenAi, api_key, voice, model, speed)
    }

    /// `ElevenLabs` voice by id; the speaking rate is fixed by the voice
    ///
    /// # Errors
    ///
    /// Returns `Config` if the API key is empty
    pub fn new_elevenlabs(api_key: String, voice_id: String, model: String) -> Result<Self> {
        Self::build(TtsProvider::ElevenLabs, api_key, voice_id, model, 1.0)
    }

    fn build(
        provider: TtsProvider,
        api_key: String,
        voice: String,
        model: String,
        speed: f32,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config(format!("{provider:?} API key required for TTS")));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            provider,
            api_key,
            voice,
            model,
            speed,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Active provider
    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// MP3 audio for `text`, synthesized on first use
    ///
    /// # Errors
    ///
    /// Returns `Tts` if the provider rejects the request, or `Http` if it
    /// can't be reached
    pub async fn synthesize(&self, text: &str) -> Result<Arc<[u8]>> {
        if let Some(audio) = self.cached(text) {
            tracing::trace!(text, "prompt audio from cache");
            return Ok(audio);
        }

        let request = match self.provider {
            TtsProvider::OpenAi => self
                .client
                .post(OPENAI_SPEECH_URL)
                .bearer_auth(&self.api_key)
                .json(&OpenAiSpeech {
                    model: &self.model,
                    input: text,
                    voice: &self.voice,
                    speed: self.speed,
                }),
            TtsProvider::ElevenLabs => self
                .client
                .post(format!("{ELEVENLABS_SPEECH_URL}/{}", self.voice))
                .header("xi-api-key", &self.api_key)
                .json(&ElevenLabsSpeech {
                    text,
                    model_id: &self.model,
                }),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("{:?} returned {status}: {body}", self.provider)));
        }

        let audio: Arc<[u8]> = Arc::from(response.bytes().await?.as_ref());
        tracing::debug!(text, bytes = audio.len(), "prompt synthesized");
        self.remember(text, Arc::clone(&audio));
        Ok(audio)
    }

    fn cached(&self, text: &str) -> Option<Arc<[u8]>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text)
            .cloned()
    }

    fn remember(&self, text: &str, audio: Arc<[u8]>) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= CACHE_CAPACITY && !cache.contains_key(text) {
            // Prompts are few; anything past capacity is a one-off
            return;
        }
        cache.insert(text.to_string(), audio);
    }
}
