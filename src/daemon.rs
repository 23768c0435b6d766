//! Process-level wiring: builds the engine's collaborators from
//! configuration and runs it until Ctrl-C

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::handler::{LogHandler, WebhookHandler};
use crate::turn::{Capabilities, CommandHandler, TurnController};
use crate::voice::{
    MicrophoneSource, PromptEmitter, SegmentingRecognizer, SpeechToText, SpokenPrompter,
    SttProvider, TextPrompter, TextToSpeech, Transcriber, TtsProvider, WakeWordMatcher,
};
use crate::{Error, Result};

/// Main voice engine daemon
pub struct Daemon {
    controller: TurnController,
}

impl Daemon {
    /// Build every collaborator from `config`
    ///
    /// # Errors
    ///
    /// Returns error if the wake words are invalid or the STT provider has
    /// no API key
    pub fn new(config: Config) -> Result<Self> {
        let matcher = WakeWordMatcher::new(config.wake_words.clone())?;
        let transcriber: Arc<dyn Transcriber> = Arc::new(build_transcriber(&config)?);
        let recognizer = SegmentingRecognizer::new(transcriber, config.engine.endpoint_config());
        let prompter = build_prompter(&config);
        let handler = build_handler(&config, Arc::clone(&prompter))?;

        let caps = Capabilities {
            source: Arc::new(MicrophoneSource::new(
                config.engine.sample_rate,
                config.engine.frame_samples,
            )),
            recognizer: Arc::new(recognizer),
            prompter,
            handler,
        };

        let controller = TurnController::new(config.engine, matcher, caps)?;
        Ok(Self { controller })
    }

    /// Turn controller driving the engine
    #[must_use]
    pub const fn controller(&self) -> &TurnController {
        &self.controller
    }

    /// Run until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    pub async fn run(self) -> Result<()> {
        let cancel = shutdown_on_ctrl_c();
        self.controller.run(&cancel).await
    }
}

/// Token cancelled on the first Ctrl-C
#[must_use]
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            token.cancel();
        }
    });
    cancel
}

/// Batch transcriber for the configured STT provider
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn build_transcriber(config: &Config) -> Result<SpeechToText> {
    let voice = &config.voice;
    let stt = match voice.stt_provider {
        SttProvider::Whisper => SpeechToText::new_whisper(
            config.api_keys.openai.clone().unwrap_or_default(),
            voice.stt_model.clone(),
        )?,
        SttProvider::Deepgram => SpeechToText::new_deepgram(
            config.api_keys.deepgram.clone().unwrap_or_default(),
            voice.stt_model.clone(),
        )?,
    };
    tracing::debug!(provider = ?voice.stt_provider, model = %voice.stt_model, "STT ready");
    Ok(stt.with_language(voice.stt_language.clone()))
}

/// Synthesizer for the configured TTS provider
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn build_tts(config: &Config) -> Result<TextToSpeech> {
    let voice = &config.voice;
    match voice.tts_provider {
        TtsProvider::OpenAi => TextToSpeech::new_openai(
            config.api_keys.openai.clone().unwrap_or_default(),
            voice.tts_voice.clone(),
            voice.tts_speed,
            voice.tts_model.clone(),
        ),
        TtsProvider::ElevenLabs => TextToSpeech::new_elevenlabs(
            config.api_keys.elevenlabs.clone().unwrap_or_default(),
            voice.tts_voice.clone(),
            voice.tts_model.clone(),
        ),
    }
}

/// Spoken prompts when enabled and possible, printed prompts otherwise
#[must_use]
pub fn build_prompter(config: &Config) -> Arc<dyn PromptEmitter> {
    if !config.voice.enabled {
        return Arc::new(TextPrompter);
    }
    match build_tts(config) {
        Ok(tts) => Arc::new(SpokenPrompter::new(tts)),
        Err(e) => {
            tracing::warn!(error = %e, "TTS unavailable, prompts will be printed");
            Arc::new(TextPrompter)
        }
    }
}

fn build_handler(
    config: &Config,
    prompter: Arc<dyn PromptEmitter>,
) -> Result<Arc<dyn CommandHandler>> {
    let Some(url) = &config.handler_url else {
        tracing::info!("no handler URL configured, commands will only be logged");
        return Ok(Arc::new(LogHandler));
    };
    let handler = WebhookHandler::new(url.clone(), config.engine.handler_timeout, prompter)
        .map_err(|e| Error::Config(format!("invalid handler: {e}")))?;
    tracing::info!(url = %url, "commands will be posted to webhook");
    Ok(Arc::new(handler))
}
