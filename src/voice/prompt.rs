//! Prompt output: acknowledgements, greetings, retry prompts

use async_trait::async_trait;

use super::playback::AudioPlayback;
use super::tts::TextToSpeech;
use crate::{Error, Result};

/// Something that can say a line to the user
#[async_trait]
pub trait PromptEmitter: Send + Sync {
    /// Say `text`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails; callers log and move on
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Synthesizes prompts and plays them on the default output device
pub struct SpokenPrompter {
    tts: TextToSpeech,
}

impl SpokenPrompter {
    /// Create a prompter over `tts`
    #[must_use]
    pub const fn new(tts: TextToSpeech) -> Self {
        Self { tts }
    }
}

#[async_trait]
impl PromptEmitter for SpokenPrompter {
    async fn speak(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        tracing::debug!(text, "speaking prompt");
        let mp3 = self.tts.synthesize(text).await?;

        tokio::task::spawn_blocking(move || AudioPlayback::play_mp3(&mp3))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Prints prompts instead of speaking them
#[derive(Debug, Default, Clone, Copy)]
pub struct TextPrompter;

#[async_trait]
impl PromptEmitter for TextPrompter {
    async fn speak(&self, text: &str) -> Result<()> {
        if !text.trim().is_empty() {
            tracing::info!(prompt = text, "prompt");
            println!("🤖 {text}");
        }
        Ok(())
    }
}
