//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use pibot_voice::voice::scripted::{RecordingPrompter, ScriptedRecognizer, ScriptedSource};
use pibot_voice::voice::{WakeWordEntry, WakeWordMatcher, default_wake_words};
use pibot_voice::{Capabilities, CommandHandler, EngineConfig, Result, TurnController, VoiceCommand};

/// 100 ms frames: one second is ten frames, silence ends after 10 frames,
/// no-speech after 50, stale results after 20
#[must_use]
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        frame_samples: 1600,
        final_result_timeout: Duration::from_millis(200),
        handler_timeout: Duration::from_secs(1),
        retry_delay: Duration::from_millis(10),
        greeting: None,
        ..EngineConfig::default()
    }
}

/// Command handler that keeps what it receives
#[derive(Default)]
pub struct RecordingHandler {
    commands: Mutex<Vec<VoiceCommand>>,
    stop_after: Option<(usize, CancellationToken)>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    /// Cancel `token` once `count` commands have arrived
    #[must_use]
    pub fn stopping_after(count: usize, token: CancellationToken) -> Self {
        Self {
            stop_after: Some((count, token)),
            ..Self::default()
        }
    }

    /// Take `delay` to handle each command
    #[must_use]
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Commands received so far
    pub fn commands(&self) -> Vec<VoiceCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandHandler for RecordingHandler {
    async fn handle(&self, command: VoiceCommand) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let received = {
            let mut commands = self.commands.lock().unwrap();
            commands.push(command);
            commands.len()
        };
        if let Some((count, token)) = &self.stop_after
            && received >= *count
        {
            token.cancel();
        }
        Ok(())
    }
}

/// A controller wired to scripted collaborators
pub struct Rig {
    pub source: Arc<ScriptedSource>,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub prompter: Arc<RecordingPrompter>,
    pub handler: Arc<RecordingHandler>,
    pub controller: TurnController,
}

impl Rig {
    /// Default wake words and a recording handler
    pub fn new(config: EngineConfig, recognizer: ScriptedRecognizer) -> Self {
        Self::with_parts(config, default_wake_words(), recognizer, RecordingHandler::default())
    }

    /// Everything explicit
    pub fn with_parts(
        config: EngineConfig,
        words: Vec<WakeWordEntry>,
        recognizer: ScriptedRecognizer,
        handler: RecordingHandler,
    ) -> Self {
        let source = Arc::new(ScriptedSource::new(config.frame_samples));
        let recognizer = Arc::new(recognizer);
        let prompter = Arc::new(RecordingPrompter::new());
        let handler = Arc::new(handler);

        let caps = Capabilities {
            source: source.clone(),
            recognizer: recognizer.clone(),
            prompter: prompter.clone(),
            handler: handler.clone(),
        };
        let matcher = WakeWordMatcher::new(words).unwrap();
        let controller = TurnController::new(config, matcher, caps).unwrap();

        Self {
            source,
            recognizer,
            prompter,
            handler,
            controller,
        }
    }
}
