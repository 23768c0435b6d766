//! Turn-taking state machine
//!
//! ```text
//! WaitingForWake ──wake phrase──▶ Awake ──acknowledged──▶ RecordingCommand
//!       ▲                                                      │
//!       └──────────── handler returned ◀── Processing ◀────────┘
//! ```
//!
//! Every cycle opens the capture device and a recognition session for the
//! wake wait, releases both, then opens them again for the command
//! recording. At most one capture handle and one session are alive at a
//! time. Errors inside a cycle end that cycle only; the next one starts
//! from `WaitingForWake` with fresh state.

mod reader;
mod recorder;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

pub use reader::FrameReader;
pub use recorder::{CommandRecorder, Recording, RecordingEnd};

use crate::config::EngineConfig;
use crate::voice::{
    AudioFrame, AudioSource, CaptureStream, CommandTag, PromptEmitter, RecognitionSession,
    SessionState, SpeechRecognitionService, WakeWordEntry, WakeWordMatcher,
};
use crate::{Error, Result};

/// Buffered transitions per subscriber
const TRANSITION_BUFFER: usize = 64;

/// Externally observable engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// Listening for a wake phrase
    WaitingForWake,
    /// Wake phrase heard, acknowledging
    Awake,
    /// Recording the spoken command
    RecordingCommand,
    /// Command handed to the handler
    Processing,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::WaitingForWake => "waiting_for_wake",
            Self::Awake => "awake",
            Self::RecordingCommand => "recording_command",
            Self::Processing => "processing",
        };
        f.write_str(name)
    }
}

/// One state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTransition {
    pub from: TurnState,
    pub to: TurnState,
}

/// A recognized command, handed off once per cycle
#[derive(Debug, Clone)]
pub struct VoiceCommand {
    /// Command selected by the wake phrase
    pub tag: CommandTag,
    /// Recognized command text; empty for phrases that don't record
    pub text: String,
    /// Raw audio of the command
    pub frames: Vec<AudioFrame>,
    /// Length of the raw audio
    pub duration: Duration,
}

/// Receives recognized commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Act on `command`
    ///
    /// # Errors
    ///
    /// Returns error if handling fails; the engine logs it and moves on
    async fn handle(&self, command: VoiceCommand) -> Result<()>;
}

/// How one cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No wake phrase before the restart budget ran out
    NoWake,
    /// Woken, but nobody spoke a command
    NoSpeech,
    /// Command recorded but nothing usable was recognized
    NotUnderstood,
    /// Command handed to the handler
    Handled(CommandTag),
}

/// Collaborators the controller drives
#[derive(Clone)]
pub struct Capabilities {
    pub source: Arc<dyn AudioSource>,
    pub recognizer: Arc<dyn SpeechRecognitionService>,
    pub prompter: Arc<dyn PromptEmitter>,
    pub handler: Arc<dyn CommandHandler>,
}

/// At-most-once wake activation per cycle
#[derive(Debug, Default)]
pub struct WakeLatch {
    fired: bool,
}

impl WakeLatch {
    /// True on the first call only
    pub const fn fire(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        true
    }

    /// Whether the latch has fired
    #[must_use]
    pub const fn is_fired(&self) -> bool {
        self.fired
    }
}

/// Top-level engine
pub struct TurnController {
    config: EngineConfig,
    matcher: WakeWordMatcher,
    caps: Capabilities,
    state: watch::Sender<TurnState>,
    transitions: broadcast::Sender<TurnTransition>,
}

impl TurnController {
    /// Create a controller in `WaitingForWake`
    ///
    /// # Errors
    ///
    /// Returns `Config` if the engine parameters are invalid
    pub fn new(config: EngineConfig, matcher: WakeWordMatcher, caps: Capabilities) -> Result<Self> {
        config.validate()?;
        if caps.source.frame_samples() != config.frame_samples {
            tracing::warn!(
                source = caps.source.frame_samples(),
                configured = config.frame_samples,
                "audio source frame size differs from configuration"
            );
        }

        let (state, _) = watch::channel(TurnState::WaitingForWake);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);

        Ok(Self {
            config,
            matcher,
            caps,
            state,
            transitions,
        })
    }

    /// Engine parameters
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// Watch the current state
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    /// Receive every transition from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnTransition> {
        self.transitions.subscribe()
    }

    fn set_state(&self, to: TurnState) {
        let from = self.state.send_replace(to);
        if from == to {
            return;
        }
        tracing::info!(%from, %to, "turn state changed");
        // No subscribers is fine
        self.transitions.send(TurnTransition { from, to }).ok();
    }

    /// Say `text`, logging failures
    async fn say(&self, text: &str) {
        if let Err(e) = self.caps.prompter.speak(text).await {
            tracing::warn!(error = %e, "failed to speak prompt");
        }
    }

    /// Listen until a wake phrase is heard
    ///
    /// Returns `None` when the recognizer completed more than `max_restarts`
    /// times without a match.
    ///
    /// # Errors
    ///
    /// Returns device errors from opening the microphone, session errors,
    /// or `Cancelled`
    pub async fn wait_for_wake(&self, cancel: &CancellationToken) -> Result<Option<WakeWordEntry>> {
        self.set_state(TurnState::WaitingForWake);

        let mut stream = self.caps.source.open().await?;
        let result = self.listen_for_wake(stream.as_mut(), cancel).await;
        stream.close().await;

        if let Ok(Some(entry)) = &result {
            tracing::info!(phrase = %entry.phrase, tag = %entry.tag, "wake phrase detected");
        }
        result
    }

    async fn listen_for_wake(
        &self,
        stream: &mut dyn CaptureStream,
        cancel: &CancellationToken,
    ) -> Result<Option<WakeWordEntry>> {
        let service = self.caps.recognizer.as_ref();
        let recognition = self.config.wake_recognition();
        let mut reader = FrameReader::new(self.config.read_timeout, self.config.max_read_errors);
        let mut latch = WakeLatch::default();
        let mut restarts = 0_usize;

        let mut session = RecognitionSession::start(service, &recognition).await?;
        tracing::debug!(session = %session.id(), "listening for wake phrase");

        loop {
            // Timed-out reads still look at the session, which may have
            // moved on without new audio
            if let Some(frame) = reader.next(stream, cancel).await? {
                session.send_frame(&frame).await;
            }

            // State first: every result that led to it is already queued
            let snapshot = session.snapshot();
            for result in session.drain_results() {
                if let Some(entry) = self.matcher.find(&result.text)
                    && latch.fire()
                {
                    session.shutdown();
                    return Ok(Some(entry.clone()));
                }
            }

            match snapshot.state {
                SessionState::Completed => {
                    restarts += 1;
                    if restarts > self.config.max_restarts {
                        let exhausted = Error::ListeningExhausted { restarts };
                        tracing::warn!(error = %exhausted, "giving up on wake wait");
                        return Ok(None);
                    }
                    tracing::debug!(
                        restarts,
                        text = %snapshot.result.text,
                        "session completed without wake phrase, restarting"
                    );
                    session.shutdown();
                    session = RecognitionSession::start(service, &recognition).await?;
                }
                SessionState::Failed => {
                    return Err(Error::Recognition(
                        snapshot.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                _ => {}
            }
        }
    }

    /// Record one command from a freshly opened capture handle
    ///
    /// Leaves the controller in `Processing` once a recording completes,
    /// whatever its outcome, or back in `WaitingForWake` on error.
    ///
    /// # Errors
    ///
    /// Returns device errors, session errors, or `Cancelled`
    pub async fn record_command(&self, cancel: &CancellationToken) -> Result<Recording> {
        self.set_state(TurnState::RecordingCommand);

        let mut stream = match self.caps.source.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(TurnState::WaitingForWake);
                return Err(e);
            }
        };
        let result = CommandRecorder::new(&self.config)
            .record(stream.as_mut(), self.caps.recognizer.as_ref(), cancel)
            .await;
        stream.close().await;

        self.set_state(if result.is_ok() {
            TurnState::Processing
        } else {
            TurnState::WaitingForWake
        });
        result
    }

    /// Run one wake, record, hand-off cycle
    ///
    /// The controller is back in `WaitingForWake` when this returns, even
    /// on error.
    ///
    /// # Errors
    ///
    /// Returns whatever ended the cycle early; the controller stays usable
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        let outcome = self.cycle(cancel).await;
        self.set_state(TurnState::WaitingForWake);
        outcome
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome> {
        let Some(entry) = self.wait_for_wake(cancel).await? else {
            return Ok(CycleOutcome::NoWake);
        };

        self.set_state(TurnState::Awake);
        if let Some(ack) = &entry.acknowledgement {
            self.say(ack).await;
        }

        if !entry.capture_command {
            self.set_state(TurnState::Processing);
            self.dispatch(VoiceCommand {
                tag: entry.tag,
                text: String::new(),
                frames: Vec::new(),
                duration: Duration::ZERO,
            })
            .await;
            return Ok(CycleOutcome::Handled(entry.tag));
        }

        let recording = self.record_command(cancel).await?;

        if recording.end == RecordingEnd::NoSpeech {
            tracing::info!(tag = %entry.tag, "no command spoken");
            return Ok(CycleOutcome::NoSpeech);
        }
        if !recording.is_understood() {
            tracing::info!(
                tag = %entry.tag,
                frames = recording.frames.len(),
                "command not understood"
            );
            self.say(&self.config.not_understood_prompt).await;
            return Ok(CycleOutcome::NotUnderstood);
        }

        tracing::info!(tag = %entry.tag, text = %recording.text, "command recognized");
        let duration = recording.duration(self.config.sample_rate);
        self.dispatch(VoiceCommand {
            tag: entry.tag,
            text: recording.text,
            frames: recording.frames,
            duration,
        })
        .await;

        Ok(CycleOutcome::Handled(entry.tag))
    }

    /// Hand `command` to the handler, bounded by the handler timeout
    async fn dispatch(&self, command: VoiceCommand) {
        let tag = command.tag;
        match tokio::time::timeout(self.config.handler_timeout, self.caps.handler.handle(command))
            .await
        {
            Ok(Ok(())) => tracing::debug!(%tag, "command handled"),
            Ok(Err(e)) => tracing::warn!(%tag, error = %e, "command handler failed"),
            Err(_) => tracing::warn!(
                %tag,
                timeout = ?self.config.handler_timeout,
                "command handler timed out"
            ),
        }
    }

    /// Run cycles until cancelled
    ///
    /// # Errors
    ///
    /// Returns device errors that prevent opening the microphone; every
    /// other error ends only the cycle it happened in
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        if let Some(greeting) = &self.config.greeting {
            self.say(greeting).await;
        }

        tracing::info!(
            wake_words = self.matcher.entries().len(),
            "voice engine running"
        );

        while !cancel.is_cancelled() {
            match self.run_cycle(cancel).await {
                Ok(outcome) => tracing::debug!(?outcome, "cycle complete"),
                Err(Error::Cancelled) => break,
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "audio device lost, stopping engine");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cycle failed, starting over");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                }
            }
        }

        tracing::info!("voice engine stopped");
        Ok(())
    }
}
