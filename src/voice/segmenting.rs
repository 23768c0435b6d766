//! Recognition over a batch transcriber
//!
//! Speech endpoints are found locally with an [`AmplitudeEndpointer`]; once
//! an utterance ends (or the session is stopped) the buffered speech is
//! packed into a WAV clip and handed to a [`Transcriber`] on a background
//! task, which reports through the session's [`SessionEvents`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::endpoint::{AmplitudeEndpointer, EndpointConfig, EndpointEvent};
use super::frame::{AudioFrame, frames_to_wav};
use super::session::{RecognitionConfig, SessionEvents, SessionTransport, SpeechRecognitionService};
use super::stt::Transcriber;
use crate::Result;

/// Default time allowed for one transcription request
pub const DEFAULT_TRANSCRIPTION_TIMEOUT: Duration = Duration::from_secs(30);

/// [`SpeechRecognitionService`] backed by a [`Transcriber`]
pub struct SegmentingRecognizer {
    transcriber: Arc<dyn Transcriber>,
    endpoint: EndpointConfig,
    transcription_timeout: Duration,
}

impl SegmentingRecognizer {
    /// Create a recognizer that segments with `endpoint`
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, endpoint: EndpointConfig) -> Self {
        Self {
            transcriber,
            endpoint,
            transcription_timeout: DEFAULT_TRANSCRIPTION_TIMEOUT,
        }
    }

    /// Allow `timeout` for the transcription that follows an utterance
    #[must_use]
    pub const fn with_transcription_timeout(mut self, timeout: Duration) -> Self {
        self.transcription_timeout = timeout;
        self
    }
}

#[async_trait]
impl SpeechRecognitionService for SegmentingRecognizer {
    async fn open_session(
        &self,
        config: &RecognitionConfig,
        events: SessionEvents,
    ) -> Result<Box<dyn SessionTransport>> {
        tracing::debug!(session = %events.session_id(), "segmenting session opened");
        Ok(Box::new(SegmentTransport {
            transcriber: Arc::clone(&self.transcriber),
            endpointer: AmplitudeEndpointer::new(self.endpoint),
            sample_rate: config.sample_rate,
            speech: Vec::new(),
            events,
            finalized: false,
            pending: None,
        }))
    }

    fn final_result_timeout(&self) -> Option<Duration> {
        // The whole utterance is transcribed only after it ends
        Some(self.transcription_timeout)
    }
}

struct SegmentTransport {
    transcriber: Arc<dyn Transcriber>,
    endpointer: AmplitudeEndpointer,
    sample_rate: u32,
    speech: Vec<AudioFrame>,
    events: SessionEvents,
    finalized: bool,
    pending: Option<JoinHandle<()>>,
}

impl SegmentTransport {
    /// Transcribe what was buffered; runs at most once per session
    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let speech = std::mem::take(&mut self.speech);
        if speech.is_empty() {
            self.events.on_final("");
            return Ok(());
        }

        let wav = frames_to_wav(&speech, self.sample_rate)?;
        let transcriber = Arc::clone(&self.transcriber);
        let events = self.events.clone();
        tracing::debug!(frames = speech.len(), "utterance segmented, transcribing");

        self.pending = Some(tokio::spawn(async move {
            match transcriber.transcribe(wav).await {
                Ok(text) => events.on_final(text.trim()),
                Err(e) => events.on_error(e.to_string()),
            }
        }));
        Ok(())
    }
}

#[async_trait]
impl SessionTransport for SegmentTransport {
    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        if self.finalized {
            return Ok(());
        }

        let event = self.endpointer.run(frame);
        if self.endpointer.has_started_speaking() {
            self.speech.push(frame.clone());
        }

        match event {
            EndpointEvent::UtteranceEnded | EndpointEvent::NoSpeechTimeout => self.finalize(),
            EndpointEvent::SpeechStarted | EndpointEvent::Continue => Ok(()),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.finalize()
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
        self.speech.clear();
    }
}
