//! Command recording
//!
//! Captures one spoken command: every frame goes through the endpointer
//! and the recognition session, and the loop ends on whichever of these
//! fires first, checked in this order each frame:
//!
//! 1. trailing silence after speech
//! 2. the recognizer delivered a final result
//! 3. the transcript stopped growing (speech started, text exists)
//! 4. no speech at all within the no-speech window
//! 5. the maximum recording length
//!
//! Only frames from the first speech frame onward are kept.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::reader::FrameReader;
use crate::config::EngineConfig;
use crate::voice::{
    AmplitudeEndpointer, AudioFrame, CaptureStream, EndpointEvent, RecognitionSession,
    SessionState, SpeechRecognitionService, frame_duration,
};
use crate::{Error, Result};

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingEnd {
    /// Enough trailing silence after speech
    TrailingSilence,
    /// Recognizer finalized on its own
    FinalResult,
    /// Transcript stopped growing
    StaleResult,
    /// No speech within the no-speech window
    NoSpeech,
    /// Hit the maximum recording length
    MaxDuration,
}

/// Result of one command recording
#[derive(Debug, Clone)]
pub struct Recording {
    /// Recognized text; may be empty
    pub text: String,
    /// Frames from the first speech frame to the end
    pub frames: Vec<AudioFrame>,
    /// Termination condition
    pub end: RecordingEnd,
}

impl Recording {
    /// Whether the recognizer produced usable text
    #[must_use]
    pub fn is_understood(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// This recording, or `NoSpeechTimeout` if nobody spoke
    ///
    /// # Errors
    ///
    /// Returns `NoSpeechTimeout` for recordings that ended without speech
    pub fn require_speech(self) -> Result<Self> {
        if self.end == RecordingEnd::NoSpeech {
            return Err(Error::NoSpeechTimeout);
        }
        Ok(self)
    }

    /// Length of the kept audio
    #[must_use]
    pub fn duration(&self, sample_rate: u32) -> Duration {
        frame_duration(
            self.frames.iter().map(AudioFrame::sample_count).sum(),
            sample_rate,
        )
    }
}

/// Records one command from an open capture stream
pub struct CommandRecorder<'a> {
    config: &'a EngineConfig,
}

impl<'a> CommandRecorder<'a> {
    /// Recorder using the thresholds in `config`
    #[must_use]
    pub const fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Record until one of the termination conditions fires
    ///
    /// A no-speech ending returns empty text and no frames regardless of
    /// what the recognizer said. If the final result doesn't arrive in time
    /// the latest partial text is used.
    ///
    /// # Errors
    ///
    /// Returns `SessionStart` if no session could be opened, `Recognition`
    /// if the recognizer failed, `Cancelled` on cancellation, or a device
    /// error from the stream
    pub async fn record(
        &self,
        stream: &mut dyn CaptureStream,
        service: &dyn SpeechRecognitionService,
        cancel: &CancellationToken,
    ) -> Result<Recording> {
        let config = self.config;
        let stale_frames = config.stale_result_frames();
        let max_frames = config.max_recording_frames();

        let mut endpointer = AmplitudeEndpointer::new(config.endpoint_config());
        let mut reader = FrameReader::new(config.read_timeout, config.max_read_errors);
        let mut session = RecognitionSession::start(service, &config.command_recognition()).await?;

        let mut frames = Vec::new();
        let mut seen = 0_usize;
        let mut last_result_len = 0_usize;
        let mut stale_run = 0_usize;

        let end = loop {
            // A read that timed out or hit a tolerated fault still uses up a
            // frame's worth of budget and counts as silence
            let frame = reader.next(stream, cancel).await?;
            seen += 1;

            let event = match &frame {
                Some(frame) => {
                    let event = endpointer.run(frame);
                    session.send_frame(frame).await;
                    event
                }
                None => endpointer.update_level(0.0),
            };
            if let Some(frame) = frame
                && endpointer.has_started_speaking()
            {
                frames.push(frame);
            }

            let snapshot = session.snapshot();
            session.drain_results();
            let result_len = snapshot.result.text.chars().count();
            if result_len > last_result_len {
                last_result_len = result_len;
                stale_run = 0;
            } else {
                stale_run += 1;
            }

            if snapshot.state == SessionState::Failed {
                return Err(Error::Recognition(
                    snapshot.error.unwrap_or_else(|| "unknown error".to_string()),
                ));
            }

            if event == EndpointEvent::UtteranceEnded {
                break RecordingEnd::TrailingSilence;
            }
            if snapshot.state == SessionState::Completed {
                break RecordingEnd::FinalResult;
            }
            if endpointer.has_started_speaking() && result_len > 0 && stale_run >= stale_frames {
                break RecordingEnd::StaleResult;
            }
            if event == EndpointEvent::NoSpeechTimeout {
                break RecordingEnd::NoSpeech;
            }
            if seen >= max_frames {
                break RecordingEnd::MaxDuration;
            }
        };

        tracing::debug!(?end, frames = frames.len(), seen, "recording ended");

        if end == RecordingEnd::NoSpeech {
            session.shutdown();
            return Ok(Recording {
                text: String::new(),
                frames: Vec::new(),
                end,
            });
        }

        let text = match session.finish(config.final_wait(service)).await {
            Ok(result) => result.text,
            Err(Error::SessionTimeout(waited)) => {
                let latest = session.snapshot().result.text;
                tracing::warn!(?waited, "no final result, using latest partial text");
                latest
            }
            Err(e) => return Err(e),
        };
        session.shutdown();

        Ok(Recording {
            text: text.trim().to_string(),
            frames,
            end,
        })
    }
}
