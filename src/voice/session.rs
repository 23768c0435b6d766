//! Streaming recognition sessions
//!
//! A session wraps one exchange with a recognizer. The recognizer reports
//! results through [`SessionEvents`] from whatever context it runs in. Two
//! things come out of the events: a watch cell holding the latest snapshot
//! (lifecycle state plus newest text) and a bounded queue carrying every
//! accepted result in order, so the polling loop can inspect results that
//! were superseded before it got to look.
//!
//! ```text
//! Unstarted ──start──▶ Active ──stop──▶ AwaitingFinal
//!                        │  ▲ on_partial      │
//!                        │  └──────────       │
//!                        ├── on_final ──▶ Completed ◀── on_final ─┤
//!                        └── on_error ──▶ Failed    ◀── on_error ─┘
//!                     any state ──shutdown──▶ Closed
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::frame::AudioFrame;
use crate::{Error, Result};

/// Results buffered between two polls
const RESULT_QUEUE: usize = 64;

/// Parameters sent to the recognizer when a session opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionConfig {
    /// Sample rate of the frames that will be sent
    pub sample_rate: u32,
    /// Convert spoken numbers and dates to digits
    pub inverse_text_normalization: bool,
    /// Deliver partial results while audio is streaming
    pub intermediate_results: bool,
    /// Insert punctuation in results
    pub punctuation: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            sample_rate: super::SAMPLE_RATE,
            inverse_text_normalization: false,
            intermediate_results: true,
            punctuation: true,
        }
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not yet opened
    Unstarted,
    /// Accepting frames
    Active,
    /// Stop requested, waiting for the final result
    AwaitingFinal,
    /// Final result delivered
    Completed,
    /// Recognizer reported an error
    Failed,
    /// Resources released
    Closed,
}

impl SessionState {
    /// Whether the session will produce no further results
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Closed)
    }

    const fn accepts_results(self) -> bool {
        matches!(self, Self::Active | Self::AwaitingFinal)
    }
}

/// Latest recognized text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Recognized text so far
    pub text: String,
    /// Whether the recognizer declared this text final
    pub is_final: bool,
}

/// Read-only view of a session at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Lifecycle state
    pub state: SessionState,
    /// Latest result
    pub result: RecognitionResult,
    /// Error message if the session failed
    pub error: Option<String>,
    /// Incremented on every accepted event
    pub revision: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Unstarted,
            result: RecognitionResult::default(),
            error: None,
            revision: 0,
        }
    }
}

/// Callback channel handed to recognizers
///
/// Cheap to clone and safe to call from any thread or task. Events that
/// arrive after the session settled are ignored.
#[derive(Clone)]
pub struct SessionEvents {
    id: Uuid,
    tx: Arc<watch::Sender<SessionSnapshot>>,
    results: mpsc::Sender<RecognitionResult>,
}

impl SessionEvents {
    /// Session this channel belongs to
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.id
    }

    /// Intermediate text
    pub fn on_partial(&self, text: impl Into<String>) {
        if self.publish(text.into(), false) {
            tracing::trace!(session = %self.id, "partial result");
        }
    }

    /// Final text; settles the session as `Completed`
    pub fn on_final(&self, text: impl Into<String>) {
        if self.publish(text.into(), true) {
            tracing::debug!(session = %self.id, "final result");
        }
    }

    /// Record a result in the snapshot and queue it for the poller
    ///
    /// The queue push happens under the snapshot lock, so a poller that sees
    /// `Completed` is guaranteed to find the final result already queued.
    fn publish(&self, text: String, is_final: bool) -> bool {
        self.tx.send_if_modified(|snap| {
            if !snap.state.accepts_results() {
                return false;
            }
            let result = RecognitionResult { text, is_final };
            if self.results.try_send(result.clone()).is_err() {
                tracing::debug!(session = %self.id, "result queue full, result only in snapshot");
            }
            snap.result = result;
            if is_final {
                snap.state = SessionState::Completed;
            }
            snap.revision += 1;
            true
        })
    }

    /// Recognizer failure; settles the session as `Failed`
    pub fn on_error(&self, message: impl Into<String>) {
        let message = message.into();
        let accepted = self.tx.send_if_modified(|snap| {
            if !snap.state.accepts_results() {
                return false;
            }
            snap.state = SessionState::Failed;
            snap.error = Some(message);
            snap.revision += 1;
            true
        });
        if accepted {
            tracing::warn!(session = %self.id, "recognizer reported an error");
        }
    }

    /// Remote side went away
    ///
    /// Closing before a final result counts as a failure.
    pub fn on_closed(&self) {
        self.on_error("connection closed before a final result");
        tracing::debug!(session = %self.id, "recognizer connection closed");
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.tx.send_if_modified(|snap| {
            if snap.state != from {
                return false;
            }
            snap.state = to;
            snap.revision += 1;
            true
        })
    }

    fn close(&self) {
        self.tx.send_if_modified(|snap| {
            if snap.state == SessionState::Closed {
                return false;
            }
            snap.state = SessionState::Closed;
            snap.revision += 1;
            true
        });
    }
}

/// Recognizer side of one session
#[async_trait]
pub trait SessionTransport: Send {
    /// Deliver one frame
    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<()>;

    /// Ask the recognizer to finalize; it must eventually call
    /// [`SessionEvents::on_final`] or [`SessionEvents::on_error`]
    async fn stop(&mut self) -> Result<()>;

    /// Release every resource, whatever the state
    fn shutdown(&mut self);
}

/// Recognizer capable of opening sessions
#[async_trait]
pub trait SpeechRecognitionService: Send + Sync {
    /// Open a session that reports through `events`
    async fn open_session(
        &self,
        config: &RecognitionConfig,
        events: SessionEvents,
    ) -> Result<Box<dyn SessionTransport>>;

    /// How long this recognizer may take to finalize after `stop`
    ///
    /// `None` defers to the caller's own budget. Recognizers that only start
    /// working once the audio ends should return their worst case here.
    fn final_result_timeout(&self) -> Option<Duration> {
        None
    }
}

/// One recognition exchange, owned by the polling loop
///
/// Dropping the session shuts it down.
pub struct RecognitionSession {
    id: Uuid,
    events: SessionEvents,
    snapshot: watch::Receiver<SessionSnapshot>,
    results: mpsc::Receiver<RecognitionResult>,
    transport: Box<dyn SessionTransport>,
    dropped_frames: usize,
}

impl RecognitionSession {
    /// Open a session and move it to `Active`
    ///
    /// # Errors
    ///
    /// Returns `SessionStart` if the recognizer refuses the session
    pub async fn start(
        service: &dyn SpeechRecognitionService,
        config: &RecognitionConfig,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let (tx, mut snapshot) = watch::channel(SessionSnapshot::default());
        let (results_tx, results) = mpsc::channel(RESULT_QUEUE);
        let events = SessionEvents {
            id,
            tx: Arc::new(tx),
            results: results_tx,
        };

        let transport = service
            .open_session(config, events.clone())
            .await
            .map_err(|e| match e {
                Error::SessionStart(_) => e,
                other => Error::SessionStart(other.to_string()),
            })?;

        events.transition(SessionState::Unstarted, SessionState::Active);
        drop(snapshot.borrow_and_update());
        tracing::debug!(
            session = %id,
            itn = config.inverse_text_normalization,
            "recognition session started"
        );

        Ok(Self {
            id,
            events,
            snapshot,
            results,
            transport,
            dropped_frames: 0,
        })
    }

    /// Session identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// Copy of the current snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Every result accepted since the last call, oldest first
    ///
    /// Read the state before draining: results that led to a state are
    /// always queued by the time the state is visible.
    pub fn drain_results(&mut self) -> Vec<RecognitionResult> {
        let mut drained = Vec::new();
        while let Ok(result) = self.results.try_recv() {
            drained.push(result);
        }
        drained
    }

    /// Frames the transport failed to accept
    #[must_use]
    pub const fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    /// Stream one frame
    ///
    /// Send failures are logged and absorbed; the session keeps going.
    /// Frames are only forwarded while `Active`.
    pub async fn send_frame(&mut self, frame: &AudioFrame) {
        if self.state() != SessionState::Active {
            return;
        }
        if let Err(e) = self.transport.send_frame(frame).await {
            self.dropped_frames += 1;
            tracing::warn!(
                session = %self.id,
                error = %e,
                dropped = self.dropped_frames,
                "frame not delivered to recognizer"
            );
        }
    }

    /// Request graceful finalization
    pub async fn stop(&mut self) {
        if !self
            .events
            .transition(SessionState::Active, SessionState::AwaitingFinal)
        {
            return;
        }
        tracing::debug!(session = %self.id, "stopping recognition session");
        if let Err(e) = self.transport.stop().await {
            self.events.on_error(format!("stop failed: {e}"));
        }
    }

    /// Wait up to `timeout` for the session to settle
    ///
    /// # Errors
    ///
    /// Returns `SessionTimeout` if nothing arrives in time (the session is
    /// force-closed), or `Recognition` if the recognizer failed
    pub async fn wait_final(&mut self, timeout: Duration) -> Result<RecognitionResult> {
        let settled = match tokio::time::timeout(
            timeout,
            self.snapshot.wait_for(|s| s.state.is_settled()),
        )
        .await
        {
            Ok(Ok(snap)) => Some(SessionSnapshot::clone(&snap)),
            Ok(Err(_)) | Err(_) => None,
        };

        let Some(snap) = settled else {
            tracing::warn!(session = %self.id, ?timeout, "recognition session stuck, closing");
            self.shutdown();
            return Err(Error::SessionTimeout(timeout));
        };

        match snap.state {
            SessionState::Completed => Ok(snap.result),
            SessionState::Failed => Err(Error::Recognition(
                snap.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            _ => Err(Error::Recognition("session closed".to_string())),
        }
    }

    /// Stop, then wait up to `timeout` for the final result
    ///
    /// # Errors
    ///
    /// See [`Self::wait_final`]
    pub async fn finish(&mut self, timeout: Duration) -> Result<RecognitionResult> {
        self.stop().await;
        self.wait_final(timeout).await
    }

    /// Release the session unconditionally; idempotent
    pub fn shutdown(&mut self) {
        if self.state() == SessionState::Closed {
            return;
        }
        self.transport.shutdown();
        self.events.close();
        tracing::debug!(session = %self.id, "recognition session closed");
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Stream already-captured frames through a fresh session
///
/// # Errors
///
/// Returns `RecognitionEmpty` if the final text is blank, or any session error
pub async fn recognize_frames(
    service: &dyn SpeechRecognitionService,
    config: &RecognitionConfig,
    frames: &[AudioFrame],
    final_timeout: Duration,
) -> Result<String> {
    let mut session = RecognitionSession::start(service, config).await?;

    for frame in frames {
        session.send_frame(frame).await;
        if session.state().is_settled() {
            break;
        }
    }

    let result = session.finish(final_timeout).await;
    session.shutdown();

    let text = result?.text;
    if text.trim().is_empty() {
        return Err(Error::RecognitionEmpty);
    }
    Ok(text)
}
