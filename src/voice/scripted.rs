//! Deterministic stand-ins for the microphone, recognizer and speaker
//!
//! Used by the test suites and by anyone wiring the engine without
//! hardware. Frames, results and faults are scripted up front; the
//! doubles record what the engine did with them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::capture::{AudioSource, CaptureStream, DeviceClaim, DeviceLock};
use super::frame::AudioFrame;
use super::prompt::PromptEmitter;
use super::session::{RecognitionConfig, SessionEvents, SessionTransport, SpeechRecognitionService};
use crate::{Error, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One step of a frame script
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver this frame
    Frame(AudioFrame),
    /// Fail the read with a transient fault
    ReadError(String),
    /// Deliver nothing until the read times out
    Gap,
}

/// Audio source that plays back a script
///
/// Once the script runs out the source keeps producing frames at the idle
/// level (silence by default).
pub struct ScriptedSource {
    sample_rate: u32,
    frame_samples: usize,
    idle_level: i16,
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
    lock: Arc<DeviceLock>,
    opens: AtomicUsize,
    unavailable: AtomicBool,
}

impl ScriptedSource {
    /// Empty script producing `frame_samples`-sample frames at 16 kHz
    #[must_use]
    pub fn new(frame_samples: usize) -> Self {
        Self {
            sample_rate: super::SAMPLE_RATE,
            frame_samples,
            idle_level: 0,
            script: Arc::new(Mutex::new(VecDeque::new())),
            lock: Arc::new(DeviceLock::new()),
            opens: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Level of the frames produced after the script runs out
    #[must_use]
    pub const fn with_idle_level(mut self, level: i16) -> Self {
        self.idle_level = level;
        self
    }

    /// Append `count` frames at a constant `level`
    pub fn push_level(&self, level: i16, count: usize) -> &Self {
        let frame = AudioFrame::constant(level, self.frame_samples);
        let mut script = lock(&self.script);
        script.extend(std::iter::repeat_n(ScriptStep::Frame(frame), count));
        drop(script);
        self
    }

    /// Append one frame
    pub fn push_frame(&self, frame: AudioFrame) -> &Self {
        lock(&self.script).push_back(ScriptStep::Frame(frame));
        self
    }

    /// Append a transient read fault
    pub fn push_read_error(&self, message: impl Into<String>) -> &Self {
        lock(&self.script).push_back(ScriptStep::ReadError(message.into()));
        self
    }

    /// Append a read that times out
    pub fn push_gap(&self) -> &Self {
        lock(&self.script).push_back(ScriptStep::Gap);
        self
    }

    /// Make `open` fail with `DeviceUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Hold the device from outside, as another process would
    ///
    /// # Errors
    ///
    /// Returns `DeviceBusy` if a handle is already open
    pub fn claim(&self) -> Result<DeviceClaim> {
        self.lock.acquire()
    }

    /// Successful opens so far
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    /// Whether a handle is currently open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock.is_claimed()
    }

    /// Script steps not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    async fn open(&self) -> Result<Box<dyn CaptureStream>> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(Error::DeviceUnavailable("scripted device offline".to_string()));
        }
        let claim = self.lock.acquire()?;
        self.opens.fetch_add(1, Ordering::AcqRel);

        Ok(Box::new(ScriptedStream {
            script: Arc::clone(&self.script),
            idle: AudioFrame::constant(self.idle_level, self.frame_samples),
            claim: Some(claim),
        }))
    }

    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

struct ScriptedStream {
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
    idle: AudioFrame,
    claim: Option<DeviceClaim>,
}

#[async_trait]
impl CaptureStream for ScriptedStream {
    async fn read_frame(&mut self, timeout: Duration) -> Result<Option<AudioFrame>> {
        if self.claim.is_none() {
            return Err(Error::DeviceRead("capture stream is closed".to_string()));
        }
        tokio::task::yield_now().await;

        let step = lock(&self.script).pop_front();
        match step {
            Some(ScriptStep::Frame(frame)) => Ok(Some(frame)),
            Some(ScriptStep::ReadError(message)) => Err(Error::DeviceRead(message)),
            Some(ScriptStep::Gap) => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
            None => Ok(Some(self.idle.clone())),
        }
    }

    async fn close(&mut self) {
        self.claim.take();
    }
}

/// Event a scripted session emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedEvent {
    /// `on_partial`
    Partial(String),
    /// `on_final`
    Final(String),
    /// `on_error`
    Error(String),
    /// `on_closed`
    Closed,
}

/// What one recognition session will do
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    steps: Vec<(usize, ScriptedEvent)>,
    on_stop: Option<ScriptedEvent>,
    refuse_start: bool,
}

impl SessionScript {
    /// Session that does nothing until stopped, then never answers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session that fails to open
    #[must_use]
    pub fn refused() -> Self {
        Self {
            refuse_start: true,
            ..Self::default()
        }
    }

    /// Emit `event` once the `frames`-th frame (counted from 1) arrives
    #[must_use]
    pub fn at(mut self, frames: usize, event: ScriptedEvent) -> Self {
        self.steps.push((frames.max(1), event));
        self
    }

    /// Partial result after `frames` frames
    #[must_use]
    pub fn partial(self, frames: usize, text: impl Into<String>) -> Self {
        self.at(frames, ScriptedEvent::Partial(text.into()))
    }

    /// Final result after `frames` frames
    #[must_use]
    pub fn final_text(self, frames: usize, text: impl Into<String>) -> Self {
        self.at(frames, ScriptedEvent::Final(text.into()))
    }

    /// Recognizer error after `frames` frames
    #[must_use]
    pub fn error(self, frames: usize, message: impl Into<String>) -> Self {
        self.at(frames, ScriptedEvent::Error(message.into()))
    }

    /// Emit `event` when the session is asked to stop
    #[must_use]
    pub fn on_stop(mut self, event: ScriptedEvent) -> Self {
        self.on_stop = Some(event);
        self
    }
}

/// Counters shared between a [`ScriptedRecognizer`] and its sessions
#[derive(Debug, Default)]
struct RecognizerStats {
    opened: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    frames: AtomicUsize,
    configs: Mutex<Vec<RecognitionConfig>>,
}

/// Recognizer whose sessions follow queued scripts
///
/// Each opened session takes the next queued [`SessionScript`]; once the
/// queue is empty every session uses the fallback script.
pub struct ScriptedRecognizer {
    scripts: Mutex<VecDeque<SessionScript>>,
    fallback: SessionScript,
    from_thread: bool,
    stats: Arc<RecognizerStats>,
}

impl Default for ScriptedRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRecognizer {
    /// Recognizer whose sessions answer `""` when stopped
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback: SessionScript::new().on_stop(ScriptedEvent::Final(String::new())),
            from_thread: false,
            stats: Arc::new(RecognizerStats::default()),
        }
    }

    /// Queue the script for the next session
    #[must_use]
    pub fn then(self, script: SessionScript) -> Self {
        lock(&self.scripts).push_back(script);
        self
    }

    /// Script used once the queue is empty
    #[must_use]
    pub fn otherwise(mut self, script: SessionScript) -> Self {
        self.fallback = script;
        self
    }

    /// Deliver callbacks from a long-lived OS thread per session, as
    /// vendor SDKs do
    ///
    /// Results then arrive some time after the frame that triggered them.
    #[must_use]
    pub const fn deliver_from_thread(mut self) -> Self {
        self.from_thread = true;
        self
    }

    /// Sessions opened so far (refused ones excluded)
    #[must_use]
    pub fn opened(&self) -> usize {
        self.stats.opened.load(Ordering::Acquire)
    }

    /// Sessions not yet shut down
    #[must_use]
    pub fn active(&self) -> usize {
        self.stats.active.load(Ordering::Acquire)
    }

    /// Highest number of sessions alive at once
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.stats.max_active.load(Ordering::Acquire)
    }

    /// Frames received across all sessions
    #[must_use]
    pub fn frames_received(&self) -> usize {
        self.stats.frames.load(Ordering::Acquire)
    }

    /// Config of every opened session, in order
    #[must_use]
    pub fn configs(&self) -> Vec<RecognitionConfig> {
        lock(&self.stats.configs).clone()
    }
}

#[async_trait]
impl SpeechRecognitionService for ScriptedRecognizer {
    async fn open_session(
        &self,
        config: &RecognitionConfig,
        events: SessionEvents,
    ) -> Result<Box<dyn SessionTransport>> {
        let script = lock(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if script.refuse_start {
            return Err(Error::SessionStart("scripted refusal".to_string()));
        }

        let driver = if self.from_thread {
            Some(spawn_driver(events.clone())?)
        } else {
            None
        };

        self.stats.opened.fetch_add(1, Ordering::AcqRel);
        let now = self.stats.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.max_active.fetch_max(now, Ordering::AcqRel);
        lock(&self.stats.configs).push(*config);

        Ok(Box::new(ScriptedTransport {
            script,
            events,
            received: 0,
            driver,
            stats: Arc::clone(&self.stats),
            closed: false,
        }))
    }
}

/// Callback thread for one session; exits once its sender is dropped
fn spawn_driver(events: SessionEvents) -> Result<std::sync::mpsc::Sender<ScriptedEvent>> {
    let (tx, rx) = std::sync::mpsc::channel::<ScriptedEvent>();
    std::thread::Builder::new()
        .name("scripted-recognizer".to_string())
        .spawn(move || {
            for event in rx {
                deliver(&events, event);
            }
        })
        .map_err(|e| Error::SessionStart(e.to_string()))?;
    Ok(tx)
}

struct ScriptedTransport {
    script: SessionScript,
    events: SessionEvents,
    received: usize,
    driver: Option<std::sync::mpsc::Sender<ScriptedEvent>>,
    stats: Arc<RecognizerStats>,
    closed: bool,
}

impl ScriptedTransport {
    fn emit(&self, event: ScriptedEvent) {
        match &self.driver {
            Some(driver) => {
                if driver.send(event).is_err() {
                    tracing::warn!("scripted callback thread is gone");
                }
            }
            None => deliver(&self.events, event),
        }
    }
}

fn deliver(events: &SessionEvents, event: ScriptedEvent) {
    match event {
        ScriptedEvent::Partial(text) => events.on_partial(text),
        ScriptedEvent::Final(text) => events.on_final(text),
        ScriptedEvent::Error(message) => events.on_error(message),
        ScriptedEvent::Closed => events.on_closed(),
    }
}

#[async_trait]
impl SessionTransport for ScriptedTransport {
    async fn send_frame(&mut self, _frame: &AudioFrame) -> Result<()> {
        if self.closed {
            return Err(Error::SessionSend("session closed".to_string()));
        }
        self.received += 1;
        self.stats.frames.fetch_add(1, Ordering::AcqRel);

        let due: Vec<ScriptedEvent> = self
            .script
            .steps
            .iter()
            .filter(|(at, _)| *at == self.received)
            .map(|(_, event)| event.clone())
            .collect();
        for event in due {
            self.emit(event);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(event) = self.script.on_stop.clone() {
            self.emit(event);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.driver.take();
        if !self.closed {
            self.closed = true;
            self.stats.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Prompt emitter that records what it was asked to say
#[derive(Debug, Default)]
pub struct RecordingPrompter {
    spoken: Mutex<Vec<String>>,
    failing: bool,
}

impl RecordingPrompter {
    /// Prompter that always succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prompter whose every call fails (after recording the text)
    #[must_use]
    pub fn failing() -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    /// Everything said so far, in order
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }
}

#[async_trait]
impl PromptEmitter for RecordingPrompter {
    async fn speak(&self, text: &str) -> Result<()> {
        lock(&self.spoken).push(text.to_string());
        if self.failing {
            return Err(Error::Tts("speaker unplugged".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::session::{RecognitionSession, SessionState};

    #[tokio::test]
    async fn test_source_plays_script_then_idles() {
        let source = ScriptedSource::new(8).with_idle_level(5);
        source.push_level(1000, 2).push_read_error("xrun");

        let mut stream = source.open().await.unwrap();
        let timeout = Duration::from_millis(10);
        assert!((stream.read_frame(timeout).await.unwrap().unwrap().level() - 1000.0).abs() < f32::EPSILON);
        stream.read_frame(timeout).await.unwrap();
        assert!(matches!(stream.read_frame(timeout).await, Err(Error::DeviceRead(_))));
        assert!((stream.read_frame(timeout).await.unwrap().unwrap().level() - 5.0).abs() < f32::EPSILON);

        assert!(matches!(source.open().await, Err(Error::DeviceBusy)));
        stream.close().await;
        assert!(!source.is_open());
        assert!(matches!(stream.read_frame(timeout).await, Err(Error::DeviceRead(_))));
    }

    #[tokio::test]
    async fn test_recognizer_follows_scripts_in_order() {
        let recognizer = ScriptedRecognizer::new()
            .then(SessionScript::refused())
            .then(SessionScript::new().partial(1, "机器").final_text(2, "机器人"))
            .deliver_from_thread();
        let config = RecognitionConfig::default();
        let frame = AudioFrame::constant(0, 4);

        assert!(matches!(
            RecognitionSession::start(&recognizer, &config).await,
            Err(Error::SessionStart(_))
        ));

        let mut session = RecognitionSession::start(&recognizer, &config).await.unwrap();
        session.send_frame(&frame).await;
        session.send_frame(&frame).await;
        let result = session.wait_final(Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.text, "机器人");
        assert_eq!(session.state(), SessionState::Completed);
        let texts: Vec<String> = session.drain_results().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, ["机器", "机器人"]);
        assert_eq!(recognizer.active(), 1);

        drop(session);
        assert_eq!(recognizer.active(), 0);
        assert_eq!(recognizer.opened(), 1);
        assert_eq!(recognizer.frames_received(), 2);
    }
}
