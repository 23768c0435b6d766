//! Audio capture from microphone
//!
//! The cpal stream lives on its own thread for the lifetime of a capture
//! handle (cpal streams aren't `Send`); its callback slices samples into
//! fixed-size PCM16 frames and pushes them over a bounded channel that
//! [`CaptureStream::read_frame`] pulls from.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use super::frame::AudioFrame;
use crate::{Error, Result};

/// Frames buffered between the device callback and the reader
const FRAME_QUEUE: usize = 64;

/// Frame or device fault, as delivered by the capture thread
type CaptureItem = std::result::Result<AudioFrame, String>;

/// Single-tenant lock for a capture device
#[derive(Debug, Default)]
pub struct DeviceLock {
    claimed: AtomicBool,
}

impl DeviceLock {
    /// Unclaimed lock
    #[must_use]
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Claim the device
    ///
    /// # Errors
    ///
    /// Returns `DeviceBusy` if a claim is already held
    pub fn acquire(self: &Arc<Self>) -> Result<DeviceClaim> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::DeviceBusy)?;
        Ok(DeviceClaim {
            lock: Arc::clone(self),
        })
    }

    /// Whether a claim is currently held
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

/// Held claim; released on drop
#[derive(Debug)]
pub struct DeviceClaim {
    lock: Arc<DeviceLock>,
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.lock.claimed.store(false, Ordering::Release);
    }
}

/// Open handle on a capture device
#[async_trait]
pub trait CaptureStream: Send {
    /// Next frame, or `None` if none arrived within `timeout`
    ///
    /// # Errors
    ///
    /// Returns `DeviceRead` on a transient device fault; the caller decides
    /// whether to retry
    async fn read_frame(&mut self, timeout: Duration) -> Result<Option<AudioFrame>>;

    /// Release the device; idempotent
    async fn close(&mut self);
}

/// Something that can hand out capture handles, one at a time
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Claim the device and start capturing
    ///
    /// # Errors
    ///
    /// Returns `DeviceBusy` while another handle is open, or
    /// `DeviceUnavailable` if the device cannot be claimed
    async fn open(&self) -> Result<Box<dyn CaptureStream>>;

    /// Samples per frame
    fn frame_samples(&self) -> usize;

    /// Sample rate of produced frames
    fn sample_rate(&self) -> u32;
}

/// Process-wide lock on the default input device
static MICROPHONE: LazyLock<Arc<DeviceLock>> = LazyLock::new(|| Arc::new(DeviceLock::new()));

/// Default input device, 16-bit mono at a fixed rate
pub struct MicrophoneSource {
    sample_rate: u32,
    frame_samples: usize,
}

impl MicrophoneSource {
    /// Create a source producing `frame_samples`-sample frames
    #[must_use]
    pub const fn new(sample_rate: u32, frame_samples: usize) -> Self {
        Self {
            sample_rate,
            frame_samples,
        }
    }
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    async fn open(&self) -> Result<Box<dyn CaptureStream>> {
        let claim = MICROPHONE.acquire()?;

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let sample_rate = self.sample_rate;
        let frame_samples = self.frame_samples;
        let worker = std::thread::Builder::new()
            .name("pibot-capture".to_string())
            .spawn(move || {
                run_capture_thread(sample_rate, frame_samples, &frame_tx, ready_tx, &thread_stop);
            })
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        let setup = ready_rx.await.unwrap_or_else(|_| {
            Err(Error::DeviceUnavailable(
                "capture thread exited during setup".to_string(),
            ))
        });
        if let Err(e) = setup {
            // The thread has already given up; reap it off the runtime
            tokio::task::spawn_blocking(move || join_worker(worker, Some(claim)))
                .await
                .ok();
            return Err(e);
        }

        tracing::debug!(sample_rate, frame_samples, "audio capture started");

        Ok(Box::new(MicrophoneStream {
            rx: frame_rx,
            stop,
            worker: Some(worker),
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

/// Handle on a running microphone capture
struct MicrophoneStream {
    rx: mpsc::Receiver<CaptureItem>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    claim: Option<DeviceClaim>,
}

#[async_trait]
impl CaptureStream for MicrophoneStream {
    async fn read_frame(&mut self, timeout: Duration) -> Result<Option<AudioFrame>> {
        if self.worker.is_none() {
            return Err(Error::DeviceRead("capture stream is closed".to_string()));
        }

        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(Error::DeviceRead("capture thread stopped".to_string())),
            Ok(Some(Ok(frame))) => Ok(Some(frame)),
            Ok(Some(Err(message))) => Err(Error::DeviceRead(message)),
        }
    }

    async fn close(&mut self) {
        let Some((worker, claim)) = self.signal_stop() else {
            return;
        };
        // The claim moves with the join so the device stays held until the
        // thread is gone, even if this future is dropped midway
        if tokio::task::spawn_blocking(move || join_worker(worker, claim))
            .await
            .is_err()
        {
            tracing::warn!("capture join task failed");
        }
        tracing::debug!("audio capture stopped");
    }
}

impl MicrophoneStream {
    /// Ask the capture thread to stop, handing back what must outlive it
    fn signal_stop(&mut self) -> Option<(JoinHandle<()>, Option<DeviceClaim>)> {
        let worker = self.worker.take()?;
        self.stop.store(true, Ordering::Release);
        worker.thread().unpark();
        Some((worker, self.claim.take()))
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        let Some((worker, claim)) = self.signal_stop() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || join_worker(worker, claim));
            }
            Err(_) => join_worker(worker, claim),
        }
    }
}

/// Wait for the capture thread, then release the device
fn join_worker(worker: JoinHandle<()>, claim: Option<DeviceClaim>) {
    if worker.join().is_err() {
        tracing::warn!("capture thread panicked");
    }
    drop(claim);
}

/// Owns the cpal stream until `stop` is raised
fn run_capture_thread(
    sample_rate: u32,
    frame_samples: usize,
    frame_tx: &mpsc::Sender<CaptureItem>,
    ready_tx: oneshot::Sender<Result<()>>,
    stop: &AtomicBool,
) {
    let stream = match build_input_stream(sample_rate, frame_samples, frame_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(Error::DeviceUnavailable(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    while !stop.load(Ordering::Acquire) {
        std::thread::park_timeout(Duration::from_millis(50));
    }

    drop(stream);
}

fn build_input_stream(
    sample_rate: u32,
    frame_samples: usize,
    frame_tx: &mpsc::Sender<CaptureItem>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| Error::DeviceUnavailable("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "audio capture initialized"
    );

    let data_tx = frame_tx.clone();
    let error_tx = frame_tx.clone();
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut pending: Vec<i16> = Vec::with_capacity(frame_samples * 2);

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                pending.extend(data.iter().map(|&s| f32_to_pcm16(s)));
                while pending.len() >= frame_samples {
                    let frame = AudioFrame::from_samples(&pending[..frame_samples]);
                    pending.drain(..frame_samples);
                    if data_tx.try_send(Ok(frame)).is_err() {
                        let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::trace!(dropped = total, "capture queue full, frame dropped");
                    }
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                let _ = error_tx.try_send(Err(err.to_string()));
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
fn f32_to_pcm16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
