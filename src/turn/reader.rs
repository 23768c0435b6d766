//! Cancellable frame pulls with a transient-fault budget

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::voice::{AudioFrame, CaptureStream};
use crate::{Error, Result};

/// Reads frames for one listen or record loop
pub struct FrameReader {
    timeout: Duration,
    max_errors: usize,
    consecutive_errors: usize,
}

impl FrameReader {
    /// Reader that blocks at most `timeout` per pull and tolerates
    /// `max_errors` consecutive read faults
    #[must_use]
    pub const fn new(timeout: Duration, max_errors: usize) -> Self {
        Self {
            timeout,
            max_errors,
            consecutive_errors: 0,
        }
    }

    /// Next frame, or `None` if the pull timed out or hit a tolerated fault
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once `cancel` fires, the last `DeviceRead` once
    /// the fault budget is spent, or any other stream error as is
    pub async fn next(
        &mut self,
        stream: &mut dyn CaptureStream,
        cancel: &CancellationToken,
    ) -> Result<Option<AudioFrame>> {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            read = stream.read_frame(self.timeout) => read,
        };

        match read {
            Ok(frame) => {
                if frame.is_some() {
                    self.consecutive_errors = 0;
                }
                Ok(frame)
            }
            Err(Error::DeviceRead(message)) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors > self.max_errors {
                    tracing::error!(
                        errors = self.consecutive_errors,
                        error = %message,
                        "too many consecutive read errors"
                    );
                    return Err(Error::DeviceRead(message));
                }
                tracing::warn!(
                    errors = self.consecutive_errors,
                    error = %message,
                    "transient read error, retrying"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::AudioSource;
    use crate::voice::scripted::ScriptedSource;

    #[tokio::test]
    async fn test_fault_budget_resets_on_success() {
        let source = ScriptedSource::new(4);
        source
            .push_read_error("a")
            .push_read_error("b")
            .push_level(900, 1)
            .push_read_error("c")
            .push_read_error("d")
            .push_read_error("e");
        let mut stream = source.open().await.unwrap();
        let cancel = CancellationToken::new();
        let mut reader = FrameReader::new(Duration::from_millis(10), 2);

        assert!(reader.next(stream.as_mut(), &cancel).await.unwrap().is_none());
        assert!(reader.next(stream.as_mut(), &cancel).await.unwrap().is_none());
        assert!(reader.next(stream.as_mut(), &cancel).await.unwrap().is_some());
        assert!(reader.next(stream.as_mut(), &cancel).await.unwrap().is_none());
        assert!(reader.next(stream.as_mut(), &cancel).await.unwrap().is_none());
        let err = reader.next(stream.as_mut(), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::DeviceRead(msg) if msg == "e"));
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_ready_frames() {
        let source = ScriptedSource::new(4);
        let mut stream = source.open().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut reader = FrameReader::new(Duration::from_millis(10), 0);
        assert!(matches!(
            reader.next(stream.as_mut(), &cancel).await,
            Err(Error::Cancelled)
        ));
    }
}
