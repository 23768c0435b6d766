//! PCM16 audio frames

use std::time::Duration;

use crate::Result;

/// One fixed-length block of 16-bit little-endian mono PCM
///
/// Frames are immutable once produced; consumers that need history keep
/// their own copies.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioFrame {
    bytes: Vec<u8>,
}

impl AudioFrame {
    /// Build a frame from raw PCM16 little-endian bytes
    ///
    /// A trailing odd byte is dropped.
    #[must_use]
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        if bytes.len() % 2 == 1 {
            bytes.pop();
        }
        Self { bytes }
    }

    /// Build a frame from signed 16-bit samples
    #[must_use]
    pub fn from_samples(samples: &[i16]) -> Self {
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self { bytes }
    }

    /// A frame of `len` samples all at `amplitude`, alternating sign
    ///
    /// The mean absolute level of the result is exactly `amplitude`.
    #[must_use]
    pub fn constant(amplitude: i16, len: usize) -> Self {
        let samples: Vec<i16> = (0..len)
            .map(|i| if i % 2 == 0 { amplitude } else { amplitude.saturating_neg() })
            .collect();
        Self::from_samples(&samples)
    }

    /// Raw PCM bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Iterate the decoded samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Number of samples in the frame
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.bytes.len() / 2
    }

    /// Whether the frame carries no samples
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Rectified average amplitude: mean of `|sample|`
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn level(&self) -> f32 {
        let count = self.sample_count();
        if count == 0 {
            return 0.0;
        }
        let sum: u64 = self.samples().map(|s| u64::from(s.unsigned_abs())).sum();
        (sum as f64 / count as f64) as f32
    }

    /// Playback duration at the given sample rate
    #[must_use]
    pub fn duration(&self, sample_rate: u32) -> Duration {
        frame_duration(self.sample_count(), sample_rate)
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples", &self.sample_count())
            .field("level", &self.level())
            .finish()
    }
}

/// Duration of `samples` samples at `sample_rate`
#[must_use]
pub fn frame_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples as u128 * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Number of whole frames needed to cover at least `duration`
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#[must_use]
pub fn frames_for(duration: Duration, sample_rate: u32, frame_samples: usize) -> usize {
    if frame_samples == 0 {
        return 0;
    }
    let frames = duration.as_secs_f64() * f64::from(sample_rate) / frame_samples as f64;
    // Tolerate float noise so exact multiples don't round up
    (frames - 1e-9).ceil().max(0.0) as usize
}

/// Encode frames as a 16-bit mono WAV file in memory
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn frames_to_wav(frames: &[AudioFrame], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for frame in frames {
            for sample in frame.samples() {
                writer.write_sample(sample)?;
            }
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Decode a 16-bit mono WAV file into frames of `frame_samples` samples
///
/// Returns the frames and the file's sample rate. The last frame may be short.
///
/// # Errors
///
/// Returns error if the file is not 16-bit mono PCM
pub fn wav_to_frames<R: std::io::Read>(
    reader: R,
    frame_samples: usize,
) -> Result<(Vec<AudioFrame>, u32)> {
    let mut reader = hound::WavReader::new(reader)?;
    let spec = reader.spec();
    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(crate::Error::Audio(format!(
            "expected 16-bit mono PCM, got {} channel(s) at {} bits",
            spec.channels, spec.bits_per_sample
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let frames = samples
        .chunks(frame_samples.max(1))
        .map(AudioFrame::from_samples)
        .collect();

    Ok((frames, spec.sample_rate))
}
