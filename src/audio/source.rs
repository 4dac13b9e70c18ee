use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use log::info;
use std::path::Path;

/// Producer of successive mono sample frames for one track.
///
/// Implementations fill the caller's preallocated buffer so the consumer never
/// allocates per frame. There is no back-pressure: whoever drives the source
/// must process each frame before asking for the next.
pub trait FrameSource: Send {
    /// Write up to `frame.len()` samples in [-1, 1] into `frame`.
    ///
    /// Returns the number of samples written, or `None` once the stream has
    /// ended. End of stream is not an error; the source simply stops.
    fn next_frame(&mut self, frame: &mut [f32]) -> Option<usize>;

    fn sample_rate(&self) -> u32;
}

/// In-memory mono samples, optionally looping forever.
pub struct BufferSource {
    samples: Vec<f32>,
    position: usize,
    sample_rate: u32,
    looping: bool,
}

impl BufferSource {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            position: 0,
            sample_rate,
            looping: false,
        }
    }

    /// Restart from the beginning when the end is reached.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Build a buffer from frames of constant RMS, handy for driving the
    /// envelope with a known loudness sequence.
    pub fn from_levels(levels: &[f32], frame_size: usize, sample_rate: u32) -> Self {
        let mut samples = Vec::with_capacity(levels.len() * frame_size);
        for &level in levels {
            // A square wave of amplitude `level` has RMS exactly `level`.
            samples.extend((0..frame_size).map(|i| if i % 2 == 0 { level } else { -level }));
        }
        Self::new(samples, sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl FrameSource for BufferSource {
    fn next_frame(&mut self, frame: &mut [f32]) -> Option<usize> {
        if self.samples.is_empty() {
            return None;
        }
        if self.position >= self.samples.len() {
            if !self.looping {
                return None;
            }
            self.position = 0;
        }

        let end = (self.position + frame.len()).min(self.samples.len());
        let written = end - self.position;
        frame[..written].copy_from_slice(&self.samples[self.position..end]);
        self.position = end;
        Some(written)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// WAV file decoded up front and mixed down to mono.
pub struct WavFileSource {
    inner: BufferSource,
    channels: u16,
}

impl WavFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1);

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("Failed to decode {}", path.display()))?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .with_context(|| format!("Failed to decode {}", path.display()))?
            }
        };

        let mono = downmix(&interleaved, channels as usize);
        info!(
            "Loaded WAV file: {} ({}Hz, {} channels, {} mono samples)",
            path.display(),
            spec.sample_rate,
            channels,
            mono.len()
        );

        Ok(Self {
            inner: BufferSource::new(mono, spec.sample_rate),
            channels,
        })
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.inner = self.inner.looping(looping);
        self
    }

    /// Channel count of the file before downmixing
    pub fn source_channels(&self) -> u16 {
        self.channels
    }

    pub fn duration_seconds(&self) -> f32 {
        self.inner.len() as f32 / self.inner.sample_rate().max(1) as f32
    }
}

impl FrameSource for WavFileSource {
    fn next_frame(&mut self, frame: &mut [f32]) -> Option<usize> {
        self.inner.next_frame(frame)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }
}

/// Average interleaved channels into one, clamped to [-1, 1].
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.iter().map(|s| s.clamp(-1.0, 1.0)).collect();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| (frame.iter().sum::<f32>() / channels as f32).clamp(-1.0, 1.0))
        .collect()
}
