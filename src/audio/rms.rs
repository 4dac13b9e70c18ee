use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::radar::TrackId;

/// Payload posted from the audio domain to the UI domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
    /// The chain is up and about to produce frames
    Ready,
    /// Instantaneous RMS of one frame, in [0, 1]
    Rms(f32),
    /// The source ran out of frames
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisMessage {
    pub track: TrackId,
    /// Which chain of the track posted this; older generations are stale.
    pub generation: u64,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posted {
    Sent,
    /// Channel full, message discarded and counted
    Dropped,
    /// Receiver gone, nobody will ever read this track again
    Disconnected,
}

/// Fire-and-forget sending half bound to one track chain.
///
/// Never blocks: a full channel drops the message and bumps a shared counter
/// the UI domain can report on.
#[derive(Clone)]
pub struct MessagePort {
    sender: Sender<AnalysisMessage>,
    track: TrackId,
    generation: u64,
    dropped: Arc<AtomicU64>,
}

impl MessagePort {
    pub fn new(
        sender: Sender<AnalysisMessage>,
        track: TrackId,
        generation: u64,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            sender,
            track,
            generation,
            dropped,
        }
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    pub fn post(&self, kind: MessageKind) -> Posted {
        let message = AnalysisMessage {
            track: self.track,
            generation: self.generation,
            kind,
        };
        match self.sender.try_send(message) {
            Ok(()) => Posted::Sent,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Posted::Dropped
            }
            Err(TrySendError::Disconnected(_)) => Posted::Disconnected,
        }
    }
}

/// Root-mean-square magnitude of one frame.
///
/// `None` for an empty frame or one holding NaN/inf; such frames are skipped
/// rather than reported as silence.
pub fn rms(frame: &[f32]) -> Option<f32> {
    if frame.is_empty() {
        return None;
    }

    let mut sum = 0.0f32;
    for &s in frame {
        if !s.is_finite() {
            return None;
        }
        sum += s * s;
    }

    Some((sum / frame.len() as f32).sqrt().clamp(0.0, 1.0))
}

/// Transparent analysis tap: passes audio through untouched and posts one
/// RMS value per processed frame.
///
/// Runs on the audio domain, so `process` does no allocation, no locking and
/// no logging.
pub struct RmsExtractor {
    port: MessagePort,
    connected: bool,
}

impl RmsExtractor {
    pub fn new(port: MessagePort) -> Self {
        Self {
            port,
            connected: true,
        }
    }

    /// Copy `input` to `output` and post the frame's RMS.
    ///
    /// Returns the RMS that was computed, if the frame was usable.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Option<f32> {
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        self.analyze(input)
    }

    /// Post the RMS of `frame` without producing output.
    pub fn analyze(&mut self, frame: &[f32]) -> Option<f32> {
        let value = rms(frame)?;
        self.post(MessageKind::Rms(value));
        Some(value)
    }

    pub fn post(&mut self, kind: MessageKind) -> Posted {
        if !self.connected {
            return Posted::Disconnected;
        }
        let posted = self.port.post(kind);
        if posted == Posted::Disconnected {
            self.connected = false;
        }
        posted
    }

    /// False once the UI side has hung up.
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Re-frames arbitrarily sized callback buffers into fixed analysis frames.
///
/// Device callbacks deliver whatever block size the driver picked; the tap
/// accumulates into a preallocated frame and analyzes each time it fills.
pub struct RmsTap {
    extractor: RmsExtractor,
    frame: Vec<f32>,
    frame_size: usize,
}

impl RmsTap {
    pub fn new(extractor: RmsExtractor, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            extractor,
            frame: Vec::with_capacity(frame_size),
            frame_size,
        }
    }

    /// Feed mono samples. Returns how many full frames were analyzed.
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let mut frames = 0;
        for &s in samples {
            if self.push_one(s) {
                frames += 1;
            }
        }
        frames
    }

    /// Feed interleaved samples, averaging channels on the fly.
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) -> usize {
        if channels <= 1 {
            return self.push_samples(data);
        }
        let mut frames = 0;
        for chunk in data.chunks_exact(channels) {
            let mono = chunk.iter().sum::<f32>() / channels as f32;
            if self.push_one(mono) {
                frames += 1;
            }
        }
        frames
    }

    fn push_one(&mut self, sample: f32) -> bool {
        self.frame.push(sample);
        if self.frame.len() < self.frame_size {
            return false;
        }
        self.extractor.analyze(&self.frame);
        self.frame.clear();
        true
    }

    pub fn extractor_mut(&mut self) -> &mut RmsExtractor {
        &mut self.extractor
    }
}
