use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use log::{info, warn};

use super::{MessageKind, MessagePort, RmsExtractor, RmsTap};

/// Live input device analysed in its own driver callback.
///
/// The callback is the real-time domain: it downmixes, re-frames and posts
/// RMS messages, nothing else. Dropping the tap stops the stream, so a
/// replacement tap for the same track should only be opened after the old
/// one is dropped.
pub struct DeviceTap {
    _stream: Stream,
    device_name: String,
    sample_rate: u32,
    channels: u16,
}

impl DeviceTap {
    /// Open the default input device and start analysing it.
    pub fn open_default_input(port: MessagePort, frame_size: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No input device available"))?;

        let config = device
            .default_input_config()
            .map_err(|e| anyhow::anyhow!("Failed to get default input config: {}", e))?;

        if config.sample_format() != SampleFormat::F32 {
            anyhow::bail!(
                "Unsupported input sample format {:?}, only f32 is analysed",
                config.sample_format()
            );
        }

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        info!("Using audio device: {}", device_name);
        info!("Creating input stream with {} channels at {} Hz", channels, sample_rate);

        let mut tap = RmsTap::new(RmsExtractor::new(port), frame_size);
        let channel_count = channels as usize;
        let mut ready_sent = false;

        let stream = device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !ready_sent {
                    tap.extractor_mut().post(MessageKind::Ready);
                    ready_sent = true;
                }
                tap.push_interleaved(data, channel_count);
            },
            |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;

        Ok(Self {
            _stream: stream,
            device_name,
            sample_rate,
            channels,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}
