//! Audio capture from microphone

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::analyzer::{BlockAssembler, FrameAnalyzer};
use crate::{Error, Result};

/// A source of live microphone blocks
///
/// Arming connects the input stream to an analyzer; disarming drops the
/// stream so no further callback can run. The session arms capture for
/// every listening turn and disarms it while a response is pending or
/// playing.
pub trait CaptureSource {
    /// Start delivering fixed-size blocks to `analyzer`
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureUnavailable`] if the input stream cannot be
    /// opened
    fn arm(&mut self, analyzer: FrameAnalyzer) -> Result<()>;

    /// Stop capturing; returns once the stream is gone
    fn disarm(&mut self);

    /// Whether an input stream is currently connected
    fn is_armed(&self) -> bool;

    /// Rate of the delivered samples
    fn sample_rate(&self) -> u32;
}

/// Captures audio from the default input device
pub struct MicrophoneCapture {
    device: Device,
    config: StreamConfig,
    block_size: usize,
    stream: Option<Stream>,
}

impl MicrophoneCapture {
    /// Open the default input device
    ///
    /// Prefers a mono configuration at `sample_rate`; falls back to the
    /// device default, in which case only the first channel is analyzed
    /// and the device rate is used for encoding.
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available
    pub fn new(sample_rate: u32, block_size: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::CaptureUnavailable("no input device available".to_string()))?;

        let preferred = device
            .supported_input_configs()
            .map_err(|e| Error::CaptureUnavailable(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            });

        let config = match preferred {
            Some(range) => range.with_sample_rate(SampleRate(sample_rate)).config(),
            None => {
                let fallback = device
                    .default_input_config()
                    .map_err(|e| Error::CaptureUnavailable(e.to_string()))?
                    .config();
                tracing::warn!(
                    requested = sample_rate,
                    sample_rate = fallback.sample_rate.0,
                    channels = fallback.channels,
                    "no mono config at requested rate, using device default"
                );
                fallback
            }
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            block_size,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            block_size,
            stream: None,
        })
    }

    /// Channels delivered by the driver
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.config.channels
    }
}

impl CaptureSource for MicrophoneCapture {
    fn arm(&mut self, analyzer: FrameAnalyzer) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut assembler = BlockAssembler::new(self.block_size, usize::from(self.config.channels));
        let faults = analyzer.clone();

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    assembler.push(data, |block| analyzer.analyze(block));
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    faults.report_fault(err.to_string());
                },
                None,
            )
            .map_err(|e| Error::CaptureUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::CaptureUnavailable(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture armed");
        Ok(())
    }

    fn disarm(&mut self) {
        if let Some(stream) = self.stream.take() {
            // pause first so the callback is quiesced before the drop
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "failed to pause capture stream");
            }
            drop(stream);
            tracing::debug!("audio capture disarmed");
        }
    }

    fn is_armed(&self) -> bool {
        self.stream.is_some()
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.disarm();
    }
}
