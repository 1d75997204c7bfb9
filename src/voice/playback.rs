//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use futures::future::BoxFuture;

use super::encoder::decode_wav;
use crate::{Error, Result};

/// Poll interval while waiting for playback to drain
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Grace period past the expected duration before giving up
const DRAIN_TIMEOUT_SLACK: Duration = Duration::from_millis(500);

/// Minimum time the stream stays open after the last sample is written
const MIN_DRAIN: Duration = Duration::from_millis(100);

/// A complete synthesized response, ready to play
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioAsset {
    bytes: Vec<u8>,
}

/// Container format of an asset, sniffed from its first bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Wav,
    Mp3,
}

impl AudioAsset {
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Join fragments in arrival order
    #[must_use]
    pub fn from_fragments(fragments: &[Vec<u8>]) -> Self {
        Self {
            bytes: fragments.concat(),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn kind(&self) -> AssetKind {
        if self.bytes.starts_with(b"RIFF") {
            AssetKind::Wav
        } else {
            AssetKind::Mp3
        }
    }
}

/// Plays finished assets and reports completion
///
/// `play` returns a future that resolves when playback has ended. The
/// session keeps polling other inputs meanwhile, so the future must not
/// borrow the player.
pub trait Player {
    /// Begin playing `asset`
    fn play(&mut self, asset: AudioAsset) -> BoxFuture<'static, Result<()>>;

    /// Cut off the asset currently playing, if any
    fn stop(&mut self) {}
}

/// Plays audio to the default output device
pub struct SpeakerPlayer {
    cancel: Arc<AtomicBool>,
}

impl SpeakerPlayer {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self {
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Play raw mono f32 samples
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_samples(&mut self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        let cancel = self.fresh_cancel();
        tokio::task::spawn_blocking(move || play_samples_blocking(samples, sample_rate, &cancel))
            .await
            .map_err(|e| Error::Playback(e.to_string()))?
    }

    fn fresh_cancel(&mut self) -> Arc<AtomicBool> {
        self.cancel = Arc::new(AtomicBool::new(false));
        Arc::clone(&self.cancel)
    }
}

impl Player for SpeakerPlayer {
    fn play(&mut self, asset: AudioAsset) -> BoxFuture<'static, Result<()>> {
        let cancel = self.fresh_cancel();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let (samples, sample_rate) = decode_asset(&asset)?;
                play_samples_blocking(samples, sample_rate, &cancel)
            })
            .await
            .map_err(|e| Error::Playback(e.to_string()))?
        })
    }

    fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// Decode an asset to mono f32 samples and their rate
///
/// # Errors
///
/// Returns error if the asset is neither WAV nor MP3, or holds no audio
pub fn decode_asset(asset: &AudioAsset) -> Result<(Vec<f32>, u32)> {
    let (samples, sample_rate) = match asset.kind() {
        AssetKind::Wav => {
            let (format, interleaved) =
                decode_wav(asset.as_bytes()).map_err(|e| Error::Playback(e.to_string()))?;
            let channels = usize::from(format.channels.max(1));
            let mono = interleaved
                .chunks(channels)
                .map(|frame| {
                    #[allow(clippy::cast_precision_loss)]
                    let n = frame.len() as f32;
                    frame.iter().sum::<f32>() / n
                })
                .collect();
            (mono, format.sample_rate)
        }
        AssetKind::Mp3 => decode_mp3(asset.as_bytes())?,
    };

    if samples.is_empty() {
        return Err(Error::Playback("asset contains no audio".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Decode MP3 bytes to mono f32 samples
#[allow(clippy::cast_sign_loss)]
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;

                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Pick an output config for `sample_rate`, falling back to the device default
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let supports = |channels: u16| {
        move |c: &cpal::SupportedStreamConfigRange| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        }
    };

    let exact = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .find(supports(1))
        .or_else(|| device.supported_output_configs().ok()?.find(supports(2)));

    match exact {
        Some(range) => Ok(range.with_sample_rate(SampleRate(sample_rate)).config()),
        None => Ok(device
            .default_output_config()
            .map_err(|e| Error::Playback(e.to_string()))?
            .config()),
    }
}

/// Play samples, returning once they have drained or `cancel` is set
fn play_samples_blocking(samples: Vec<f32>, sample_rate: u32, cancel: &AtomicBool) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device".to_string()))?;

    let config = output_config(&device, sample_rate)?;
    let device_rate = config.sample_rate.0;
    let samples = if device_rate == sample_rate {
        samples
    } else {
        tracing::debug!(from = sample_rate, to = device_rate, "resampling for output device");
        resample(&samples, sample_rate, device_rate)?
    };

    let channels = usize::from(config.channels);
    let sample_count = samples.len();
    let finished = Arc::new(AtomicBool::new(false));
    let finished_cb = Arc::clone(&finished);
    let period_frames = Arc::new(AtomicUsize::new(0));
    let period_frames_cb = Arc::clone(&period_frames);
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                period_frames_cb.store(data.len() / channels.max(1), Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(position).copied().unwrap_or_else(|| {
                        finished_cb.store(true, Ordering::Relaxed);
                        0.0
                    });
                    frame.fill(sample);
                    position = (position + 1).min(sample_count);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(device_rate.max(1));
    let timeout = Duration::from_millis(duration_ms) + DRAIN_TIMEOUT_SLACK;
    let start = Instant::now();

    while !finished.load(Ordering::Relaxed) {
        if cancel.load(Ordering::Relaxed) {
            tracing::debug!("playback stopped");
            drop(stream);
            return Ok(());
        }
        if start.elapsed() > timeout {
            tracing::warn!(samples = sample_count, "playback did not drain in time");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    // The last written buffers are still queued in the device
    let drain = drain_duration(period_frames.load(Ordering::Relaxed), device_rate);
    let drain_start = Instant::now();
    while drain_start.elapsed() < drain && !cancel.load(Ordering::Relaxed) {
        std::thread::sleep(POLL_INTERVAL.min(drain.saturating_sub(drain_start.elapsed())));
    }

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// How long to keep an output stream open after its final callback
///
/// Two callback periods cover the buffer being played and the one just
/// written, never less than [`MIN_DRAIN`].
fn drain_duration(period_frames: usize, device_rate: u32) -> Duration {
    let period_ms = (period_frames as u64 * 2 * 1000).div_ceil(u64::from(device_rate.max(1)));
    MIN_DRAIN.max(Duration::from_millis(period_ms))
}

/// Resample mono audio using rubato
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Playback(format!("resampler init failed: {e}")))?;

    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate.max(1) as usize);

    for chunk in samples.chunks(chunk_size) {
        // zero-pad the tail so the last partial chunk is not lost
        let mut block: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        block.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Playback(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}
