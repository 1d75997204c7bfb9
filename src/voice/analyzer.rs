//! PCM frame analysis
//!
//! Runs inside the real-time capture callback. Each fixed-size block is
//! measured, classified as voiced or silent and handed to the session task
//! through a bounded channel. Nothing here blocks, performs I/O or panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Energy above which a block counts as speech
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.01;

/// Samples per analyzed block
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Blocks buffered between the capture thread and the session task
pub const DEFAULT_HANDOFF_CAPACITY: usize = 64;

/// How the energy of a block is measured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyMeasure {
    /// Root mean square of the samples
    #[default]
    Rms,
    /// Largest absolute sample value
    Peak,
}

impl EnergyMeasure {
    /// Measure the energy of a block
    #[must_use]
    pub fn measure(self, samples: &[f32]) -> f32 {
        match self {
            Self::Rms => rms(samples),
            Self::Peak => peak(samples),
        }
    }
}

impl std::str::FromStr for EnergyMeasure {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rms" => Ok(Self::Rms),
            "peak" => Ok(Self::Peak),
            other => Err(crate::Error::Config(format!(
                "unknown energy measure: {other}"
            ))),
        }
    }
}

/// Voiced/silent classification of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    /// Energy above the silence threshold
    Voiced,
    /// Energy at or below the silence threshold
    Silent,
}

impl BlockClass {
    #[must_use]
    pub const fn is_voiced(self) -> bool {
        matches!(self, Self::Voiced)
    }
}

/// A block together with its classification
#[derive(Debug, Clone)]
pub struct AnalyzedBlock {
    pub samples: Vec<f32>,
    pub class: BlockClass,
    pub energy: f32,
    /// When the capture callback completed the block
    pub captured_at: Instant,
}

/// Messages posted from the capture thread
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// One analyzed block
    Block(AnalyzedBlock),
    /// Error raised by the audio driver
    Fault(String),
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Largest absolute sample value, `0.0` for an empty block
#[must_use]
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0, f32::max)
}

/// Classify an energy level against the silence threshold
#[must_use]
pub fn classify(energy: f32, threshold: f32) -> BlockClass {
    if energy > threshold {
        BlockClass::Voiced
    } else {
        BlockClass::Silent
    }
}

/// Producer half of the capture handoff, owned by the capture callback
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    measure: EnergyMeasure,
    threshold: f32,
    tx: mpsc::Sender<CaptureEvent>,
    dropped: Arc<AtomicU64>,
}

/// Consumer half of the capture handoff, owned by the session
#[derive(Debug)]
pub struct Handoff {
    rx: mpsc::Receiver<CaptureEvent>,
    dropped: Arc<AtomicU64>,
}

/// Create a connected analyzer/handoff pair
///
/// A fresh pair is created every time capture is armed, so blocks left
/// over from a previous turn can never reach the session.
#[must_use]
pub fn handoff(capacity: usize, measure: EnergyMeasure, threshold: f32) -> (FrameAnalyzer, Handoff) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    (
        FrameAnalyzer {
            measure,
            threshold,
            tx,
            dropped: Arc::clone(&dropped),
        },
        Handoff { rx, dropped },
    )
}

impl FrameAnalyzer {
    /// Analyze one block and hand it off
    ///
    /// When the session lags and the channel is full the block is dropped
    /// and counted instead of blocking the audio thread.
    pub fn analyze(&self, samples: &[f32]) {
        let captured_at = Instant::now();
        let energy = self.measure.measure(samples);
        let class = classify(energy, self.threshold);

        self.post(CaptureEvent::Block(AnalyzedBlock {
            samples: samples.to_vec(),
            class,
            energy,
            captured_at,
        }));
    }

    /// Report a driver error through the handoff channel
    pub fn report_fault(&self, message: String) {
        self.post(CaptureEvent::Fault(message));
    }

    /// Whether the session side has been dropped
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }

    fn post(&self, event: CaptureEvent) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Handoff {
    /// Wait for the next capture event
    ///
    /// Returns `None` once every producer is gone (the stream was closed).
    pub async fn recv(&mut self) -> Option<CaptureEvent> {
        self.rx.recv().await
    }

    /// Take a pending event without waiting
    pub fn try_recv(&mut self) -> Option<CaptureEvent> {
        self.rx.try_recv().ok()
    }

    /// Number of blocks dropped on overflow since the last call
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

/// Re-chunks driver buffers into fixed-size mono blocks
///
/// Drivers deliver whatever buffer size they like; the analyzer wants
/// exactly `block_size` samples. The block buffer is allocated once.
#[derive(Debug)]
pub struct BlockAssembler {
    block: Vec<f32>,
    block_size: usize,
    channels: usize,
}

impl BlockAssembler {
    #[must_use]
    pub fn new(block_size: usize, channels: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block: Vec::with_capacity(block_size),
            block_size,
            channels: channels.max(1),
        }
    }

    /// Push interleaved driver samples, calling `on_block` per full block
    ///
    /// Multi-channel input keeps only the first channel.
    pub fn push(&mut self, data: &[f32], mut on_block: impl FnMut(&[f32])) {
        for frame in data.chunks(self.channels) {
            self.block.push(frame[0]);

            if self.block.len() == self.block_size {
                on_block(&self.block);
                self.block.clear();
            }
        }
    }

    /// Samples waiting for the current block to fill
    #[must_use]
    pub fn pending(&self) -> usize {
        self.block.len()
    }
}
