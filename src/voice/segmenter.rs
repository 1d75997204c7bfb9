//! Utterance segmentation
//!
//! Accumulates analyzed blocks into one utterance and decides where it ends.
//! An utterance starts at the first voiced block and ends once trailing
//! silence has lasted for the configured cutoff. Silent blocks inside the
//! grace period stay part of the recording.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::analyzer::BlockClass;

/// Consecutive silent blocks that end an utterance
pub const DEFAULT_SILENCE_FRAMES: u32 = 15;

/// Silence duration that ends an utterance
pub const DEFAULT_SILENCE_DURATION: Duration = Duration::from_millis(1000);

/// When trailing silence is long enough to end an utterance
///
/// Elapsed silence is measured from the first silent block, which itself
/// counts as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SilenceCutoffPolicy {
    /// Blocks since silence began
    #[serde(rename = "frames")]
    FrameCount(u32),
    /// Wall-clock time since silence began, in milliseconds on disk
    #[serde(rename = "millis")]
    Duration(#[serde(with = "millis")] Duration),
}

impl Default for SilenceCutoffPolicy {
    fn default() -> Self {
        Self::FrameCount(DEFAULT_SILENCE_FRAMES)
    }
}

impl SilenceCutoffPolicy {
    fn is_exceeded(self, since: SilenceMark, block_index: u64, now: Instant) -> bool {
        match self {
            Self::FrameCount(limit) => block_index - since.block_index >= u64::from(limit),
            Self::Duration(limit) => now.saturating_duration_since(since.at) >= limit,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No speech observed yet
    Idle,
    /// Inside an utterance (speech or grace-period silence)
    Accumulating,
    /// Cutoff reached, utterance being handed off
    Finalizing,
}

/// Where continuous silence began
#[derive(Debug, Clone, Copy)]
struct SilenceMark {
    block_index: u64,
    at: Instant,
}

/// A finished utterance
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub samples: Vec<f32>,
    /// Number of blocks that made up the utterance
    pub blocks: usize,
}

/// Splits a stream of analyzed blocks into utterances
#[derive(Debug)]
pub struct Segmenter {
    policy: SilenceCutoffPolicy,
    state: SegmenterState,
    buffer: Vec<f32>,
    blocks: usize,
    silence_since: Option<SilenceMark>,
    block_index: u64,
}

impl Segmenter {
    #[must_use]
    pub const fn new(policy: SilenceCutoffPolicy) -> Self {
        Self {
            policy,
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            blocks: 0,
            silence_since: None,
            block_index: 0,
        }
    }

    /// Feed one classified block
    ///
    /// Returns the finished utterance when this block confirmed the end of
    /// speech. The segmenter is back in `Idle` afterwards.
    pub fn feed(&mut self, samples: &[f32], class: BlockClass, now: Instant) -> Option<Utterance> {
        self.block_index += 1;

        match (self.state, class) {
            (SegmenterState::Idle, BlockClass::Silent) => None,
            (SegmenterState::Idle, BlockClass::Voiced) => {
                self.state = SegmenterState::Accumulating;
                self.buffer.clear();
                self.blocks = 0;
                self.append(samples);
                self.silence_since = None;
                tracing::trace!("speech started");
                None
            }
            (SegmenterState::Accumulating, BlockClass::Voiced) => {
                self.append(samples);
                self.silence_since = None;
                None
            }
            (SegmenterState::Accumulating, BlockClass::Silent) => {
                self.append(samples);

                match self.silence_since {
                    None => {
                        self.silence_since = Some(SilenceMark {
                            block_index: self.block_index,
                            at: now,
                        });
                        None
                    }
                    Some(since) if self.policy.is_exceeded(since, self.block_index, now) => {
                        self.state = SegmenterState::Finalizing;
                        Some(self.finalize())
                    }
                    Some(_) => None,
                }
            }
            // finalize() always leaves Finalizing before returning
            (SegmenterState::Finalizing, _) => None,
        }
    }

    fn append(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
        self.blocks += 1;
    }

    fn finalize(&mut self) -> Utterance {
        let utterance = Utterance {
            samples: std::mem::take(&mut self.buffer),
            blocks: std::mem::take(&mut self.blocks),
        };
        self.silence_since = None;
        self.state = SegmenterState::Idle;

        tracing::debug!(
            samples = utterance.samples.len(),
            blocks = utterance.blocks,
            "utterance complete"
        );

        utterance
    }

    /// Drop a partial utterance without emitting it
    ///
    /// Used when capture stops mid-utterance.
    pub fn discard(&mut self) {
        if self.state == SegmenterState::Accumulating {
            tracing::debug!(samples = self.buffer.len(), "discarding partial utterance");
        }
        self.buffer.clear();
        self.blocks = 0;
        self.silence_since = None;
        self.state = SegmenterState::Idle;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Samples accumulated for the open utterance
    #[must_use]
    pub fn buffered(&self) -> &[f32] {
        &self.buffer
    }
}
