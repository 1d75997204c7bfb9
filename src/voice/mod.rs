//! Voice processing module
//!
//! Handles microphone capture, block analysis, utterance segmentation,
//! WAV encoding and playback of synthesized responses.

pub mod analyzer;
mod capture;
pub mod encoder;
mod playback;
pub mod segmenter;

pub use analyzer::{
    AnalyzedBlock, BlockAssembler, BlockClass, CaptureEvent, EnergyMeasure, FrameAnalyzer,
    Handoff, classify, handoff, peak, rms,
};
pub use capture::{CaptureSource, MicrophoneCapture};
pub use encoder::{DEFAULT_SAMPLE_RATE, WavContainer, WavFormat, decode_wav, encode_wav, quantize};
pub use playback::{AssetKind, AudioAsset, Player, SpeakerPlayer, decode_asset};
pub use segmenter::{SegmenterState, Segmenter, SilenceCutoffPolicy, Utterance};
