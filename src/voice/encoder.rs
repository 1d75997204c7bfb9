//! Utterance encoding
//!
//! Finished utterances travel as canonical uncompressed WAV: RIFF header,
//! 16-byte `fmt ` chunk (PCM, mono, 16-bit) and little-endian samples.

use std::io::Cursor;

use crate::{Error, Result};

/// Default capture and encoding sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Full-scale value of a 16-bit sample
const FULL_SCALE: f32 = 32767.0;

/// Quantize a float sample to 16-bit PCM
///
/// Values outside `[-1.0, 1.0]` are clamped, not rejected.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * FULL_SCALE).round() as i16
}

/// Format described by a WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// An encoded utterance, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavContainer {
    bytes: Vec<u8>,
    sample_rate: u32,
    sample_count: usize,
}

impl WavContainer {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Length of the encoded audio in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.sample_count as u64 * 1000) / u64::from(self.sample_rate)
    }
}

/// Encode f32 samples as a mono 16-bit WAV container
///
/// # Errors
///
/// Returns error if the sample rate is zero or WAV encoding fails
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<WavContainer> {
    if sample_rate == 0 {
        return Err(Error::Audio("sample rate must be positive".to_string()));
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;

        for &sample in samples {
            writer.write_sample(quantize(sample))?;
        }

        writer.finalize()?;
    }

    Ok(WavContainer {
        bytes: cursor.into_inner(),
        sample_rate,
        sample_count: samples.len(),
    })
}

/// Read a 16-bit PCM WAV container back into f32 samples
///
/// Multi-channel files keep their interleaving.
///
/// # Errors
///
/// Returns error if the bytes are not a 16-bit integer WAV file
pub fn decode_wav(bytes: &[u8]) -> Result<(WavFormat, Vec<f32>)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(Error::Audio(format!(
            "unsupported wav format: {:?} {} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }

    let samples = reader
        .samples::<i16>()
        .map(|s| s.map(|v| f32::from(v) / FULL_SCALE))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((
        WavFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
        },
        samples,
    ))
}
