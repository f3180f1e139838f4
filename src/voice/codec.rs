//! PCM frame encoding between f32 samples and the base64 wire format
//!
//! Wire audio is 16-bit signed little-endian PCM, base64 encoded with the
//! standard alphabet and padding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// Scale between f32 samples and 16-bit PCM
const PCM16_SCALE: f32 = 32768.0;

/// Decoded audio with one sample vector per channel
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Create a single-channel buffer
    #[must_use]
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples for one channel
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Number of sample frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Playback length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Average all channels into one
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.as_slice() {
            [] => Vec::new(),
            [only] => only.clone(),
            many => {
                let count = many.len() as f32;
                (0..self.frames())
                    .map(|i| many.iter().map(|c| c[i]).sum::<f32>() / count)
                    .collect()
            }
        }
    }
}

/// Convert f32 samples to 16-bit little-endian PCM bytes
///
/// Each sample is scaled by 32768 and truncated toward zero; values at or
/// beyond full scale saturate at the `i16` bounds.
#[must_use]
pub fn encode_pcm16(frame: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &sample in frame {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * PCM16_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Encode f32 samples as base64 PCM16LE
#[must_use]
pub fn encode(frame: &[f32]) -> String {
    BASE64.encode(encode_pcm16(frame))
}

/// Interpret PCM16LE bytes as interleaved audio
///
/// A trailing partial frame is dropped.
///
/// # Errors
///
/// Returns error if `channels` is zero
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    if channels == 0 {
        return Err(Error::Decode("channel count must be at least 1".to_string()));
    }

    let channel_count = usize::from(channels);
    let frame_bytes = 2 * channel_count;
    let frame_count = bytes.len() / frame_bytes;

    let mut out = vec![Vec::with_capacity(frame_count); channel_count];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (channel, sample) in frame.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            out[channel].push(f32::from(value) / PCM16_SCALE);
        }
    }

    Ok(AudioBuffer {
        sample_rate,
        channels: out,
    })
}

/// Decode base64 PCM16LE into an audio buffer
///
/// # Errors
///
/// Returns `Error::Decode` if the payload is not valid base64 or `channels`
/// is zero
pub fn decode(data: &str, sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| Error::Decode(format!("invalid base64 audio: {e}")))?;
    decode_pcm16(&bytes, sample_rate, channels)
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let value = (sample * PCM16_SCALE) as i16;
            writer
                .write_sample(value)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
