//! Sample rate conversion for devices that cannot run at the wire rates

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input chunk size handed to the FFT resampler
const CHUNK_FRAMES: usize = 1024;

fn new_resampler(from: u32, to: u32) -> Result<FftFixedIn<f32>> {
    FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK_FRAMES, 2, 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))
}

/// Resample a complete mono buffer
///
/// # Errors
///
/// Returns error if the resampler cannot be built for the given rates
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = new_resampler(from, to)?;
    let delay = resampler.output_delay();
    let expected = samples.len() * to as usize / from as usize;
    let mut out = Vec::with_capacity(expected + delay);

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let take = resampler.input_frames_next();
        let chunk = resampler
            .process(&[&samples[pos..pos + take]], None)
            .map_err(|e| Error::Audio(e.to_string()))?;
        out.extend_from_slice(&chunk[0]);
        pos += take;
    }

    if pos < samples.len() {
        let chunk = resampler
            .process_partial(Some(&[&samples[pos..]]), None)
            .map_err(|e| Error::Audio(e.to_string()))?;
        out.extend_from_slice(&chunk[0]);
    }

    // flush the filter tail so the delayed output is complete
    while out.len() < expected + delay {
        let chunk = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| Error::Audio(e.to_string()))?;
        if chunk[0].is_empty() {
            break;
        }
        out.extend_from_slice(&chunk[0]);
    }

    Ok(out.into_iter().skip(delay).take(expected).collect())
}

/// Incremental mono resampler for live capture
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a resampler; identical rates pass samples through untouched
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built for the given rates
    pub fn new(from: u32, to: u32) -> Result<Self> {
        let inner = if from == to {
            None
        } else {
            Some(new_resampler(from, to)?)
        };

        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Feed samples and return whatever output is ready
    pub fn push(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return input.to_vec();
        };

        self.pending.extend_from_slice(input);
        let mut out = Vec::new();

        while self.pending.len() >= resampler.input_frames_next() {
            let take = resampler.input_frames_next();
            match resampler.process(&[&self.pending[..take]], None) {
                Ok(chunk) => out.extend_from_slice(&chunk[0]),
                Err(e) => tracing::warn!(error = %e, "dropping audio the resampler rejected"),
            }
            self.pending.drain(..take);
        }

        out
    }
}
