//! Microphone capture as a stream of fixed-size mono frames

use std::fmt::Display;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

use super::resample::StreamResampler;
use crate::{Error, Result};

/// Sample rate of every capture frame (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Samples per capture frame
pub const FRAME_SIZE: usize = 4096;

/// One block of `FRAME_SIZE` mono samples at `CAPTURE_SAMPLE_RATE`
pub type CaptureFrame = Vec<f32>;

/// Receives completed frames, called from the audio thread
pub type FrameCallback = Box<dyn FnMut(CaptureFrame) + Send>;

/// A microphone that can be opened for streaming capture
#[async_trait(?Send)]
pub trait CaptureDevice {
    type Handle: CaptureHandle;

    /// Open the device and start delivering frames to `on_frame`
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` if access is refused and
    /// `Error::DeviceUnavailable` if no usable input exists
    async fn acquire(&self, on_frame: FrameCallback) -> Result<Self::Handle>;
}

/// Live capture owned by a session
pub trait CaptureHandle {
    /// Stop capturing; calling again is a no-op
    fn release(&mut self);

    fn is_live(&self) -> bool;
}

/// Cuts an arbitrary sample stream into `FRAME_SIZE` blocks
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: Vec<f32>,
}

impl FrameAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(FRAME_SIZE),
        }
    }

    /// Append samples, emitting each block as soon as it is complete
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(CaptureFrame)) {
        while !samples.is_empty() {
            let room = FRAME_SIZE - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == FRAME_SIZE {
                emit(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(FRAME_SIZE),
                ));
            }
        }
    }

    /// Samples held for the next frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Average interleaved frames down to one channel
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Map a backend failure to the session-level error kind
fn device_error(context: &str, err: impl Display) -> Error {
    let message = format!("{context}: {err}");
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted")
    {
        Error::PermissionDenied(message)
    } else {
        Error::DeviceUnavailable(message)
    }
}

/// Default input device through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCapture;

impl CpalCapture {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Pick a native 16kHz mono config, else the device default
    fn select_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat)> {
        let native = device
            .supported_input_configs()
            .map_err(|e| device_error("cannot query input configs", e))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
            });

        if let Some(supported) = native {
            let supported = supported.with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE));
            return Ok((supported.config(), supported.sample_format()));
        }

        let fallback = device
            .default_input_config()
            .map_err(|e| device_error("no usable input config", e))?;
        Ok((fallback.config(), fallback.sample_format()))
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut on_frame: FrameCallback,
    ) -> Result<Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let channels = usize::from(config.channels);
        let mut resampler = StreamResampler::new(config.sample_rate.0, CAPTURE_SAMPLE_RATE)?;
        let mut assembler = FrameAssembler::new();

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                    let mono = resampler.push(&downmix(&samples, channels));
                    assembler.push(&mono, &mut on_frame);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| device_error("cannot open input stream", e))
    }
}

#[async_trait(?Send)]
impl CaptureDevice for CpalCapture {
    type Handle = CpalCaptureHandle;

    /// Device lookup and stream setup run inline on the calling task, so
    /// a slow backend blocks the session loop until it returns
    async fn acquire(&self, on_frame: FrameCallback) -> Result<CpalCaptureHandle> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let (config, format) = Self::select_config(&device)?;

        let stream = match format {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, on_frame)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, on_frame)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, on_frame)?,
            SampleFormat::I32 => Self::build_stream::<i32>(&device, &config, on_frame)?,
            other => {
                return Err(Error::DeviceUnavailable(format!(
                    "unsupported input sample format {other:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| device_error("cannot start input stream", e))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            channels = config.channels,
            frame_size = FRAME_SIZE,
            "audio capture started"
        );

        Ok(CpalCaptureHandle {
            stream: Some(stream),
        })
    }
}

/// Running cpal input stream; released on drop
pub struct CpalCaptureHandle {
    stream: Option<Stream>,
}

impl CaptureHandle for CpalCaptureHandle {
    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "pausing input stream failed");
            }
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalCaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}
