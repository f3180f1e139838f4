//! Audio output to speakers
//!
//! Scheduled buffers are mixed inside the cpal output callback. The output
//! clock is the number of frames the device has consumed, so start times
//! handed out by the scheduler line up with what is actually heard.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};

use super::codec::AudioBuffer;
use super::resample;
use super::scheduler::{PlaybackId, PlaybackOutput};
use crate::{Error, Result};

/// Sample rate of assistant speech
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Called from the audio thread when a buffer plays to its end
pub type EndedCallback = Arc<dyn Fn(PlaybackId) + Send + Sync>;

/// Output hardware that can be opened for scheduled playback
pub trait PlaybackDevice {
    type Output: PlaybackOutput;

    /// Open the output; `on_ended` fires once per naturally finished buffer
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if no usable output exists
    fn open(&self, on_ended: EndedCallback) -> Result<Self::Output>;
}

struct Voice {
    id: PlaybackId,
    samples: Vec<f32>,
    start_frame: u64,
    position: usize,
}

/// Sums scheduled voices into device frames
#[derive(Default)]
pub struct Mixer {
    voices: Vec<Voice>,
    rendered: u64,
}

impl Mixer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue mono samples to begin at an absolute device frame
    pub fn add(&mut self, id: PlaybackId, samples: Vec<f32>, start_frame: u64) {
        self.voices.push(Voice {
            id,
            samples,
            start_frame,
            position: 0,
        });
    }

    /// Drop a voice without reporting it as finished
    pub fn stop(&mut self, id: PlaybackId) {
        self.voices.retain(|v| v.id != id);
    }

    /// Fill an interleaved output block, returning voices that finished in it
    pub fn render(&mut self, out: &mut [f32], channels: usize) -> Vec<PlaybackId> {
        let channels = channels.max(1);
        let mut now = self.rendered;

        for frame in out.chunks_mut(channels) {
            let mut mixed = 0.0_f32;
            for voice in &mut self.voices {
                if voice.start_frame <= now && voice.position < voice.samples.len() {
                    mixed += voice.samples[voice.position];
                    voice.position += 1;
                }
            }
            frame.fill(mixed.clamp(-1.0, 1.0));
            now += 1;
        }
        self.rendered = now;

        let mut finished = Vec::new();
        self.voices.retain(|v| {
            let done = v.start_frame <= now && v.position >= v.samples.len();
            if done {
                finished.push(v.id);
            }
            !done
        });
        finished
    }

    /// Frames rendered since the output opened
    #[must_use]
    pub const fn rendered(&self) -> u64 {
        self.rendered
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.voices.len()
    }
}

/// Default output device through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalPlayback;

impl CpalPlayback {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Prefer 24kHz mono, then 24kHz stereo, else the device default
    fn select_config(device: &cpal::Device) -> Result<StreamConfig> {
        let at_rate = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        };

        if let Some(supported) = at_rate(1).or_else(|| at_rate(2)) {
            return Ok(supported
                .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
                .config());
        }

        let fallback = device
            .default_output_config()
            .map_err(|e| Error::DeviceUnavailable(format!("no usable output config: {e}")))?;
        if fallback.sample_format() != SampleFormat::F32 {
            return Err(Error::DeviceUnavailable(format!(
                "unsupported output sample format {:?}",
                fallback.sample_format()
            )));
        }
        Ok(fallback.config())
    }
}

impl PlaybackDevice for CpalPlayback {
    type Output = CpalOutput;

    fn open(&self, on_ended: EndedCallback) -> Result<CpalOutput> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

        let config = Self::select_config(&device)?;
        let channels = usize::from(config.channels);
        let mixer = Arc::new(Mutex::new(Mixer::new()));
        let clock = Arc::new(AtomicU64::new(0));

        let stream = {
            let mixer = Arc::clone(&mixer);
            let clock = Arc::clone(&clock);
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let Ok(mut mixer) = mixer.lock() else {
                            data.fill(0.0);
                            return;
                        };
                        let finished = mixer.render(data, channels);
                        clock.store(mixer.rendered(), Ordering::Release);
                        drop(mixer);

                        for id in finished {
                            on_ended(id);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::DeviceUnavailable(format!("cannot open output stream: {e}")))?
        };

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(format!("cannot start output stream: {e}")))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback opened"
        );

        Ok(CpalOutput {
            stream: Some(stream),
            mixer,
            clock,
            device_rate: config.sample_rate.0,
        })
    }
}

/// Open cpal output stream with its mixer
pub struct CpalOutput {
    stream: Option<Stream>,
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    device_rate: u32,
}

impl PlaybackOutput for CpalOutput {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / f64::from(self.device_rate)
    }

    fn start(&mut self, id: PlaybackId, buffer: &AudioBuffer, at: f64) {
        let samples = match resample::resample(
            &buffer.to_mono(),
            buffer.sample_rate(),
            self.device_rate,
        ) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(error = %e, "resampling playback buffer failed");
                Vec::new()
            }
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_frame = (at * f64::from(self.device_rate)).round().max(0.0) as u64;

        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.add(id, samples, start_frame);
        }
    }

    fn stop(&mut self, id: PlaybackId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop(id);
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio playback closed");
        }
    }
}
