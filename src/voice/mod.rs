//! Voice processing module
//!
//! Handles microphone capture, PCM frame encoding, and scheduled playback
//! of assistant speech.

mod capture;
pub mod codec;
mod playback;
mod resample;
pub mod scheduler;

pub use capture::{
    CAPTURE_SAMPLE_RATE, CaptureDevice, CaptureFrame, CaptureHandle, CpalCapture,
    CpalCaptureHandle, FRAME_SIZE, FrameAssembler, FrameCallback, downmix,
};
pub use codec::{AudioBuffer, samples_to_wav};
pub use playback::{
    CpalOutput, CpalPlayback, EndedCallback, Mixer, PLAYBACK_SAMPLE_RATE, PlaybackDevice,
};
pub use resample::{StreamResampler, resample};
pub use scheduler::{PlaybackId, PlaybackOutput, PlaybackScheduler, ScheduledPlayback};
