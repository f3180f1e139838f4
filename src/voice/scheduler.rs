//! Gapless playback scheduling against a monotonic output clock
//!
//! Each buffer starts at `max(cursor, now)` and the cursor advances by the
//! buffer's duration at schedule time, so buffers arriving in bursts play back
//! to back and a late buffer starts immediately instead of overlapping.

use std::collections::BTreeMap;

use super::codec::AudioBuffer;

/// Handle for one scheduled buffer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaybackId(u64);

impl PlaybackId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Audio output with its own clock
///
/// Implementations report natural completion of a started buffer
/// out of band (the cpal output posts an ended callback).
pub trait PlaybackOutput {
    /// Current output clock position in seconds
    fn now(&self) -> f64;

    /// Begin playing `buffer` at `at` seconds on the output clock
    fn start(&mut self, id: PlaybackId, buffer: &AudioBuffer, at: f64);

    /// Stop a buffer immediately
    ///
    /// Must tolerate ids that already finished.
    fn stop(&mut self, id: PlaybackId);
}

/// A buffer registered in the in-flight table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub id: PlaybackId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledPlayback {
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Schedules decoded audio for sequential playback and tracks what is in
/// flight for bulk cancellation
pub struct PlaybackScheduler<O> {
    output: O,
    in_flight: BTreeMap<PlaybackId, ScheduledPlayback>,
    next_id: u64,
    cursor: f64,
}

impl<O: PlaybackOutput> PlaybackScheduler<O> {
    #[must_use]
    pub const fn new(output: O) -> Self {
        Self {
            output,
            in_flight: BTreeMap::new(),
            next_id: 0,
            cursor: 0.0,
        }
    }

    /// Schedule a buffer right after everything already scheduled
    pub fn schedule(&mut self, buffer: &AudioBuffer) -> ScheduledPlayback {
        let start = self.cursor.max(self.output.now());
        let id = PlaybackId(self.next_id);
        self.next_id += 1;

        let scheduled = ScheduledPlayback {
            id,
            start,
            duration: buffer.duration(),
        };

        self.in_flight.insert(id, scheduled);
        self.output.start(id, buffer, start);
        self.cursor = scheduled.end();

        tracing::trace!(
            id = id.get(),
            start,
            duration = scheduled.duration,
            in_flight = self.in_flight.len(),
            "playback scheduled"
        );

        scheduled
    }

    /// Record natural completion of a buffer
    ///
    /// Returns true when this completion emptied the in-flight table.
    /// Unknown ids (already interrupted or reset) are ignored.
    pub fn complete(&mut self, id: PlaybackId) -> bool {
        if self.in_flight.remove(&id).is_none() {
            tracing::trace!(id = id.get(), "ignoring completion for stale playback");
            return false;
        }
        self.in_flight.is_empty()
    }

    /// Stop everything in flight and rewind the cursor
    pub fn interrupt(&mut self) {
        let stopped = self.in_flight.len();
        for id in std::mem::take(&mut self.in_flight).into_keys() {
            self.output.stop(id);
        }
        self.cursor = 0.0;

        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
    }

    /// Same as [`Self::interrupt`], used during session teardown
    pub fn reset(&mut self) {
        self.interrupt();
    }

    /// End of the last scheduled buffer on the output clock
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of buffers currently scheduled or playing
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.in_flight.is_empty()
    }

    #[must_use]
    pub const fn output(&self) -> &O {
        &self.output
    }

    pub const fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}
