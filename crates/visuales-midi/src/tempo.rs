//! Tempo estimate from note-on timing
//!
//! Tapping pads in time gives a rough BPM for beat-synced visuals. The
//! estimate averages the last few intervals between presses.

use std::collections::VecDeque;
use std::time::Instant;

/// Intervals kept in the rolling average
const WINDOW: usize = 8;

/// Intervals needed before reporting anything
const MIN_INTERVALS: usize = 2;

/// Estimates outside this range are discarded
const MIN_BPM: f64 = 40.0;
const MAX_BPM: f64 = 200.0;

#[derive(Debug, Clone, Default)]
pub struct TempoTracker {
    last_press: Option<Instant>,
    intervals: VecDeque<f64>,
    bpm: Option<f64>,
}

impl TempoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last accepted estimate
    pub fn bpm(&self) -> Option<f64> {
        self.bpm
    }

    /// Record a note-on press, returning a new estimate if one is in range
    pub fn on_press(&mut self, now: Instant) -> Option<f64> {
        let last = self.last_press.replace(now)?;
        let interval = now.saturating_duration_since(last).as_secs_f64();
        if interval <= 0.0 {
            return None;
        }

        if self.intervals.len() == WINDOW {
            self.intervals.pop_front();
        }
        self.intervals.push_back(interval);
        if self.intervals.len() < MIN_INTERVALS {
            return None;
        }

        let avg = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        let bpm = 60.0 / avg;
        if (MIN_BPM..=MAX_BPM).contains(&bpm) {
            log::trace!("MIDI: Tempo estimate {:.1} BPM", bpm);
            self.bpm = Some(bpm);
            Some(bpm)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
