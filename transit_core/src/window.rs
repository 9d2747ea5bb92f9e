//! Bounded sliding windows of timestamped samples.
//!
//! Windows are trimmed by insertion order: once full, the earliest-inserted
//! sample is evicted even when a later insert carries an older timestamp.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One timestamped integer sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch milliseconds
    pub time: i64,
    pub value: i64,
}

/// Insertion-ordered buffer holding at most `capacity` samples.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Appends a sample, then evicts earliest-inserted samples down to capacity.
    pub fn record(&mut self, time: i64, value: i64) {
        self.samples.push_back(Sample { time, value });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn values(&self) -> Vec<i64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }
}

/// What a single [`KinematicsTracker::record`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceleration {
    /// First report for this vehicle, nothing to derive from
    FirstReport,
    /// Zero elapsed time since the last report; sample skipped
    ZeroElapsed,
    /// New acceleration sample recorded
    Recorded(i64),
}

/// Speed and acceleration windows for one vehicle.
///
/// Acceleration is `(new − old) / (time − lastReportedTime) × scale`, rounded,
/// with the time delta in milliseconds. With the default scale of 3600 the
/// result is not a unit-consistent per-hour figure.
#[derive(Debug, Clone)]
pub struct KinematicsTracker {
    speeds: SlidingWindow,
    accelerations: SlidingWindow,
    last_reported_time: Option<i64>,
    scale: f64,
}

impl KinematicsTracker {
    pub fn new(capacity: usize, scale: f64) -> Self {
        Self {
            speeds: SlidingWindow::new(capacity),
            accelerations: SlidingWindow::new(capacity),
            last_reported_time: None,
            scale,
        }
    }

    /// Records a speed report.
    ///
    /// `previous_speed` is the vehicle's last stored speed, not the previous
    /// window entry (the two differ once the window has evicted).
    pub fn record(&mut self, time: i64, speed: i64, previous_speed: Option<i64>) -> Acceleration {
        self.speeds.record(time, speed);

        let outcome = match (self.last_reported_time, previous_speed) {
            (Some(last), Some(_)) if time == last => Acceleration::ZeroElapsed,
            (Some(last), Some(old)) => {
                let elapsed = (time - last) as f64;
                let acceleration = ((speed - old) as f64 / elapsed * self.scale).round() as i64;
                self.accelerations.record(time, acceleration);
                Acceleration::Recorded(acceleration)
            }
            _ => Acceleration::FirstReport,
        };

        self.last_reported_time = Some(time);
        outcome
    }

    pub fn speeds(&self) -> &SlidingWindow {
        &self.speeds
    }

    pub fn accelerations(&self) -> &SlidingWindow {
        &self.accelerations
    }

    pub fn last_reported_time(&self) -> Option<i64> {
        self.last_reported_time
    }
}
