//! Actual-vs-nominal sample rate estimation.
//!
//! Hardware clocks drift from their nominal rate. The estimator runs a
//! least-squares regression from wall-clock time to frames consumed,
//! observed at each hardware buffer-level check, and blends each window's
//! slope into a smoothed estimate. The mixer consumes the ratio to stretch
//! or compress stream audio.

use tokio::time::{Duration, Instant};

/// Default regression window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Default blend weight of a new window's slope.
pub const DEFAULT_SMOOTH_FACTOR: f64 = 0.9;

/// Running estimate of a device's true frame rate.
#[derive(Debug)]
pub struct RateEstimator {
    window: Duration,
    smooth_factor: f64,
    nominal_rate: f64,
    estimated_rate: f64,
    window_start: Option<Instant>,
    last_level: u64,
    pending_frames: u64,
    consumed: f64,
    sum_t: f64,
    sum_f: f64,
    sum_tf: f64,
    sum_tt: f64,
    samples: f64,
}

impl RateEstimator {
    /// Creates an estimator for a device claiming `nominal_rate`.
    pub fn new(nominal_rate: u32, window: Duration, smooth_factor: f64) -> Self {
        Self {
            window,
            smooth_factor,
            nominal_rate: f64::from(nominal_rate),
            estimated_rate: f64::from(nominal_rate),
            window_start: None,
            last_level: 0,
            pending_frames: 0,
            consumed: 0.0,
            sum_t: 0.0,
            sum_f: 0.0,
            sum_tf: 0.0,
            sum_tt: 0.0,
            samples: 0.0,
        }
    }

    /// Resets the estimate to a new nominal rate. Called whenever the
    /// device opens or its format changes.
    pub fn reset(&mut self, nominal_rate: u32) {
        *self = Self::new(nominal_rate, self.window, self.smooth_factor);
    }

    /// Records frames moved to or from the hardware buffer.
    pub fn add_frames(&mut self, frames: u64) {
        self.pending_frames += frames;
    }

    /// Feeds one hardware buffer-level observation.
    ///
    /// Returns true when a full window elapsed and the estimate was
    /// re-blended.
    pub fn update(&mut self, level: u64, now: Instant) -> bool {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            self.last_level = level;
            self.pending_frames = 0;
            return false;
        };

        // Frames the hardware consumed since the previous observation.
        let moved = self.pending_frames as i64 + self.last_level as i64 - level as i64;
        self.pending_frames = 0;
        self.last_level = level;
        self.consumed += moved.max(0) as f64;

        let t = now.duration_since(start).as_secs_f64();
        self.sum_t += t;
        self.sum_f += self.consumed;
        self.sum_tf += t * self.consumed;
        self.sum_tt += t * t;
        self.samples += 1.0;

        if now.duration_since(start) < self.window || self.samples < 2.0 {
            return false;
        }

        let denom = self.samples * self.sum_tt - self.sum_t * self.sum_t;
        if denom > f64::EPSILON {
            let slope = (self.samples * self.sum_tf - self.sum_t * self.sum_f) / denom;
            if slope > 0.0 {
                self.estimated_rate =
                    slope * self.smooth_factor + self.estimated_rate * (1.0 - self.smooth_factor);
            }
        }

        self.window_start = Some(now);
        self.consumed = 0.0;
        self.sum_t = 0.0;
        self.sum_f = 0.0;
        self.sum_tf = 0.0;
        self.sum_tt = 0.0;
        self.samples = 0.0;
        true
    }

    /// Ratio of the estimated rate to the nominal rate.
    pub fn ratio(&self) -> f64 {
        self.estimated_rate / self.nominal_rate
    }

    /// The current rate estimate in frames per second.
    pub fn estimated_rate(&self) -> f64 {
        self.estimated_rate
    }
}
