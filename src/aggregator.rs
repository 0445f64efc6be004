// ShoulderLink - wearable posture feedback link
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.


//! Per-second feature extraction
//!
//! Folds the filtered stream into one scaled maximum per elapsed second.
//! Time comes from a [`Clock`] reading wrapping milliseconds, as a
//! microcontroller tick counter does.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Length of one aggregation period
pub const PERIOD_MS: i64 = 1000;

/// Millisecond time source
pub trait Clock {
    /// Milliseconds since an arbitrary origin, wrapping at `u32::MAX`
    fn now_ms(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Wall clock measured from creation
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation wraps exactly like the device counter.
        self.origin.elapsed().as_millis() as u32
    }
}

/// Hand-driven clock for simulation and tests.
///
/// Share it through an `Arc` to drive several components from one time base.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: AtomicU32::new(start_ms),
        }
    }

    /// Move time forward, wrapping at `u32::MAX`
    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

/// One second's aggregated reading, already multiplied by the scaling factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeatureSample(u16);

impl FeatureSample {
    /// Scale a raw maximum; out-of-range results saturate.
    pub fn from_scaled(raw_max: f64, scaling_factor: f32) -> Self {
        Self((raw_max * f64::from(scaling_factor)) as u16)
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Running-maximum accumulator reset on every second boundary
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    scaling_factor: f32,
    baseline_ms: u32,
    running_max: f64,
    count: u32,
}

impl WindowAggregator {
    /// Start a period at `now_ms`
    pub fn new(scaling_factor: f32, now_ms: u32) -> Self {
        Self {
            scaling_factor,
            baseline_ms: now_ms,
            running_max: 0.0,
            count: 0,
        }
    }

    /// Fold one sample taken at `now_ms`.
    ///
    /// Within the current second the sample only raises the running maximum.
    /// Once the second is over (or the clock went backwards after a wrap) the
    /// scaled maximum is emitted and a new period starts; the sample that
    /// closes a period is not folded into the next one.
    pub fn push(&mut self, sample: f32, now_ms: u32) -> Option<FeatureSample> {
        let elapsed = i64::from(now_ms) - i64::from(self.baseline_ms);

        if (0..PERIOD_MS).contains(&elapsed) {
            self.count += 1;
            self.running_max = self.running_max.max(f64::from(sample));
            return None;
        }

        let emitted = FeatureSample::from_scaled(self.running_max, self.scaling_factor);
        self.baseline_ms = now_ms;
        self.running_max = 0.0;
        self.count = 0;
        Some(emitted)
    }

    /// Samples folded so far in the current second
    pub fn pending(&self) -> u32 {
        self.count
    }

    pub fn scaling_factor(&self) -> f32 {
        self.scaling_factor
    }

    pub fn set_scaling_factor(&mut self, scaling_factor: f32) {
        self.scaling_factor = scaling_factor;
    }

    /// Drop the accumulator and restart the period at `now_ms`
    pub fn reset(&mut self, now_ms: u32) {
        self.baseline_ms = now_ms;
        self.running_max = 0.0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_emission_mid_second() {
        let mut agg = WindowAggregator::new(10.0, 0);
        for t in (0..1000).step_by(10) {
            assert_eq!(agg.push(1.5, t), None);
        }
        assert_eq!(agg.pending(), 100);
    }

    #[test]
    fn test_emits_scaled_max_on_boundary() {
        let mut agg = WindowAggregator::new(10.0, 0);
        agg.push(2.0, 100);
        agg.push(7.25, 400);
        agg.push(3.0, 900);

        let out = agg.push(100.0, 1000).unwrap();
        assert_eq!(out.value(), 72);

        // The boundary sample does not leak into the next second.
        assert_eq!(agg.pending(), 0);
        let next = agg.push(0.0, 2000).unwrap();
        assert_eq!(next.value(), 0);
    }

    #[test]
    fn test_empty_second_emits_zero() {
        let mut agg = WindowAggregator::new(100.0, 0);
        assert_eq!(agg.push(5.0, 1500).unwrap().value(), 0);
    }

    #[test]
    fn test_clock_wrap_forces_emission() {
        let mut agg = WindowAggregator::new(1.0, u32::MAX - 10);
        assert_eq!(agg.push(4.0, u32::MAX - 5), None);

        // Wrapped counter reads as negative elapsed time.
        let out = agg.push(1.0, 3).unwrap();
        assert_eq!(out.value(), 4);

        // The period restarted at the wrapped reading.
        assert_eq!(agg.push(2.0, 500), None);
    }

    #[test]
    fn test_scaling_saturates() {
        assert_eq!(FeatureSample::from_scaled(1.0e9, 100.0).value(), u16::MAX);
        assert_eq!(FeatureSample::from_scaled(-3.0, 100.0).value(), 0);
        assert_eq!(FeatureSample::from_scaled(1.239, 100.0).value(), 123);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(u32::MAX);
        clock.advance(2);
        assert_eq!(clock.now_ms(), 1);
        let by_ref = &clock;
        assert_eq!(by_ref.now_ms(), 1);

        let shared = Arc::new(clock);
        let other = Arc::clone(&shared);
        other.advance(10);
        assert_eq!(shared.now_ms(), 11);
    }
}
