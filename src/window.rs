// ShoulderLink - wearable posture feedback link
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.


//! Sliding-window order statistics
//!
//! [`OrderedWindow`] keeps the most recent N feature values sorted in place.
//! A parallel age list records, oldest first, the index each held value
//! currently occupies in the sorted list, so the oldest value can be evicted
//! without searching and nothing is ever re-sorted.
//!
//! Both lists are allocated once at full capacity; inserts and evictions
//! shift elements but never reallocate.
//!
//! [`AdaptiveThreshold`] chains a [`WindowAggregator`] in front of the window
//! to form the device-side pipeline: raw samples in, percentile thresholds out.

use crate::aggregator::{Clock, FeatureSample, WindowAggregator};

/// Default number of retained feature values (2 min 30 s at one per second)
pub const DEFAULT_CAPACITY: usize = 150;

/// Ages are stored as `u8` indices
pub const MAX_CAPACITY: usize = u8::MAX as usize;

/// The two zero placeholders need room
pub const MIN_CAPACITY: usize = 2;

/// Value type held by the window
pub type WindowValue = u16;

/// Fixed-capacity ascending window with age tracking
#[derive(Debug, Clone)]
pub struct OrderedWindow {
    /// Held values, ascending
    values: Vec<WindowValue>,
    /// Per held value, oldest first: its current index in `values`
    ages: Vec<u8>,
    capacity: usize,
}

impl OrderedWindow {
    /// Create a window with [`DEFAULT_CAPACITY`]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a window; `capacity` is clamped to `MIN_CAPACITY..=MAX_CAPACITY`
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_CAPACITY, MAX_CAPACITY);
        let mut window = Self {
            values: Vec::with_capacity(capacity + 1),
            ages: Vec::with_capacity(capacity + 1),
            capacity,
        };
        window.seed();
        window
    }

    fn seed(&mut self) {
        self.values.extend_from_slice(&[0, 0]);
        self.ages.extend_from_slice(&[0, 1]);
    }

    /// Drop everything and reseed with the two zero placeholders
    pub fn clear(&mut self) {
        self.values.clear();
        self.ages.clear();
        self.seed();
    }

    /// Add the newest value, evicting the oldest one when full
    pub fn insert(&mut self, value: WindowValue) {
        if self.values.len() >= self.capacity {
            self.evict_oldest();
        }

        let pos = self.locate(value);
        self.values.insert(pos, value);

        for age in self.ages.iter_mut() {
            if usize::from(*age) >= pos {
                *age += 1;
            }
        }
        // pos < len(values) <= MAX_CAPACITY
        self.ages.push(pos as u8);
    }

    fn evict_oldest(&mut self) {
        let Some(&oldest) = self.ages.first() else {
            return;
        };
        self.values.remove(usize::from(oldest));
        for age in self.ages.iter_mut().skip(1) {
            if *age >= oldest {
                *age -= 1;
            }
        }
        self.ages.remove(0);
    }

    /// Stepped search for the insertion index of `value`.
    ///
    /// Starts mid-list with a step of a quarter of the length, moves toward
    /// the value, halves the step (never below one) after every move, and
    /// stops once `values[pos - 1] <= value <= values[pos]` or the lowest
    /// slot is reached. Ties land wherever the walk first stops, which is not
    /// necessarily the leftmost or rightmost equal slot.
    fn locate(&self, value: WindowValue) -> usize {
        let len = self.values.len() as isize;
        let mut pos = len / 2;
        let mut inc = pos / 2;

        while pos >= 0 && pos < len && self.misplaced(value, pos as usize) {
            if value > self.values[pos as usize] {
                pos += inc;
            } else {
                pos -= inc;
            }

            inc = (inc / 2).max(1);

            if pos == 0 && value <= self.values[0] {
                break;
            }
        }

        pos.clamp(0, len) as usize
    }

    /// `value` cannot sit at `pos` without breaking the order
    fn misplaced(&self, value: WindowValue, pos: usize) -> bool {
        value > self.values[pos] || (pos > 0 && value < self.values[pos - 1])
    }

    /// Value at `percent` (0-100) of the sorted window, unscaled.
    ///
    /// The index is `percent * len / 100`, clamped into range. The bin is
    /// returned as is: neighbours are not averaged.
    pub fn percentile(&self, percent: u32) -> WindowValue {
        let len = self.values.len();
        if len == 0 {
            return 0;
        }
        let idx = (percent as usize).saturating_mul(len) / 100;
        self.values[idx.min(len - 1)]
    }

    /// Number of held values, placeholders included
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Held values, ascending
    pub fn values(&self) -> &[WindowValue] {
        &self.values
    }

    /// Per held value, oldest first: its index in [`values`](Self::values)
    pub fn ages(&self) -> &[u8] {
        &self.ages
    }

    /// Held values from oldest to newest
    pub fn chronological(&self) -> impl Iterator<Item = WindowValue> + '_ {
        self.ages.iter().map(move |&i| self.values[usize::from(i)])
    }
}

impl Default for OrderedWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Device-side threshold pipeline: per-second aggregation feeding the window
#[derive(Debug)]
pub struct AdaptiveThreshold<C: Clock> {
    window: OrderedWindow,
    aggregator: WindowAggregator,
    clock: C,
}

impl<C: Clock> AdaptiveThreshold<C> {
    /// Create with [`DEFAULT_CAPACITY`]
    pub fn new(scaling_factor: f32, clock: C) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, scaling_factor, clock)
    }

    pub fn with_capacity(capacity: usize, scaling_factor: f32, clock: C) -> Self {
        let aggregator = WindowAggregator::new(scaling_factor, clock.now_ms());
        Self {
            window: OrderedWindow::with_capacity(capacity),
            aggregator,
            clock,
        }
    }

    /// Feed one filtered sample; inserts into the window once per second.
    ///
    /// Returns the feature value when one was emitted.
    pub fn store(&mut self, sample: f32) -> Option<FeatureSample> {
        let emitted = self.aggregator.push(sample, self.clock.now_ms())?;
        self.window.insert(emitted.value());
        Some(emitted)
    }

    /// Insert an already-scaled value directly
    pub fn insert(&mut self, value: WindowValue) {
        self.window.insert(value);
    }

    /// Threshold at `percent` (0-100), rescaled to sensor units
    pub fn get_threshold(&self, percent: u32) -> f32 {
        f32::from(self.window.percentile(percent)) / self.aggregator.scaling_factor()
    }

    /// Number of values in the window
    pub fn get_nb_points(&self) -> usize {
        self.window.len()
    }

    pub fn scaling_factor(&self) -> f32 {
        self.aggregator.scaling_factor()
    }

    pub fn set_scaling_factor(&mut self, scaling_factor: f32) {
        self.aggregator.set_scaling_factor(scaling_factor);
    }

    /// Clear the window, restart aggregation and adopt a new scaling factor
    pub fn reset(&mut self, scaling_factor: f32) {
        self.window.clear();
        self.aggregator.set_scaling_factor(scaling_factor);
        self.aggregator.reset(self.clock.now_ms());
    }

    pub fn window(&self) -> &OrderedWindow {
        &self.window
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
