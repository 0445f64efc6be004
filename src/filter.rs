// ShoulderLink - wearable posture feedback link
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.


//! Fixed-order IIR filter
//!
//! Direct form I, one raw sample in, one filtered sample out. The tap count
//! is a const generic so the history lives inline with no allocation.

/// Coefficients of the first-order low-pass used on accelerometer channels
pub const LOW_PASS_A: [f32; 2] = [1.0000, -0.5095];
/// Numerator of [`LOW_PASS_A`]
pub const LOW_PASS_B: [f32; 2] = [0.2452, 0.2452];

/// Coefficients of the first-order DC blocker used on gyroscope channels
pub const DC_BLOCK_A: [f32; 2] = [1.0000, -0.9391];
/// Numerator of [`DC_BLOCK_A`]
pub const DC_BLOCK_B: [f32; 2] = [0.9695, -0.9695];

/// IIR filter with `TAPS` coefficients (filter order `TAPS - 1`)
#[derive(Debug, Clone)]
pub struct SignalFilter<const TAPS: usize = 2> {
    a: [f32; TAPS],
    b: [f32; TAPS],
    /// Raw inputs, most recent first
    x: [f32; TAPS],
    /// Outputs, most recent first
    y: [f32; TAPS],
}

impl<const TAPS: usize> SignalFilter<TAPS> {
    /// Create a filter from denominator `a` and numerator `b`.
    ///
    /// Returns `None` when there are no taps or the leading denominator
    /// coefficient is zero.
    pub fn new(a: [f32; TAPS], b: [f32; TAPS]) -> Option<Self> {
        match a.first() {
            Some(a0) if *a0 != 0.0 => Some(Self {
                a,
                b,
                x: [0.0; TAPS],
                y: [0.0; TAPS],
            }),
            _ => None,
        }
    }

    /// Filter order
    pub fn order(&self) -> usize {
        TAPS.saturating_sub(1)
    }

    /// Push one raw sample and return the filtered value
    pub fn filter(&mut self, input: f32) -> f32 {
        for k in (1..TAPS).rev() {
            self.x[k] = self.x[k - 1];
            self.y[k] = self.y[k - 1];
        }
        self.x[0] = input;

        let mut acc = 0.0;
        for k in 0..TAPS {
            acc += self.b[k] * self.x[k];
        }
        for k in 1..TAPS {
            acc -= self.a[k] * self.y[k];
        }

        self.y[0] = acc / self.a[0];
        self.y[0]
    }

    /// Forget all history
    pub fn reset(&mut self) {
        self.x = [0.0; TAPS];
        self.y = [0.0; TAPS];
    }
}

impl SignalFilter<2> {
    /// First-order low-pass
    pub fn low_pass() -> Self {
        Self {
            a: LOW_PASS_A,
            b: LOW_PASS_B,
            x: [0.0; 2],
            y: [0.0; 2],
        }
    }

    /// First-order DC blocker (high-pass)
    pub fn dc_block() -> Self {
        Self {
            a: DC_BLOCK_A,
            b: DC_BLOCK_B,
            x: [0.0; 2],
            y: [0.0; 2],
        }
    }
}
