// ShoulderLink - wearable posture feedback link
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.


//! Automatic recovery mechanisms
//!
//! Provides the missed-read watchdog that declares the link down, and the
//! bounded retry used when configuring a freshly connected device.

use std::time::Duration;

/// Watchdog state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkHealth {
    /// Frames are arriving (or misses are still within tolerance)
    #[default]
    Receiving,
    /// Too many consecutive reads failed
    Down,
}

/// Counts consecutive missed reads
///
/// The link is considered down once the count exceeds the threshold, even if
/// the transport itself never reported an error. Any accepted frame resets
/// the count.
#[derive(Debug, Clone)]
pub struct MissedReadWatchdog {
    threshold: u32,
    missed: u32,
    trips: u64,
}

impl MissedReadWatchdog {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            missed: 0,
            trips: 0,
        }
    }

    /// Record an accepted frame
    pub fn record_success(&mut self) {
        self.missed = 0;
    }

    /// Record a failed read attempt
    pub fn record_miss(&mut self) {
        self.missed = self.missed.saturating_add(1);
    }

    /// Current health
    pub fn health(&self) -> LinkHealth {
        if self.missed <= self.threshold {
            LinkHealth::Receiving
        } else {
            LinkHealth::Down
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.health() == LinkHealth::Receiving
    }

    /// Consecutive misses so far
    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Times the link was forced down
    pub fn trips(&self) -> u64 {
        self.trips
    }

    /// Acknowledge a forced disconnect and start counting afresh
    pub fn trip(&mut self) {
        self.trips += 1;
        self.missed = 0;
    }

    /// Reset to initial state
    pub fn reset(&mut self) {
        self.missed = 0;
    }
}

/// Retry strategy for operations
#[derive(Debug, Clone, Default)]
pub enum RetryStrategy {
    /// No retries
    #[default]
    None,
    /// Fixed number of retries with constant delay
    Fixed {
        /// Maximum number of retry attempts
        max_retries: u32,
        /// Delay between retries
        delay: Duration,
    },
}

impl RetryStrategy {
    /// Calculate delay for a given attempt number (0-indexed)
    ///
    /// Returns None if no more retries should be attempted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_retries, delay } => {
                if attempt < *max_retries {
                    Some(*delay)
                } else {
                    None
                }
            }
        }
    }

    /// Get maximum number of retries
    pub fn max_retries(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fixed { max_retries, .. } => *max_retries,
        }
    }

    /// Create a fixed retry strategy
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::Fixed { max_retries, delay }
    }

    /// `attempts` tries in total, `delay` apart
    pub fn attempts(attempts: u32, delay: Duration) -> Self {
        match attempts {
            0 | 1 => Self::None,
            n => Self::fixed(n - 1, delay),
        }
    }
}

/// Execute an operation with retry logic
///
/// Retries the operation according to the strategy, sleeping between attempts.
///
/// # Example
///
/// ```ignore
/// use shoulder_link::recovery::{RetryStrategy, with_retry};
/// use std::time::Duration;
///
/// let strategy = RetryStrategy::fixed(3, Duration::from_millis(100));
/// let result = with_retry(&strategy, || {
///     // Your fallible operation here
///     Ok::<_, &str>(42)
/// });
/// ```
pub fn with_retry<T, E, F>(strategy: &RetryStrategy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if let Some(delay) = strategy.delay_for_attempt(attempt) {
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                } else {
                    return Err(e);
                }
            }
        }
    }
}
