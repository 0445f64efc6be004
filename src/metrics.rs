//! Link statistics
//!
//! Counts what the polling loop sees: accepted frames, each failure kind,
//! and connection churn.

use crate::error::LinkError;
use crate::protocol::Mode;
use std::collections::HashMap;

/// Outcome classes of one read attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadOutcome {
    Accepted,
    SyncTimeout,
    Malformed,
    Invalid,
    NotConnected,
}

impl ReadOutcome {
    pub fn of(result: &Result<impl Sized, LinkError>) -> Self {
        match result {
            Ok(_) => Self::Accepted,
            Err(LinkError::SyncTimeout { .. }) => Self::SyncTimeout,
            Err(LinkError::Malformed { .. }) => Self::Malformed,
            Err(LinkError::Invalid { .. }) => Self::Invalid,
            Err(_) => Self::NotConnected,
        }
    }
}

/// Link statistics collector
#[derive(Debug, Clone, Default)]
pub struct LinkMetrics {
    /// Read attempts made
    pub reads: u64,
    /// Outcome distribution
    pub outcomes: HashMap<ReadOutcome, u64>,
    /// Frames accepted per mode
    pub frames_by_mode: HashMap<Mode, u64>,
    /// Successful connections
    pub connects: u64,
    /// Disconnects forced by the missed-read watchdog
    pub forced_reconnects: u64,
    /// Commands the device did not acknowledge
    pub failed_commands: u64,
    /// Longest run of consecutive failed reads
    pub longest_miss_streak: u32,
    current_streak: u32,
}

impl LinkMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one read attempt
    pub fn record_read<T>(&mut self, result: &Result<T, LinkError>, mode: Option<Mode>) {
        self.reads += 1;
        let outcome = ReadOutcome::of(result);
        *self.outcomes.entry(outcome).or_insert(0) += 1;

        if outcome == ReadOutcome::Accepted {
            if let Some(mode) = mode {
                *self.frames_by_mode.entry(mode).or_insert(0) += 1;
            }
            self.current_streak = 0;
        } else {
            self.current_streak += 1;
            self.longest_miss_streak = self.longest_miss_streak.max(self.current_streak);
        }
    }

    pub fn record_connect(&mut self) {
        self.connects += 1;
    }

    pub fn record_forced_reconnect(&mut self) {
        self.forced_reconnects += 1;
    }

    pub fn record_failed_command(&mut self) {
        self.failed_commands += 1;
    }

    /// Count for one outcome
    pub fn count(&self, outcome: ReadOutcome) -> u64 {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    /// Accepted frames
    pub fn frames(&self) -> u64 {
        self.count(ReadOutcome::Accepted)
    }

    /// Share of read attempts that produced a frame (0.0 - 1.0)
    pub fn acceptance_rate(&self) -> f64 {
        if self.reads == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.reads as f64
    }

    /// Reset all metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Generate a human-readable report
    pub fn report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== ShoulderLink Metrics ===\n\n");

        report.push_str(&format!("Read attempts: {}\n", self.reads));
        report.push_str(&format!(
            "Frames accepted: {} ({:.1}%)\n",
            self.frames(),
            self.acceptance_rate() * 100.0
        ));
        report.push_str(&format!("Connections: {}\n", self.connects));
        report.push_str(&format!("Forced reconnects: {}\n", self.forced_reconnects));
        report.push_str(&format!("Failed commands: {}\n", self.failed_commands));
        report.push_str(&format!(
            "Longest miss streak: {}\n\n",
            self.longest_miss_streak
        ));

        report.push_str("Read outcomes:\n");
        let mut outcomes: Vec<_> = self.outcomes.iter().collect();
        outcomes.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (outcome, count) in outcomes {
            let percent = (*count as f64 / self.reads as f64) * 100.0;
            report.push_str(&format!("  {:?}: {} ({:.1}%)\n", outcome, count, percent));
        }

        if !self.frames_by_mode.is_empty() {
            report.push_str("\nFrames by mode:\n");
            for mode in [Mode::Static, Mode::Dynamic] {
                if let Some(count) = self.frames_by_mode.get(&mode) {
                    report.push_str(&format!("  {}: {}\n", mode, count));
                }
            }
        }

        report
    }
}
