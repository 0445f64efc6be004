// ShoulderLink - wearable posture feedback link
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.


//! Host polling loop
//!
//! Two periodic tasks share the connection on one thread:
//! - `UpdateValues` makes one read attempt per tick and hands accepted
//!   frames to a [`FrameSink`].
//! - `AutoConnect` keeps the link up: it connects, configures a fresh
//!   device, and forces a disconnect once too many reads in a row failed.
//!
//! Tasks are kept in an explicit [`TaskQueue`] driven by the caller's
//! clock, so nothing runs behind the caller's back. All loop state lives in
//! a [`PollContext`] passed in by reference.

use crate::config::PollConfig;
use crate::connection::ConnectionManager;
use crate::metrics::LinkMetrics;
use crate::protocol::TelemetryFrame;
use crate::recovery::{with_retry, MissedReadWatchdog, RetryStrategy};
use crate::transport::Connector;
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Downstream consumer of accepted frames (logging, plotting, feedback)
pub trait FrameSink {
    /// One accepted frame. `feedback` is set when a monitored value is over
    /// its threshold and the device is not in testing mode.
    fn accept(&mut self, frame: &TelemetryFrame, feedback: bool);
}

impl FrameSink for Vec<TelemetryFrame> {
    fn accept(&mut self, frame: &TelemetryFrame, _feedback: bool) {
        self.push(*frame);
    }
}

/// Periodic tasks of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Read one frame
    UpdateValues,
    /// Hold or re-establish the connection
    AutoConnect,
}

#[derive(Debug, Clone)]
struct Scheduled {
    task: Task,
    interval: Duration,
    next: Instant,
}

/// Single-threaded timer queue.
///
/// A task that fires is rescheduled one interval later. When the caller
/// falls behind by more than an interval, the missed ticks are skipped
/// rather than replayed.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    entries: Vec<Scheduled>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `interval`, first at `first`
    pub fn schedule(&mut self, task: Task, interval: Duration, first: Instant) {
        self.entries.retain(|e| e.task != task);
        self.entries.push(Scheduled {
            task,
            interval,
            next: first,
        });
    }

    pub fn cancel(&mut self, task: Task) {
        self.entries.retain(|e| e.task != task);
    }

    /// Tasks due at `now`, earliest deadline first
    pub fn due(&mut self, now: Instant) -> Vec<Task> {
        let mut fired: Vec<(Instant, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.next <= now)
            .map(|(i, e)| (e.next, i))
            .collect();
        fired.sort();

        for &(_, i) in &fired {
            let entry = &mut self.entries[i];
            entry.next += entry.interval;
            if entry.next <= now {
                entry.next = now + entry.interval;
            }
        }
        fired.into_iter().map(|(_, i)| self.entries[i].task).collect()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.next).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutable state of the polling loop
#[derive(Debug, Clone)]
pub struct PollContext {
    /// Consecutive missed reads
    pub watchdog: MissedReadWatchdog,
    /// Consecutive autoconnect ticks without a healthy link
    pub missed_connections: u32,
    /// Frames are being requested
    pub running: bool,
    /// A device was connected at least once
    pub was_connected: bool,
    /// The user paused; autoconnect will not restart the device
    pub user_paused: bool,
    pub last_frame: Option<TelemetryFrame>,
    pub metrics: LinkMetrics,
}

impl PollContext {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            watchdog: MissedReadWatchdog::new(config.missed_read_threshold),
            missed_connections: 0,
            running: false,
            was_connected: false,
            user_paused: false,
            last_frame: None,
            metrics: LinkMetrics::new(),
        }
    }
}

/// Host side driver: the connection plus its task schedule
#[derive(Debug)]
pub struct Poller<C: Connector> {
    manager: ConnectionManager<C>,
    config: PollConfig,
    queue: TaskQueue,
}

impl<C: Connector> Poller<C> {
    /// Schedule both tasks starting at `start`; connection first
    pub fn new(manager: ConnectionManager<C>, config: PollConfig, start: Instant) -> Self {
        let mut queue = TaskQueue::new();
        queue.schedule(Task::AutoConnect, config.autoconnect_interval(), start);
        queue.schedule(Task::UpdateValues, config.update_interval(), start);
        Self {
            manager,
            config,
            queue,
        }
    }

    /// Run every task due at `now`; returns how many ran
    pub fn tick(&mut self, now: Instant, ctx: &mut PollContext, sink: &mut dyn FrameSink) -> usize {
        let due = self.queue.due(now);
        for &task in &due {
            self.run_task(task, ctx, sink);
        }
        due.len()
    }

    /// Run one task immediately
    pub fn run_task(&mut self, task: Task, ctx: &mut PollContext, sink: &mut dyn FrameSink) {
        match task {
            Task::UpdateValues => self.update_values(ctx, sink),
            Task::AutoConnect => self.auto_connect(ctx),
        }
    }

    fn update_values(&mut self, ctx: &mut PollContext, sink: &mut dyn FrameSink) {
        if !ctx.running {
            return;
        }

        let result = self.manager.read_frame();
        ctx.metrics
            .record_read(&result, result.as_ref().ok().map(|f| f.mode));

        match result {
            Ok(frame) => {
                ctx.watchdog.record_success();
                let feedback = !self.manager.is_testing() && frame.exceeds_threshold();
                sink.accept(&frame, feedback);
                ctx.last_frame = Some(frame);
            }
            Err(e) => {
                ctx.watchdog.record_miss();
                debug!("Missed read {}: {}", ctx.watchdog.missed(), e);
            }
        }
    }

    fn auto_connect(&mut self, ctx: &mut PollContext) {
        let receiving = ctx.watchdog.is_receiving();
        let connected = self.manager.connect(true);
        ctx.metrics.connects = self.manager.connects();

        if connected && receiving {
            ctx.missed_connections = 0;

            if !ctx.running && !ctx.user_paused {
                self.start_device(ctx);
            }

            if !ctx.was_connected {
                if !self.manager.set_testing() {
                    ctx.metrics.record_failed_command();
                }
                ctx.was_connected = true;
            }
            return;
        }

        ctx.missed_connections += 1;
        ctx.running = false;
        if connected {
            warn!(
                "No frame in {} reads, dropping the connection",
                ctx.watchdog.missed()
            );
            self.manager.disconnect();
            ctx.watchdog.trip();
            ctx.metrics.record_forced_reconnect();
        }
    }

    /// Select the initial mode (with retries) and start the device
    fn start_device(&mut self, ctx: &mut PollContext) {
        let mode = self.config.initial_mode;
        let strategy =
            RetryStrategy::attempts(self.config.mode_retry_attempts, self.config.mode_retry_delay());
        let manager = &mut self.manager;
        let selected = with_retry(&strategy, || {
            if manager.set_mode(mode) {
                Ok(())
            } else {
                Err(())
            }
        });

        if selected.is_err() || !self.manager.set_state(true) {
            ctx.metrics.record_failed_command();
            return;
        }

        info!("Device running in {} mode", mode);
        ctx.running = true;
        ctx.watchdog.reset();
    }

    /// Pause the device and stop reading until [`Poller::resume`]
    pub fn pause(&mut self, ctx: &mut PollContext) -> bool {
        ctx.user_paused = true;
        ctx.running = false;
        self.manager.set_state(false)
    }

    /// Restart the device after a pause
    pub fn resume(&mut self, ctx: &mut PollContext) -> bool {
        ctx.user_paused = false;
        if !self.manager.set_state(true) {
            ctx.metrics.record_failed_command();
            return false;
        }
        ctx.running = true;
        ctx.watchdog.reset();
        true
    }

    /// Pause the device and close the connection
    pub fn shutdown(&mut self, ctx: &mut PollContext) {
        self.manager.disconnect();
        ctx.running = false;
    }

    /// When the next task is due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    pub fn manager(&self) -> &ConnectionManager<C> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ConnectionManager<C> {
        &mut self.manager
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ManualClock;
    use crate::config::{LinkConfig, ThresholdConfig};
    use crate::device::{SimulatedConnector, SimulatedDevice};
    use crate::link::LinkProtocol;
    use crate::protocol::{Command, DeviceState, Mode};
    use crate::transport::Endpoint;
    use std::sync::Arc;

    type SimClock = Arc<ManualClock>;

    fn endpoint() -> Endpoint {
        Endpoint::Path("/dev/ttyACM0".to_string())
    }

    fn poll_config() -> PollConfig {
        PollConfig {
            missed_read_threshold: 3,
            mode_retry_attempts: 3,
            mode_retry_delay_ms: 0,
            ..PollConfig::default()
        }
    }

    fn sink() -> Vec<TelemetryFrame> {
        Vec::new()
    }

    fn setup(
        device: &SimulatedDevice<SimClock>,
    ) -> (Poller<SimulatedConnector<SimClock>>, PollContext) {
        let connector = SimulatedConnector::new().attach(endpoint(), device.clone());
        let manager = ConnectionManager::new(connector, LinkProtocol::new(LinkConfig::immediate()));
        let config = poll_config();
        let ctx = PollContext::new(&config);
        (Poller::new(manager, config, Instant::now()), ctx)
    }

    #[test]
    fn test_task_queue_order_and_reschedule() {
        let base = Instant::now();
        let mut queue = TaskQueue::new();
        queue.schedule(Task::AutoConnect, Duration::from_millis(200), base);
        queue.schedule(Task::UpdateValues, Duration::from_millis(5), base);

        assert_eq!(queue.due(base), vec![Task::AutoConnect, Task::UpdateValues]);
        assert!(queue.due(base).is_empty());
        assert_eq!(queue.next_deadline(), Some(base + Duration::from_millis(5)));

        assert_eq!(
            queue.due(base + Duration::from_millis(5)),
            vec![Task::UpdateValues]
        );

        // Falling far behind fires once, not once per missed tick
        let late = base + Duration::from_millis(150);
        assert_eq!(queue.due(late), vec![Task::UpdateValues]);
        assert_eq!(queue.next_deadline(), Some(late + Duration::from_millis(5)));

        assert_eq!(
            queue.due(base + Duration::from_millis(200)),
            vec![Task::UpdateValues, Task::AutoConnect]
        );

        queue.cancel(Task::AutoConnect);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_first_connection_starts_and_tests() {
        let clock = Arc::new(ManualClock::new(0));
        let device = SimulatedDevice::new(&ThresholdConfig::default(), Arc::clone(&clock))
            .with_frame_interval(0);
        let (mut poller, mut ctx) = setup(&device);
        let mut frames = sink();

        assert_eq!(poller.tick(Instant::now(), &mut ctx, &mut frames), 2);

        assert_eq!(
            device.received(),
            vec![
                Command::QueryIdentity,
                Command::SetStatic,
                Command::SetRunning,
                Command::SetTesting
            ]
        );
        assert!(ctx.running);
        assert!(ctx.was_connected);
        assert!(poller.manager().is_testing());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].state, DeviceState::Testing);
        assert_eq!(ctx.metrics.frames(), 1);
        assert_eq!(ctx.metrics.connects, 1);
    }

    #[test]
    fn test_initial_mode_from_config() {
        let clock = Arc::new(ManualClock::new(0));
        let device = SimulatedDevice::new(&ThresholdConfig::default(), clock);
        let connector = SimulatedConnector::new().attach(endpoint(), device.clone());
        let manager = ConnectionManager::new(connector, LinkProtocol::new(LinkConfig::immediate()));
        let config = PollConfig {
            initial_mode: Mode::Dynamic,
            ..poll_config()
        };
        let mut ctx = PollContext::new(&config);
        let mut poller = Poller::new(manager, config, Instant::now());

        poller.run_task(Task::AutoConnect, &mut ctx, &mut sink());
        assert_eq!(device.mode(), Mode::Dynamic);
    }

    #[test]
    fn test_watchdog_forces_reconnect() {
        let clock = Arc::new(ManualClock::new(0));
        // The clock never moves, so only the very first frame is ever sent
        let device = SimulatedDevice::new(&ThresholdConfig::default(), Arc::clone(&clock))
            .with_frame_interval(1000);
        let (mut poller, mut ctx) = setup(&device);
        let mut frames = sink();

        poller.run_task(Task::AutoConnect, &mut ctx, &mut frames);
        assert!(ctx.running);

        for _ in 0..4 {
            poller.run_task(Task::UpdateValues, &mut ctx, &mut frames);
        }
        assert!(frames.is_empty());
        assert!(!ctx.watchdog.is_receiving());

        // Still connected but not receiving: drop the link
        poller.run_task(Task::AutoConnect, &mut ctx, &mut frames);
        assert!(!poller.manager().is_connected());
        assert!(!ctx.running);
        assert_eq!(ctx.missed_connections, 1);
        assert_eq!(ctx.metrics.forced_reconnects, 1);
        assert_eq!(ctx.watchdog.missed(), 0);

        // Next round probes again and restarts without re-entering testing
        poller.run_task(Task::AutoConnect, &mut ctx, &mut frames);
        assert!(poller.manager().is_connected());
        assert!(ctx.running);
        assert_eq!(ctx.missed_connections, 0);
        assert_eq!(poller.manager().connector().opened(), &[endpoint(), endpoint()]);

        let received = device.received();
        assert_eq!(
            &received[received.len() - 4..],
            &[
                Command::SetPaused,
                Command::QueryIdentity,
                Command::SetStatic,
                Command::SetRunning
            ]
        );
        assert!(!received[4..].contains(&Command::SetTesting));
    }

    #[test]
    fn test_no_device_counts_missed_connections() {
        let connector = SimulatedConnector::<SimClock>::new().vacant(endpoint());
        let manager = ConnectionManager::new(connector, LinkProtocol::new(LinkConfig::immediate()));
        let config = poll_config();
        let mut ctx = PollContext::new(&config);
        let mut poller = Poller::new(manager, config, Instant::now());

        for _ in 0..3 {
            poller.run_task(Task::AutoConnect, &mut ctx, &mut sink());
        }
        assert_eq!(ctx.missed_connections, 3);
        assert!(!ctx.running);
        assert!(!ctx.was_connected);
    }

    #[test]
    fn test_pause_and_resume() {
        let clock = Arc::new(ManualClock::new(0));
        let device = SimulatedDevice::new(&ThresholdConfig::default(), Arc::clone(&clock))
            .with_frame_interval(0);
        let (mut poller, mut ctx) = setup(&device);
        let mut frames = sink();

        poller.run_task(Task::AutoConnect, &mut ctx, &mut frames);
        assert!(poller.pause(&mut ctx));
        assert_eq!(device.state(), DeviceState::Paused);

        // Paused: no reads, and autoconnect leaves the device alone
        poller.run_task(Task::UpdateValues, &mut ctx, &mut frames);
        poller.run_task(Task::AutoConnect, &mut ctx, &mut frames);
        assert_eq!(ctx.metrics.reads, 0);
        assert_eq!(device.state(), DeviceState::Paused);

        assert!(poller.resume(&mut ctx));
        poller.run_task(Task::UpdateValues, &mut ctx, &mut frames);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].state, DeviceState::Running);
    }

    #[test]
    fn test_shutdown_pauses_device() {
        let clock = Arc::new(ManualClock::new(0));
        let device = SimulatedDevice::new(&ThresholdConfig::default(), clock);
        let (mut poller, mut ctx) = setup(&device);

        poller.run_task(Task::AutoConnect, &mut ctx, &mut sink());
        poller.shutdown(&mut ctx);
        assert!(!poller.manager().is_connected());
        assert_eq!(device.state(), DeviceState::Paused);
    }
}
