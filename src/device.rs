// ShoulderLink - wearable posture feedback link
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.


//! Device side of the link
//!
//! [`DeviceLink`] is what the tracker runs: it answers commands, filters the
//! sensor stream, feeds one [`AdaptiveThreshold`] per monitored channel and
//! encodes telemetry frames. [`SimulatedDevice`] wraps it as a
//! [`Transport`] so the host side can be exercised without hardware.

use crate::aggregator::Clock;
use crate::config::ThresholdConfig;
use crate::filter::SignalFilter;
use crate::protocol::{
    Command, DeviceState, Mode, TelemetryFrame, ACK, FRAME_TERMINATOR, IDENTITY_REPLY,
};
use crate::transport::{Connector, Endpoint, Transport};
use crate::window::AdaptiveThreshold;
use log::debug;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// Default spacing of simulated frames
pub const DEFAULT_FRAME_INTERVAL_MS: u32 = 10;

/// Command handling and telemetry production on the tracker
#[derive(Debug)]
pub struct DeviceLink<C: Clock + Clone> {
    mode: Mode,
    state: DeviceState,
    clock: C,
    start_ms: u32,
    percent: u32,
    angle_filters: [SignalFilter; 2],
    velocity_filters: [SignalFilter; 2],
    thresholds: [AdaptiveThreshold<C>; 2],
    channels: [f32; 2],
    velocities: [f32; 2],
}

impl<C: Clock + Clone> DeviceLink<C> {
    pub fn new(config: &ThresholdConfig, clock: C) -> Self {
        let threshold =
            || AdaptiveThreshold::with_capacity(config.capacity, config.scaling_factor, clock.clone());
        Self {
            mode: Mode::default(),
            state: DeviceState::default(),
            start_ms: clock.now_ms(),
            percent: config.percent,
            angle_filters: [SignalFilter::low_pass(), SignalFilter::low_pass()],
            velocity_filters: [SignalFilter::dc_block(), SignalFilter::dc_block()],
            thresholds: [threshold(), threshold()],
            channels: [0.0; 2],
            velocities: [0.0; 2],
            clock,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn thresholds(&self) -> &[AdaptiveThreshold<C>; 2] {
        &self.thresholds
    }

    /// Apply a command and build its reply.
    ///
    /// Unknown byte sequences get no reply. A mode change restarts the
    /// filters and the threshold history.
    pub fn handle_command(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        let command = Command::from_bytes(bytes)?;
        match command {
            Command::QueryIdentity => return Some(IDENTITY_REPLY.to_vec()),
            Command::SetRunning => self.state = DeviceState::Running,
            Command::SetPaused => self.state = DeviceState::Paused,
            Command::SetTesting => self.state = DeviceState::Testing,
            Command::SetStatic | Command::SetDynamic => {
                self.mode = if command == Command::SetStatic {
                    Mode::Static
                } else {
                    Mode::Dynamic
                };
                self.reinitialize();
            }
        }

        let mut reply = ACK.to_vec();
        reply.push(self.mode.tag());
        reply.push(self.state.tag());
        Some(reply)
    }

    fn reinitialize(&mut self) {
        for filter in self
            .angle_filters
            .iter_mut()
            .chain(self.velocity_filters.iter_mut())
        {
            filter.reset();
        }
        for threshold in &mut self.thresholds {
            let scale = threshold.scaling_factor();
            threshold.reset(scale);
        }
        self.channels = [0.0; 2];
        self.velocities = [0.0; 2];
    }

    /// Take one raw sensor reading: two angles (degrees) and two angular
    /// velocities.
    pub fn sample(&mut self, angles: [f32; 2], velocities: [f32; 2]) {
        for i in 0..2 {
            self.channels[i] = self.angle_filters[i].filter(angles[i]);
            self.velocities[i] = self.velocity_filters[i].filter(velocities[i]).abs();
        }

        let monitored = match self.mode {
            Mode::Static => self.channels,
            Mode::Dynamic => self.velocities,
        };
        for (threshold, value) in self.thresholds.iter_mut().zip(monitored) {
            threshold.store(value);
        }
    }

    /// Current telemetry
    pub fn frame(&self) -> TelemetryFrame {
        let elapsed_ms = self.clock.now_ms().wrapping_sub(self.start_ms);
        TelemetryFrame {
            mode: self.mode,
            state: self.state,
            device_time: elapsed_ms as f32 / 1000.0,
            channels: self.channels,
            velocities: self.velocities,
            thresholds: [
                self.thresholds[0].get_threshold(self.percent),
                self.thresholds[1].get_threshold(self.percent),
            ],
        }
    }

    /// Current telemetry as wire bytes, terminator included
    pub fn frame_bytes(&self) -> Vec<u8> {
        let mut bytes = self.frame().to_bytes().to_vec();
        bytes.extend_from_slice(FRAME_TERMINATOR);
        bytes
    }
}

#[derive(Debug)]
struct SimState<C: Clock + Clone> {
    device: DeviceLink<C>,
    outgoing: VecDeque<u8>,
    command_buf: Vec<u8>,
    identity: Option<Vec<u8>>,
    frame_interval_ms: u32,
    last_frame_ms: Option<u32>,
    unplugged: bool,
    received: Vec<Command>,
}

impl<C: Clock + Clone> SimState<C> {
    /// Emit a frame when one is due and nothing else is queued
    fn pump(&mut self) {
        if self.identity.is_some() || !self.outgoing.is_empty() {
            return;
        }
        let now = self.device.clock.now_ms();
        let due = match self.last_frame_ms {
            None => true,
            Some(last) => now.wrapping_sub(last) >= self.frame_interval_ms,
        };
        if !due {
            return;
        }
        self.last_frame_ms = Some(now);

        // Slow sway around a resting posture
        let t = now as f32 / 1000.0;
        let angles = [30.0 + 15.0 * (t * 0.5).sin(), 20.0 + 10.0 * (t * 0.3).cos()];
        let velocities = [0.1 * (t * 2.0).sin(), 0.05 * (t * 3.0).cos()];
        self.device.sample(angles, velocities);
        let bytes = self.device.frame_bytes();
        self.outgoing.extend(bytes);
    }

    fn receive(&mut self, bytes: &[u8]) {
        self.command_buf.extend_from_slice(bytes);
        while self.command_buf.len() >= 3 {
            let chunk: Vec<u8> = self.command_buf.drain(..3).collect();
            if let Some(command) = Command::from_bytes(&chunk) {
                self.received.push(command);
            }
            let reply = match &self.identity {
                Some(identity) if chunk == Command::QueryIdentity.as_bytes() => {
                    Some(identity.clone())
                }
                Some(_) => None,
                None => self.device.handle_command(&chunk),
            };
            match reply {
                Some(reply) => self.outgoing.extend(reply),
                None => debug!("simulated device ignored {:?}", chunk),
            }
        }
    }
}

/// In-process stand-in for a tracker on the other end of a serial line.
///
/// Clones share one device. Frames stream in every state, one per
/// `frame_interval_ms` of the device clock, produced lazily when the host
/// reads.
#[derive(Debug)]
pub struct SimulatedDevice<C: Clock + Clone> {
    shared: Arc<Mutex<SimState<C>>>,
}

impl<C: Clock + Clone> Clone for SimulatedDevice<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Clock + Clone> SimulatedDevice<C> {
    pub fn new(config: &ThresholdConfig, clock: C) -> Self {
        Self::build(DeviceLink::new(config, clock), None)
    }

    /// Some other serial device: answers the identity query with `reply`
    /// and ignores everything else.
    pub fn foreign(reply: &str, clock: C) -> Self {
        Self::build(
            DeviceLink::new(&ThresholdConfig::default(), clock),
            Some(reply.as_bytes().to_vec()),
        )
    }

    fn build(device: DeviceLink<C>, identity: Option<Vec<u8>>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SimState {
                device,
                outgoing: VecDeque::new(),
                command_buf: Vec::new(),
                identity,
                frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
                last_frame_ms: None,
                unplugged: false,
                received: Vec::new(),
            })),
        }
    }

    pub fn with_frame_interval(self, interval_ms: u32) -> Self {
        self.lock().frame_interval_ms = interval_ms;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState<C>> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mode(&self) -> Mode {
        self.lock().device.mode()
    }

    pub fn state(&self) -> DeviceState {
        self.lock().device.state()
    }

    /// Commands received so far, oldest first
    pub fn received(&self) -> Vec<Command> {
        self.lock().received.clone()
    }

    /// Inject raw bytes ahead of the device's own output
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().outgoing.extend(bytes.iter().copied());
    }

    /// Stop responding; reads and writes fail as on a pulled cable
    pub fn unplug(&self) {
        let mut state = self.lock();
        state.unplugged = true;
        state.outgoing.clear();
    }

    pub fn replug(&self) {
        self.lock().unplugged = false;
    }

    pub fn is_unplugged(&self) -> bool {
        self.lock().unplugged
    }
}

fn unplugged() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")
}

impl<C: Clock + Clone + Send> Transport for SimulatedDevice<C> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.unplugged {
            return Err(unplugged());
        }
        state.receive(bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.unplugged {
            return Err(unplugged());
        }
        state.pump();
        let n = buf.len().min(state.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(state.outgoing.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if state.unplugged {
            return Err(unplugged());
        }
        state.outgoing.clear();
        Ok(())
    }
}

/// Connector over a fixed table of simulated endpoints
#[derive(Debug)]
pub struct SimulatedConnector<C: Clock + Clone> {
    endpoints: Vec<(Endpoint, Option<SimulatedDevice<C>>)>,
    opened: Vec<Endpoint>,
}

impl<C: Clock + Clone> Default for SimulatedConnector<C> {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            opened: Vec::new(),
        }
    }
}

impl<C: Clock + Clone> SimulatedConnector<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidate with a device behind it
    pub fn attach(mut self, endpoint: Endpoint, device: SimulatedDevice<C>) -> Self {
        self.endpoints.push((endpoint, Some(device)));
        self
    }

    /// Candidate that cannot be opened
    pub fn vacant(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push((endpoint, None));
        self
    }

    /// Every endpoint opened so far, in order
    pub fn opened(&self) -> &[Endpoint] {
        &self.opened
    }
}

impl<C: Clock + Clone + Send + 'static> Connector for SimulatedConnector<C> {
    fn candidates(&self) -> Vec<Endpoint> {
        self.endpoints.iter().map(|(e, _)| e.clone()).collect()
    }

    fn open(&mut self, endpoint: &Endpoint) -> io::Result<Box<dyn Transport>> {
        let device = self
            .endpoints
            .iter()
            .find(|(e, _)| e == endpoint)
            .and_then(|(_, d)| d.as_ref())
            .filter(|d| !d.is_unplugged())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, endpoint.to_string()))?;
        self.opened.push(endpoint.clone());
        Ok(Box::new(device))
    }
}
