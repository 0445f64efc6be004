// ShoulderLink - wearable posture feedback link
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.


//! Connection management
//!
//! Owns the single [`LinkSession`] and moves it through
//! `Disconnected -> Probing -> Connected`. Probing always starts from the
//! first candidate endpoint.

use crate::error::{LinkError, Result};
use crate::link::LinkProtocol;
use crate::protocol::{Command, Mode, TelemetryFrame};
use crate::transport::{Connector, Endpoint, Transport};
use log::{debug, info, warn};
use std::fmt;

/// Lifecycle of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    /// Walking the candidate list
    Probing,
    Connected,
}

/// The one live connection and its transport handle
#[derive(Default)]
pub struct LinkSession {
    state: LinkState,
    testing: bool,
    endpoint: Option<Endpoint>,
    transport: Option<Box<dyn Transport>>,
}

impl LinkSession {
    fn connected(endpoint: Endpoint, transport: Box<dyn Transport>) -> Self {
        Self {
            state: LinkState::Connected,
            testing: false,
            endpoint: Some(endpoint),
            transport: Some(transport),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Device is recording without feedback
    pub fn is_testing(&self) -> bool {
        self.testing
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }
}

impl fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSession")
            .field("state", &self.state)
            .field("testing", &self.testing)
            .field("endpoint", &self.endpoint)
            .field("open", &self.transport.is_some())
            .finish()
    }
}

/// Finds the device, keeps the session and runs link operations on it
pub struct ConnectionManager<C> {
    connector: C,
    link: LinkProtocol,
    session: LinkSession,
    connects: u64,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, link: LinkProtocol) -> Self {
        Self {
            connector,
            link,
            session: LinkSession::default(),
            connects: 0,
        }
    }

    /// Make sure a verified device is connected.
    ///
    /// When already connected this returns immediately. Otherwise every
    /// candidate is tried in order; endpoints that fail to open or answer
    /// with the wrong identity are closed and skipped. `quiet` keeps a
    /// fruitless probe out of the warning log.
    pub fn connect(&mut self, quiet: bool) -> bool {
        if self.is_connected() {
            return true;
        }

        self.session.state = LinkState::Probing;
        let candidates = self.connector.candidates();
        for endpoint in &candidates {
            let mut transport = match self.connector.open(endpoint) {
                Ok(transport) => transport,
                Err(e) => {
                    debug!("Cannot open {}: {}", endpoint, e);
                    continue;
                }
            };

            match self.link.identify(transport.as_mut(), endpoint) {
                Ok(()) => {
                    info!("Shoulder tracker connected on {}", endpoint);
                    self.session = LinkSession::connected(endpoint.clone(), transport);
                    self.connects += 1;
                    return true;
                }
                Err(e @ LinkError::DeviceMismatch { .. }) => warn!("{}", e),
                Err(e) => debug!("Probe of {} failed: {}", endpoint, e),
            }
        }

        self.session.state = LinkState::Disconnected;
        if quiet {
            debug!("No shoulder tracker among {} candidates", candidates.len());
        } else {
            warn!(
                "Shoulder tracker not detected on any of {} candidates. Is the device on and the dongle plugged in?",
                candidates.len()
            );
        }
        false
    }

    /// Ask the device to pause, then close the transport
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.session.transport.take() {
            if let Err(e) = self.link.command(transport.as_mut(), Command::SetPaused) {
                debug!("Pause before disconnect failed: {}", e);
            }
            if let Some(endpoint) = &self.session.endpoint {
                info!("Disconnected from {}", endpoint);
            }
        }
        self.session = LinkSession::default();
    }

    /// Drop a transport that failed; no pause can be sent over it
    fn abandon(&mut self, reason: &str) {
        if let Some(endpoint) = &self.session.endpoint {
            warn!("Lost {}: {}", endpoint, reason);
        }
        self.session = LinkSession::default();
    }

    /// One attempt on the current session; transport failures close it
    fn attempt<T, F>(&mut self, op: &mut F) -> Result<T>
    where
        F: FnMut(&LinkProtocol, &mut dyn Transport) -> Result<T>,
    {
        let Some(transport) = self.session.transport.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        match op(&self.link, transport.as_mut()) {
            Err(LinkError::Io { reason }) => {
                self.abandon(&reason);
                Err(LinkError::NotConnected)
            }
            other => other,
        }
    }

    /// Run `op`; when there is no session, connect quietly and retry once
    fn run<T, F>(&mut self, mut op: F) -> Result<T>
    where
        F: FnMut(&LinkProtocol, &mut dyn Transport) -> Result<T>,
    {
        match self.attempt(&mut op) {
            Err(LinkError::NotConnected) if self.connect(true) => self.attempt(&mut op),
            other => other,
        }
    }

    fn acknowledged(&mut self, command: Command) -> bool {
        match self.run(|link, transport| link.command(transport, command)) {
            Ok(_) => true,
            Err(e) => {
                warn!("{} failed: {}", command, e);
                false
            }
        }
    }

    /// Start (`true`) or pause (`false`) feedback
    pub fn set_state(&mut self, running: bool) -> bool {
        self.acknowledged(if running {
            Command::SetRunning
        } else {
            Command::SetPaused
        })
    }

    /// Select static or dynamic monitoring
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        self.acknowledged(Command::select(mode))
    }

    /// Put the device in recording-only mode
    pub fn set_testing(&mut self) -> bool {
        let ok = self.acknowledged(Command::SetTesting);
        if ok {
            self.session.testing = true;
        }
        ok
    }

    /// Read the next telemetry frame
    pub fn read_frame(&mut self) -> Result<TelemetryFrame> {
        self.run(|link, transport| link.read_frame(transport))
    }

    pub fn state(&self) -> LinkState {
        self.session.state
    }

    pub fn is_connected(&self) -> bool {
        self.session.state == LinkState::Connected
    }

    pub fn is_testing(&self) -> bool {
        self.session.testing
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.session.endpoint()
    }

    pub fn session(&self) -> &LinkSession {
        &self.session
    }

    pub fn link(&self) -> &LinkProtocol {
        &self.link
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Successful connections so far
    pub fn connects(&self) -> u64 {
        self.connects
    }
}

impl<C> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(mut transport) = self.session.transport.take() {
            let _ = self.link.command(transport.as_mut(), Command::SetPaused);
        }
    }
}

impl<C> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("session", &self.session)
            .field("connects", &self.connects)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ManualClock;
    use crate::config::{LinkConfig, ThresholdConfig};
    use crate::device::{SimulatedConnector, SimulatedDevice};
    use crate::protocol::DeviceState;
    use std::sync::Arc;

    type SimClock = Arc<ManualClock>;

    fn path(p: &str) -> Endpoint {
        Endpoint::Path(p.to_string())
    }

    fn tracker(clock: &SimClock) -> SimulatedDevice<SimClock> {
        SimulatedDevice::new(&ThresholdConfig::default(), Arc::clone(clock))
    }

    fn manager(connector: SimulatedConnector<SimClock>) -> ConnectionManager<SimulatedConnector<SimClock>> {
        ConnectionManager::new(connector, LinkProtocol::new(LinkConfig::immediate()))
    }

    #[test]
    fn test_connect_skips_vacant_and_foreign() {
        let clock = Arc::new(ManualClock::new(0));
        let device = tracker(&clock);
        let connector = SimulatedConnector::new()
            .vacant(path("/dev/arduino_leonardo"))
            .attach(path("/dev/ttyACM0"), SimulatedDevice::foreign("ATOK", Arc::clone(&clock)))
            .attach(path("/dev/ttyACM1"), device.clone());
        let mut manager = manager(connector);

        assert_eq!(manager.state(), LinkState::Disconnected);
        assert!(manager.connect(false));
        assert_eq!(manager.state(), LinkState::Connected);
        assert_eq!(manager.endpoint(), Some(&path("/dev/ttyACM1")));
        assert_eq!(
            manager.connector().opened(),
            &[path("/dev/ttyACM0"), path("/dev/ttyACM1")]
        );
        assert_eq!(device.received(), vec![Command::QueryIdentity]);

        // Already connected: no further probing
        assert!(manager.connect(true));
        assert_eq!(manager.connector().opened().len(), 2);
        assert_eq!(manager.connects(), 1);
    }

    #[test]
    fn test_connect_fails_without_device() {
        let clock = Arc::new(ManualClock::new(0));
        let connector = SimulatedConnector::new()
            .vacant(path("/dev/ttyACM0"))
            .attach(path("/dev/ttyACM1"), SimulatedDevice::foreign("", clock));
        let mut manager = manager(connector);

        assert!(!manager.connect(true));
        assert_eq!(manager.state(), LinkState::Disconnected);
        assert!(manager.endpoint().is_none());
    }

    #[test]
    fn test_commands_and_testing_flag() {
        let clock = Arc::new(ManualClock::new(0));
        let device = tracker(&clock);
        let mut manager = manager(SimulatedConnector::new().attach(path("/dev/ttyACM0"), device.clone()));
        assert!(manager.connect(true));

        assert!(manager.set_mode(Mode::Dynamic));
        assert!(manager.set_state(true));
        assert_eq!(device.mode(), Mode::Dynamic);
        assert_eq!(device.state(), DeviceState::Running);

        assert!(!manager.is_testing());
        assert!(manager.set_testing());
        assert!(manager.is_testing());
        assert_eq!(device.state(), DeviceState::Testing);
    }

    #[test]
    fn test_disconnect_pauses_device() {
        let clock = Arc::new(ManualClock::new(0));
        let device = tracker(&clock);
        let mut manager = manager(SimulatedConnector::new().attach(path("/dev/ttyACM0"), device.clone()));
        assert!(manager.connect(true));
        assert!(manager.set_testing());

        manager.disconnect();
        assert_eq!(manager.state(), LinkState::Disconnected);
        assert!(!manager.is_testing());
        assert_eq!(device.state(), DeviceState::Paused);
        assert_eq!(device.received().last(), Some(&Command::SetPaused));
    }

    #[test]
    fn test_command_connects_when_needed() {
        let clock = Arc::new(ManualClock::new(0));
        let device = tracker(&clock);
        let mut manager = manager(SimulatedConnector::new().attach(path("/dev/ttyACM0"), device.clone()));

        assert!(manager.set_state(true));
        assert!(manager.is_connected());
        assert_eq!(
            device.received(),
            vec![Command::QueryIdentity, Command::SetRunning]
        );
    }

    #[test]
    fn test_read_frame_connects_and_retries_once() {
        let clock = Arc::new(ManualClock::new(0));
        let device = tracker(&clock).with_frame_interval(0);
        let mut manager = manager(SimulatedConnector::new().attach(path("/dev/ttyACM0"), device));

        let frame = manager.read_frame().unwrap();
        assert_eq!(frame.mode, Mode::Static);
        assert!(manager.is_connected());
    }

    #[test]
    fn test_read_frame_without_any_device() {
        let mut manager = manager(SimulatedConnector::new().vacant(path("/dev/ttyACM0")));
        assert_eq!(manager.read_frame().unwrap_err(), LinkError::NotConnected);
        assert!(!manager.set_state(true));
    }

    #[test]
    fn test_transport_failure_disconnects() {
        let clock = Arc::new(ManualClock::new(0));
        let device = tracker(&clock).with_frame_interval(0);
        let mut manager = manager(SimulatedConnector::new().attach(path("/dev/ttyACM0"), device.clone()));
        assert!(manager.connect(true));

        device.unplug();
        assert_eq!(manager.read_frame().unwrap_err(), LinkError::NotConnected);
        assert_eq!(manager.state(), LinkState::Disconnected);

        device.replug();
        assert!(manager.read_frame().is_ok());
        assert_eq!(manager.connects(), 2);
    }

    #[test]
    fn test_reconnect_probes_from_first_candidate() {
        let clock = Arc::new(ManualClock::new(0));
        let first = tracker(&clock);
        let second = tracker(&clock);
        first.unplug();
        let connector = SimulatedConnector::new()
            .attach(path("/dev/ttyACM0"), first.clone())
            .attach(path("/dev/ttyACM1"), second);
        let mut manager = manager(connector);

        assert!(manager.connect(true));
        assert_eq!(manager.endpoint(), Some(&path("/dev/ttyACM1")));

        first.replug();
        manager.disconnect();
        assert!(manager.connect(true));
        assert_eq!(manager.endpoint(), Some(&path("/dev/ttyACM0")));
    }
}
