// ShoulderLink - wearable posture feedback link
// Copyright (c) The ShoulderLink developers
//
// Licensed under the MIT license.
// See LICENSE file for details.


//! Link protocol
//!
//! Drives the two exchanges over one transport: ASCII command handshakes
//! with their settle delays, and binary frame synchronization.
//!
//! Only one exchange is ever in flight; every method borrows the transport
//! mutably for its whole duration.

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::protocol::{Command, Mode, TelemetryFrame, PAYLOAD_LEN, SYNC_BUDGET};
use crate::transport::{Endpoint, Transport};
use log::debug;
use std::time::Duration;

fn settle(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Stateless protocol driver; timing comes from [`LinkConfig`]
#[derive(Debug, Clone, Default)]
pub struct LinkProtocol {
    config: LinkConfig,
}

impl LinkProtocol {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Send `command` and return whatever the device answered within the
    /// settle delay.
    fn exchange(&self, transport: &mut dyn Transport, command: Command) -> Result<Vec<u8>> {
        transport.clear_input()?;
        transport.write_all(command.as_bytes())?;

        settle(match command {
            Command::QueryIdentity => self.config.identity_settle_ms,
            _ => self.config.command_settle_ms,
        });

        let mut reply = vec![0u8; self.config.reply_capacity];
        let mut len = 0;
        while len < reply.len() {
            let n = transport.read(&mut reply[len..])?;
            if n == 0 {
                break;
            }
            len += n;
        }
        reply.truncate(len);
        transport.clear_input()?;

        debug!("{} -> {:?}", command, String::from_utf8_lossy(&reply));
        Ok(reply)
    }

    /// Send a command and check its acknowledgement.
    ///
    /// Mode changes additionally wait for the device to reinitialize once
    /// acknowledged. Returns the raw reply.
    pub fn command(&self, transport: &mut dyn Transport, command: Command) -> Result<Vec<u8>> {
        let reply = self.exchange(transport, command)?;

        if reply.is_empty() {
            return Err(LinkError::malformed(format!("no reply to {}", command)));
        }
        if !command.accepts(&reply) {
            return Err(LinkError::invalid(format!(
                "{} rejected: {:?}",
                command,
                String::from_utf8_lossy(&reply)
            )));
        }

        if command.needs_mode_settle() {
            settle(self.config.mode_settle_ms);
        }
        Ok(reply)
    }

    /// Check that `endpoint` hosts the expected device.
    ///
    /// Any reply other than the identity literal (including silence) is a
    /// [`LinkError::DeviceMismatch`]; only transport failures pass through
    /// as they are.
    pub fn identify(&self, transport: &mut dyn Transport, endpoint: &Endpoint) -> Result<()> {
        let reply = self.exchange(transport, Command::QueryIdentity)?;
        if Command::QueryIdentity.accepts(&reply) {
            Ok(())
        } else {
            Err(LinkError::DeviceMismatch {
                endpoint: endpoint.to_string(),
                reply: String::from_utf8_lossy(&reply).into_owned(),
            })
        }
    }

    /// Synchronize on the next mode tag and decode the frame behind it.
    ///
    /// The scan allows [`SYNC_BUDGET`] read attempts; an attempt that
    /// returns no byte still uses one up.
    pub fn read_frame(&self, transport: &mut dyn Transport) -> Result<TelemetryFrame> {
        let mode = self.synchronize(transport)?;

        let mut payload = [0u8; PAYLOAD_LEN];
        let mut len = 0;
        while len < PAYLOAD_LEN {
            let n = transport.read(&mut payload[len..])?;
            if n == 0 {
                break;
            }
            len += n;
        }

        if self.config.flush_after_frame {
            transport.clear_input()?;
        }

        TelemetryFrame::decode(mode, &payload[..len])
    }

    fn synchronize(&self, transport: &mut dyn Transport) -> Result<Mode> {
        let mut byte = [0u8; 1];
        for _ in 0..SYNC_BUDGET {
            if transport.read(&mut byte)? == 0 {
                settle(self.config.byte_poll_delay_ms);
                continue;
            }
            if let Some(mode) = Mode::from_u8(byte[0]) {
                return Ok(mode);
            }
        }
        Err(LinkError::SyncTimeout {
            budget: SYNC_BUDGET,
        })
    }
}
