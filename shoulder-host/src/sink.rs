//! Frame logging

use shoulder_link::poller::FrameSink;
use shoulder_link::protocol::TelemetryFrame;
use tracing::info;

/// Emits one structured record per accepted frame
#[derive(Debug, Default)]
pub struct TracingSink {
    frames: u64,
    feedback_frames: u64,
}

impl TracingSink {
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn feedback_frames(&self) -> u64 {
        self.feedback_frames
    }
}

impl FrameSink for TracingSink {
    fn accept(&mut self, frame: &TelemetryFrame, feedback: bool) {
        self.frames += 1;
        if feedback {
            self.feedback_frames += 1;
        }

        info!(
            target: "frames",
            mode = %frame.mode,
            state = %frame.state,
            device_time = frame.device_time,
            ch0 = frame.channels[0],
            ch1 = frame.channels[1],
            vel0 = frame.velocities[0],
            vel1 = frame.velocities[1],
            thresh0 = frame.thresholds[0],
            thresh1 = frame.thresholds[1],
            feedback
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoulder_link::protocol::{DeviceState, Mode};

    #[test]
    fn test_counts_frames() {
        let frame = TelemetryFrame {
            mode: Mode::Static,
            state: DeviceState::Running,
            device_time: 1.0,
            channels: [50.0, 10.0],
            velocities: [0.0, 0.0],
            thresholds: [40.0, 40.0],
        };
        let mut sink = TracingSink::default();
        sink.accept(&frame, true);
        sink.accept(&frame, false);
        assert_eq!(sink.frames(), 2);
        assert_eq!(sink.feedback_frames(), 1);
    }
}
