//! # ShoulderLink
//!
//! Adaptive posture-feedback thresholds and a resynchronizing serial link
//! for a wearable motion sensor.
//!
//! ## Key Features
//!
//! - **Fixed-memory percentiles**: a bounded, always-sorted window of
//!   per-second feature values answers threshold queries without re-sorting
//! - **Self-healing link**: frames resynchronize on their mode tag, and the
//!   host reconnects after repeated missed reads
//! - **Hardware optional**: an in-process simulated tracker speaks the
//!   device side of the protocol
//!
//! ## Quick Start
//!
//! ```rust
//! use shoulder_link::aggregator::ManualClock;
//! use shoulder_link::window::AdaptiveThreshold;
//!
//! let clock = ManualClock::new(0);
//! let mut threshold = AdaptiveThreshold::new(100.0, &clock);
//!
//! // Five seconds of samples, ten per second
//! for _ in 0..50 {
//!     threshold.store(25.0);
//!     clock.advance(100);
//! }
//!
//! // Two seed values plus one per completed second
//! assert_eq!(threshold.get_nb_points(), 6);
//! assert_eq!(threshold.get_threshold(50), 25.0);
//! ```
//!
//! ## Modules
//!
//! - [`filter`]: IIR smoothing of raw channels
//! - [`aggregator`]: per-second maxima and the millisecond clock
//! - [`window`]: order-statistics window and adaptive threshold
//! - [`protocol`]: commands, tags and the binary frame layout
//! - [`transport`]: byte pipes and endpoint probing
//! - [`link`]: command handshakes and frame synchronization
//! - [`connection`]: connection state machine
//! - [`device`]: device-side handler and the simulated tracker
//! - [`poller`]: host task queue and polling loop
//! - [`recovery`]: missed-read watchdog and retries
//! - [`metrics`]: link statistics
//! - [`config`]: configuration

// Modules
pub mod aggregator;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod filter;
pub mod link;
pub mod metrics;
pub mod poller;
pub mod protocol;
pub mod recovery;
pub mod transport;
pub mod window;

// Re-exports for convenient access
pub use aggregator::{Clock, FeatureSample, ManualClock, SystemClock, WindowAggregator};
pub use config::{Config, LinkConfig, PollConfig, ThresholdConfig};
pub use connection::{ConnectionManager, LinkSession, LinkState};
pub use device::{DeviceLink, SimulatedConnector, SimulatedDevice};
pub use error::{ConfigError, LinkError, Result};
pub use filter::SignalFilter;
pub use link::LinkProtocol;
pub use metrics::{LinkMetrics, ReadOutcome};
pub use poller::{FrameSink, PollContext, Poller, Task, TaskQueue};
pub use protocol::{Command, DeviceState, Mode, TelemetryFrame};
pub use recovery::{with_retry, LinkHealth, MissedReadWatchdog, RetryStrategy};
pub use transport::{Connector, Endpoint, LossyTransport, MemoryTransport, Transport};
#[cfg(feature = "serial")]
pub use transport::{SerialConnector, SerialTransport};
pub use window::{AdaptiveThreshold, OrderedWindow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
