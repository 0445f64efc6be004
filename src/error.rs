//! Error types for the link
//!
//! Every fallible operation on the host side returns one of these kinds.
//! Nothing panics across the protocol boundary.

use thiserror::Error;

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Failure kinds surfaced by the link protocol and the connection manager
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// No synchronization marker within the scan budget
    #[error("No frame marker found within {budget} read attempts")]
    SyncTimeout { budget: usize },

    /// Wrong byte count or unparseable payload
    #[error("Malformed frame: {reason}")]
    Malformed { reason: String },

    /// A field holds a value outside its recognized set
    #[error("Invalid field: {reason}")]
    Invalid { reason: String },

    /// No transport handle is open
    #[error("Not connected")]
    NotConnected,

    /// The endpoint answered, but not as a shoulder tracker
    #[error("Device mismatch on {endpoint}: replied {reply:?}")]
    DeviceMismatch { endpoint: String, reply: String },

    /// Transport-level read/write failure.
    ///
    /// Only produced below the connection manager, which closes the session and
    /// reports [`LinkError::NotConnected`] instead.
    #[error("Transport failure: {reason}")]
    Io { reason: String },
}

impl LinkError {
    /// Frame-level failures are dropped and counted by the polling loop.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Self::SyncTimeout { .. } | Self::Malformed { .. } | Self::Invalid { .. }
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Could not read the file
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// File contents are not a valid configuration
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
