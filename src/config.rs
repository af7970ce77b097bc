//! Connection configuration.
//!
//! [`ConnectionConfig`] can be built in code with the fluent `with_*` setters
//! or loaded from a JSON document. Missing fields fall back to the defaults.
//!
//! ```
//! use framewire::ConnectionConfig;
//!
//! let config = ConnectionConfig::from_json(r#"{ "incoming_capacity": 64 }"#).unwrap();
//! assert_eq!(config.incoming_capacity, 64);
//! assert_eq!(config.read_deadline, framewire::DEFAULT_DEADLINE);
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::protocol::{DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_READ_BUFFER_SIZE};
use crate::queue::DEFAULT_INCOMING_CAPACITY;

/// Interval after which an idle read task re-checks whether it should stop.
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(100);

/// Shortest read deadline a connection runs with. Shorter values are raised
/// to this so an idle read task waits instead of spinning.
pub const MIN_READ_DEADLINE: Duration = Duration::from_millis(1);

/// Default outgoing queue capacity (frames waiting for the writer task).
pub const DEFAULT_OUTGOING_CAPACITY: usize = 1024;

/// How long `close` waits for queued frames to reach the stream.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Largest content length accepted from the peer.
    pub max_content_length: u32,
    /// Decoded packets buffered before the read task stops reading.
    pub incoming_capacity: usize,
    /// Encoded frames buffered before `write_packet` waits.
    pub outgoing_capacity: usize,
    /// Initial read buffer capacity in bytes.
    pub read_buffer_size: usize,
    /// Read deadline, renewed before every read attempt (milliseconds in JSON).
    #[serde(with = "millis")]
    pub read_deadline: Duration,
    /// Upper bound on draining the outgoing queue during close (milliseconds in JSON).
    #[serde(with = "millis")]
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            incoming_capacity: DEFAULT_INCOMING_CAPACITY,
            outgoing_capacity: DEFAULT_OUTGOING_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_deadline: DEFAULT_DEADLINE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.incoming_capacity == 0 {
            return Err(Error::Config("incoming_capacity must be > 0".to_string()));
        }
        if self.outgoing_capacity == 0 {
            return Err(Error::Config("outgoing_capacity must be > 0".to_string()));
        }
        if self.read_deadline.is_zero() {
            return Err(Error::Config("read_deadline must be > 0".to_string()));
        }
        Ok(())
    }

    /// Raise settings the engine cannot run with to their minimums.
    pub(crate) fn normalized(mut self) -> Self {
        if self.read_deadline < MIN_READ_DEADLINE {
            tracing::warn!(
                "read_deadline {:?} is below {:?}, using the minimum",
                self.read_deadline,
                MIN_READ_DEADLINE
            );
            self.read_deadline = MIN_READ_DEADLINE;
        }
        self.incoming_capacity = self.incoming_capacity.max(1);
        self.outgoing_capacity = self.outgoing_capacity.max(1);
        self
    }

    pub fn with_max_content_length(mut self, max: u32) -> Self {
        self.max_content_length = max;
        self
    }

    pub fn with_incoming_capacity(mut self, capacity: usize) -> Self {
        self.incoming_capacity = capacity;
        self
    }

    pub fn with_outgoing_capacity(mut self, capacity: usize) -> Self {
        self.outgoing_capacity = capacity;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

mod millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
