//! Registry configuration

use std::time::Duration;

use crate::events::DEFAULT_EVENT_CAPACITY;

/// Timing and buffering options for the relay registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long `add_source` waits for the console to accept
    pub connect_timeout: Duration,

    /// Read timeout on source sockets; also the inactivity detection tick
    pub read_timeout: Duration,

    /// Upper bound on a single write to a viewer before it is dropped
    pub write_timeout: Duration,

    /// Period of liveness tokens sent to viewers that are not yet relaying
    pub liveness_interval: Duration,

    /// Bytes read from a source per call
    pub read_buffer_size: usize,

    /// Events buffered per event-bus subscriber
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(2),
            liveness_interval: Duration::from_secs(3),
            read_buffer_size: 64 * 1024, // 64KB
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RegistryConfig {
    /// Set the console connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the source read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the viewer write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the liveness token period
    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Set the source read buffer size (at least 1 byte)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the event bus capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
