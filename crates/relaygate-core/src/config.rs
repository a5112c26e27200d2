//! Timeouts and sizing defaults.

use std::time::Duration;

/// Idle window before a silent connection is dropped.
pub const DEFAULT_READ_WAIT: Duration = Duration::from_secs(3 * 60);

/// Upper bound on a single write plus flush.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time a new connection has to complete its handshake.
pub const DEFAULT_LOGIN_WAIT: Duration = Duration::from_secs(10);

/// Interval between client heartbeats.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);

/// Capacity of a channel's outbound queue.
pub const DEFAULT_WRITE_QUEUE: usize = 5;

/// Number of workers dispatching inbound messages.
pub const DEFAULT_WORKERS: usize = 32;

/// Capacity of the inbound dispatch queue.
pub const DEFAULT_WORKER_QUEUE: usize = 1024;

/// Per-channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Read deadline, renewed on every frame
    pub read_wait: Duration,
    /// Deadline for each write batch
    pub write_wait: Duration,
    /// Outbound queue capacity
    pub queue_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_wait: DEFAULT_READ_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
            queue_capacity: DEFAULT_WRITE_QUEUE,
        }
    }
}

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Handshake deadline
    pub login_wait: Duration,
    /// Settings applied to every accepted channel
    pub channel: ChannelConfig,
    /// Dispatch workers
    pub workers: usize,
    /// Dispatch queue capacity
    pub worker_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            login_wait: DEFAULT_LOGIN_WAIT,
            channel: ChannelConfig::default(),
            workers: DEFAULT_WORKERS,
            worker_queue: DEFAULT_WORKER_QUEUE,
        }
    }
}

/// Outbound client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ping interval. `None` disables heartbeats and read deadlines.
    pub heartbeat: Option<Duration>,
    /// Read deadline used while heartbeats are enabled
    pub read_wait: Duration,
    /// Deadline for each send
    pub write_wait: Duration,
    /// Dial and handshake deadline
    pub dial_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat: Some(DEFAULT_HEARTBEAT),
            read_wait: DEFAULT_READ_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
            dial_timeout: DEFAULT_LOGIN_WAIT,
        }
    }
}
