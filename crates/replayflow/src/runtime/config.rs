//! Runtime configuration.

use std::time::Duration;

/// Configuration for the [`TimerProcessor`](super::TimerProcessor).
///
/// Controls polling, leasing, and worker concurrency.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use replayflow::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     poll_interval: Duration::from_millis(50),
///     lease_duration: Duration::from_secs(60),
///     workers: 8,  // Dispatch up to 8 timers in parallel
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How often to poll for due timers.
    ///
    /// Timer precision is limited by this interval.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// How long a leased timer stays invisible to other pollers.
    ///
    /// Should be longer than the longest expected handler execution,
    /// including operation calls. A timer whose handler fails is retried
    /// after this duration.
    /// Default: 5 minutes.
    pub lease_duration: Duration,

    /// Maximum number of timers leased per poll.
    /// Default: 32.
    pub batch_size: usize,

    /// Number of timers dispatched concurrently.
    ///
    /// Timers are only leased when a worker slot is free, so a slow handler
    /// never holds leases it cannot start on.
    /// Default: 4.
    pub workers: usize,

    /// Maximum time to wait for in-flight dispatches during shutdown.
    ///
    /// After this timeout, the processor returns and abandons them; their
    /// timers are redelivered once the lease expires.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,

    /// Worker identifier used in logs.
    ///
    /// If `None`, a UUID is generated when the processor is created.
    pub worker_id: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            lease_duration: Duration::from_secs(300), // 5 minutes
            batch_size: 32,
            workers: 4,
            shutdown_timeout: Duration::from_secs(30),
            worker_id: None,
        }
    }
}
