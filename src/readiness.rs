//! Bounded readiness polling for a provisioned host.
//!
//! Replaces a fixed pre-deploy delay with a TCP poll of the SSH port:
//! attempt a connection every interval until the deadline, so slow boots
//! are detected and fast ones waste no time.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::deploy::RemoteTarget;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors raised while waiting for a host to accept connections.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReadinessError {
    /// Raised when the host never accepted a connection before the
    /// deadline.
    #[error("{target} did not accept connections within {waited_secs}s")]
    Timeout {
        /// Address and port that were probed.
        target: String,
        /// Total seconds waited.
        waited_secs: u64,
    },
}

/// Polls a remote TCP port until it accepts connections or a deadline
/// passes.
#[derive(Clone, Copy, Debug)]
pub struct ReadinessProbe {
    poll_interval: Duration,
    wait_timeout: Duration,
    connect_timeout: Duration,
}

impl ReadinessProbe {
    /// Creates a probe with the default cadence.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Overrides the polling interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the overall wait deadline.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Overrides the per-attempt connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Waits until the target's SSH port accepts a TCP connection.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::Timeout`] when the deadline passes without
    /// a successful connection. Never hangs past the deadline plus one
    /// connect attempt.
    pub async fn wait_for_ssh(&self, target: &RemoteTarget) -> Result<(), ReadinessError> {
        let deadline = Instant::now() + self.wait_timeout;
        while Instant::now() <= deadline {
            let addr = (target.address, target.ssh_port);
            let connect = timeout(self.connect_timeout, TcpStream::connect(addr)).await;
            if matches!(connect, Ok(Ok(_))) {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }

        Err(ReadinessError::Timeout {
            target: format!("{}:{}", target.address, target.ssh_port),
            waited_secs: self.wait_timeout.as_secs(),
        })
    }
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self::new()
    }
}
