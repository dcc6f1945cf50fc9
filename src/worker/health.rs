use crate::config::SupervisorConfig;
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A single readiness check against the worker.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` only for a success status received within `timeout`.
    async fn probe(&self, timeout: Duration) -> bool;
}

/// Polls a probe at a fixed cadence until it succeeds or the deadline passes.
#[derive(Debug, Clone, Copy)]
pub struct HealthGate {
    interval: Duration,
    timeout: Duration,
    probe_timeout: Duration,
}

impl HealthGate {
    /// A zero interval is raised to 1ms so probes always get a usable budget.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        Self {
            interval,
            timeout,
            probe_timeout: interval.mul_f32(0.8),
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.health_interval(), config.health_timeout())
            .with_probe_timeout(config.probe_timeout())
    }

    /// Per-probe limit; values not below the interval are ignored.
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        if probe_timeout < self.interval && !probe_timeout.is_zero() {
            self.probe_timeout = probe_timeout;
        } else {
            warn!(
                ?probe_timeout,
                interval = ?self.interval,
                "Probe timeout must be below the polling interval, keeping {:?}",
                self.probe_timeout
            );
        }
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Returns the number of probes issued once healthy.
    pub async fn wait<P: HealthProbe + ?Sized>(&self, probe: &P) -> Result<u32> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut attempts = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let limit = self.probe_timeout.min(deadline - now);
            attempts += 1;
            let healthy = timeout(limit, probe.probe(limit)).await.unwrap_or(false);
            if healthy {
                info!(
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Worker health check passed"
                );
                return Ok(attempts);
            }
            debug!(attempts, "Worker not ready yet");

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.interval.min(deadline - now)).await;
        }

        warn!(attempts, timeout = ?self.timeout, "Worker health check timed out");
        Err(RpcError::HealthCheckTimeout(self.timeout))
    }
}
