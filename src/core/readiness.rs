use crate::domain::ports::ProcessSupervisor;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How long a port gets to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessMode {
    /// Port was already serving someone; only a sanity check.
    Known,
    /// Port was just (re)started.
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut { waited: Duration },
    Cancelled,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    interval: Duration,
    short_timeout: Duration,
    long_timeout: Duration,
}

impl Default for ReadinessWaiter {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            short_timeout: Duration::from_secs(3),
            long_timeout: Duration::from_secs(15),
        }
    }
}

impl ReadinessWaiter {
    pub fn new(interval: Duration, short_timeout: Duration, long_timeout: Duration) -> Self {
        Self {
            interval,
            short_timeout,
            long_timeout,
        }
    }

    pub fn timeout_for(&self, mode: ReadinessMode) -> Duration {
        match mode {
            ReadinessMode::Known => self.short_timeout,
            ReadinessMode::Fresh => self.long_timeout,
        }
    }

    /// Polls PID liveness, then the listening socket, until both pass, the
    /// timeout for `mode` elapses or `cancel` fires.
    pub async fn wait<P: ProcessSupervisor>(
        &self,
        supervisor: &P,
        port: u16,
        mode: ReadinessMode,
        cancel: &CancellationToken,
    ) -> Readiness {
        let timeout = self.timeout_for(mode);
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            if supervisor.is_alive(port).await && supervisor.is_listening(port).await {
                tracing::debug!("Port {} ready after {:?}", port, started.elapsed());
                return Readiness::Ready;
            }

            let now = Instant::now();
            if now >= deadline {
                return Readiness::TimedOut {
                    waited: now - started,
                };
            }

            let pause = self.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Readiness::Cancelled,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
