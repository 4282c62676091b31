use crate::core::allocator::{ClaimRequest, PortAllocator};
use crate::core::snapshot::Snapshot;
use crate::core::target_resolver::{Exclusions, TargetResolver};
use crate::domain::model::{AssignmentRecord, TargetSpec, UpstreamSpec};
use crate::domain::ports::{ConfigStore, ProcessSupervisor};
use crate::utils::error::{ProxyError, Result};
use crate::utils::retry::RetryPolicy;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// What to provision and where the caller would like it.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionRequest<'a> {
    pub target: &'a TargetSpec,
    pub target_port: Option<u16>,
    pub preferred_port: Option<u16>,
    pub snapshot: &'a Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Provisioned {
    pub record: AssignmentRecord,
    pub attempts: u32,
}

/// Bookkeeping carried from one failed attempt to the next.
struct AttemptState {
    excluded_ports: HashSet<u16>,
    exclusions: Exclusions,
    preferred: Option<u16>,
    /// Attempt number and reason of the latest failed verification.
    last_failure: Option<(u32, String)>,
}

/// Result of bringing a recorded assignment back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    AlreadyRunning,
    Restarted,
}

pub struct EndpointProvisioner<S: ConfigStore, P: ProcessSupervisor> {
    store: S,
    supervisor: P,
    allocator: PortAllocator,
    targets: TargetResolver,
    retry: RetryPolicy,
    port_locks: StdMutex<HashMap<u16, Arc<Mutex<()>>>>,
}

impl<S: ConfigStore, P: ProcessSupervisor> EndpointProvisioner<S, P> {
    pub fn new(store: S, supervisor: P, allocator: PortAllocator, targets: TargetResolver) -> Self {
        Self {
            store,
            supervisor,
            allocator,
            targets,
            retry: RetryPolicy::default(),
            port_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn supervisor(&self) -> &P {
        &self.supervisor
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    /// Claims a port, records the assignment and brings the forwarder up.
    ///
    /// A failed attempt is rolled back and never retried on the same port;
    /// non-explicit targets also move on to a different server.
    pub async fn provision(&self, request: &ProvisionRequest<'_>) -> Result<Provisioned> {
        let state = Mutex::new(AttemptState {
            excluded_ports: HashSet::new(),
            exclusions: Exclusions::avoiding(request.snapshot.active_upstream_hosts()),
            preferred: request.preferred_port,
            last_failure: None,
        });

        let result = self
            .retry
            .run(
                |attempt| self.attempt(attempt, request, &state),
                ProxyError::is_retryable,
            )
            .await;

        // 埠號是被失敗的嘗試排除光的，回報真正的失敗原因
        match result {
            Err(ProxyError::NoAvailablePort { min, max }) => match state.into_inner().last_failure {
                Some((attempts, message)) => {
                    tracing::debug!("Range {}-{} exhausted by failed attempts", min, max);
                    Err(ProxyError::ProvisioningFailed { attempts, message })
                }
                None => Err(ProxyError::NoAvailablePort { min, max }),
            },
            other => other,
        }
    }

    async fn attempt(
        &self,
        attempt: u32,
        request: &ProvisionRequest<'_>,
        state: &Mutex<AttemptState>,
    ) -> Result<Provisioned> {
        let (exclusions, excluded_ports, preferred) = {
            let state = state.lock().await;
            (
                state.exclusions.clone(),
                state.excluded_ports.clone(),
                state.preferred,
            )
        };

        let resolved = self
            .targets
            .resolve(request.target, request.target_port, &exclusions)
            .await?;
        let upstream = resolved.upstream.clone();

        let record = self
            .allocator
            .claim(
                &self.store,
                ClaimRequest {
                    snapshot: request.snapshot,
                    preferred,
                    excluded: &excluded_ports,
                },
                |port| AssignmentRecord {
                    local_port: port,
                    provider: upstream.provider.clone(),
                    upstream_host: upstream.host.clone(),
                    upstream_port: upstream.port,
                    country: resolved.country.clone(),
                    created_at: Utc::now(),
                },
            )
            .await?;
        let port = record.local_port;

        match self.bring_up(port, &upstream).await {
            Ok(()) => {
                tracing::info!("Provisioned port {} -> {} (attempt {})", port, upstream, attempt);
                Ok(Provisioned { record, attempts: attempt })
            }
            Err(reason) => {
                tracing::warn!("Port {} -> {} failed verification: {}", port, upstream, reason);

                if let Err(e) = self.supervisor.stop(port).await {
                    tracing::debug!("Stopping failed port {} also failed: {}", port, e);
                }
                if let Err(e) = self.allocator.release(&self.store, port).await {
                    tracing::warn!("Could not roll back record for port {}: {}", port, e);
                }

                let message = format!("port {} -> {}: {}", port, upstream, reason);
                let mut state = state.lock().await;
                state.excluded_ports.insert(port);
                state.preferred = None;
                state.last_failure = Some((attempt, message.clone()));
                if !request.target.is_explicit() {
                    state.exclusions.mark_failed(&upstream.host);
                }

                Err(ProxyError::ProvisioningFailed {
                    attempts: attempt,
                    message,
                })
            }
        }
    }

    /// Brings a recorded assignment back on its own port unless it is
    /// already running. Concurrent calls for one port are serialized, so
    /// only the first restarts the forwarder.
    pub async fn restore(&self, record: &AssignmentRecord) -> Result<RestoreOutcome> {
        let port_lock = self.port_lock(record.local_port);
        let _guard = port_lock.lock().await;

        if self.supervisor.is_alive(record.local_port).await {
            return Ok(RestoreOutcome::AlreadyRunning);
        }
        self.reprovision(record).await?;
        Ok(RestoreOutcome::Restarted)
    }

    fn port_lock(&self, port: u16) -> Arc<Mutex<()>> {
        let mut locks = self
            .port_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(port).or_default().clone()
    }

    /// Restarts an existing assignment on its own port.
    pub async fn reprovision(&self, record: &AssignmentRecord) -> Result<()> {
        let upstream = record.upstream();
        self.bring_up(record.local_port, &upstream)
            .await
            .map_err(|message| ProxyError::ProvisioningFailed {
                attempts: 1,
                message: format!("port {} -> {}: {}", record.local_port, upstream, message),
            })?;
        tracing::info!("Restarted port {} -> {}", record.local_port, upstream);
        Ok(())
    }

    async fn bring_up(&self, port: u16, upstream: &UpstreamSpec) -> std::result::Result<(), String> {
        self.supervisor
            .restart(port, upstream)
            .await
            .map_err(|e| e.to_string())?;

        if !self.supervisor.is_alive(port).await {
            return Err("process not alive after restart".to_string());
        }
        Ok(())
    }
}
