use crate::adapters::store::load_all;
use crate::core::matcher::{decide, Decision};
use crate::core::parser::{parse_descriptor, ParsedRequest};
use crate::core::provisioner::{EndpointProvisioner, ProvisionRequest, RestoreOutcome};
use crate::core::readiness::{Readiness, ReadinessMode, ReadinessWaiter};
use crate::core::snapshot::Snapshot;
use crate::domain::model::{AssignmentRecord, ProxyDescriptor, ResolveRequest};
use crate::domain::ports::{ConfigStore, ProcessSupervisor};
use crate::utils::error::{ProxyError, Result};
use serde::Serialize;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// How a resolution was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionAction {
    /// An endpoint already serving the target was handed back.
    Reused,
    /// The caller was pointed at another port with the same upstream.
    Redirected,
    /// A dead endpoint with a matching record was restarted on its port.
    Restored,
    /// The requested port was free and a new endpoint was provisioned.
    Created,
    /// The requested port belongs to someone else; a new port was provisioned.
    Reassigned,
}

impl ResolutionAction {
    fn readiness_mode(self) -> ReadinessMode {
        match self {
            Self::Reused | Self::Redirected => ReadinessMode::Known,
            Self::Restored | Self::Created | Self::Reassigned => ReadinessMode::Fresh,
        }
    }
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Reused => "reused",
            Self::Redirected => "redirected",
            Self::Restored => "restored",
            Self::Created => "created",
            Self::Reassigned => "reassigned",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub descriptor: ProxyDescriptor,
    pub action: ResolutionAction,
    /// False when the readiness wait timed out.
    pub ready: bool,
    pub attempts: u32,
}

pub struct ProxyResolver<S: ConfigStore, P: ProcessSupervisor> {
    provisioner: EndpointProvisioner<S, P>,
    readiness: ReadinessWaiter,
}

impl<S: ConfigStore, P: ProcessSupervisor> ProxyResolver<S, P> {
    pub fn new(provisioner: EndpointProvisioner<S, P>) -> Self {
        Self {
            provisioner,
            readiness: ReadinessWaiter::default(),
        }
    }

    pub fn with_readiness(mut self, readiness: ReadinessWaiter) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn provisioner(&self) -> &EndpointProvisioner<S, P> {
        &self.provisioner
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveOutcome> {
        self.resolve_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Resolves one descriptor against the caller's active profiles.
    ///
    /// Fails fast on a malformed descriptor. A readiness timeout is not an
    /// error; the outcome comes back with `ready == false`.
    pub async fn resolve_with_cancel(
        &self,
        request: &ResolveRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolveOutcome> {
        let parsed = parse_descriptor(&request.descriptor)?;
        let snapshot = Snapshot::build(&request.active_profiles);
        let decision = decide(&parsed, &snapshot);

        tracing::info!(
            "Resolving {} (target {}, {} active profiles): {}",
            parsed.descriptor,
            parsed.target,
            snapshot.len(),
            decision.kind()
        );

        let (descriptor, action, attempts) = match decision {
            Decision::Reuse(descriptor) => (descriptor, ResolutionAction::Reused, 0),
            Decision::Redirect(descriptor) => (descriptor, ResolutionAction::Redirected, 0),
            Decision::Reassign {
                requested_port,
                occupant,
            } => {
                self.reassign(&parsed, &snapshot, requested_port, occupant)
                    .await?
            }
            Decision::CreateNew { requested_port } => {
                self.create(&parsed, &snapshot, requested_port).await?
            }
        };

        if cancel.is_cancelled() {
            return Err(ProxyError::Cancelled);
        }

        let port = descriptor.local_port;
        let ready = match self
            .readiness
            .wait(
                self.provisioner.supervisor(),
                port,
                action.readiness_mode(),
                cancel,
            )
            .await
        {
            Readiness::Ready => true,
            Readiness::TimedOut { waited } => {
                let timeout = ProxyError::ReadinessTimeout {
                    port,
                    waited_ms: waited.as_millis() as u64,
                };
                tracing::warn!("{}; returning {} anyway", timeout, descriptor);
                false
            }
            Readiness::Cancelled => return Err(ProxyError::Cancelled),
        };

        tracing::info!("Resolved {} -> {} ({})", request.descriptor, descriptor, action);
        Ok(ResolveOutcome {
            descriptor,
            action,
            ready,
            attempts,
        })
    }

    async fn reassign(
        &self,
        parsed: &ParsedRequest,
        snapshot: &Snapshot,
        requested_port: u16,
        occupant: ProxyDescriptor,
    ) -> Result<(ProxyDescriptor, ResolutionAction, u32)> {
        // 國家或隨機目標：佔用者可能就是上次為同一請求建立的端點
        if !parsed.target.is_explicit() {
            if let Some(record) = self.provisioner.store().read(requested_port).await? {
                if record.satisfies(&parsed.target) && occupant_matches(&occupant, &record) {
                    tracing::debug!("Port {} already serves {}", requested_port, parsed.target);
                    return Ok((occupant, ResolutionAction::Reused, 0));
                }
            }
        }

        tracing::info!(
            "Port {} is held by {}, provisioning {} elsewhere",
            requested_port,
            occupant,
            parsed.target
        );
        let provisioned = self
            .provisioner
            .provision(&ProvisionRequest {
                target: &parsed.target,
                target_port: parsed.descriptor.upstream_port,
                preferred_port: None,
                snapshot,
            })
            .await?;

        Ok((
            parsed.descriptor.rebind(&provisioned.record),
            ResolutionAction::Reassigned,
            provisioned.attempts,
        ))
    }

    async fn create(
        &self,
        parsed: &ParsedRequest,
        snapshot: &Snapshot,
        requested_port: u16,
    ) -> Result<(ProxyDescriptor, ResolutionAction, u32)> {
        let range = self.provisioner.allocator().range();
        let mut preferred = None;

        if range.contains(requested_port) {
            match self.provisioner.store().read(requested_port).await? {
                Some(record) if record.satisfies(&parsed.target) => {
                    let descriptor = parsed.descriptor.rebind(&record);
                    match self.provisioner.restore(&record).await {
                        Ok(RestoreOutcome::AlreadyRunning) => {
                            return Ok((descriptor, ResolutionAction::Reused, 0))
                        }
                        Ok(RestoreOutcome::Restarted) => {
                            return Ok((descriptor, ResolutionAction::Restored, 1))
                        }
                        Err(e) => tracing::warn!(
                            "Could not restart port {}: {}; allocating a new port",
                            requested_port,
                            e
                        ),
                    }
                }
                Some(record) => tracing::debug!(
                    "Port {} is recorded for {}, allocating a new port",
                    requested_port,
                    record.upstream()
                ),
                None => preferred = Some(requested_port),
            }
        } else {
            tracing::debug!(
                "Port {} is outside {}-{}, allocating a new port",
                requested_port,
                range.min,
                range.max
            );
        }

        let provisioned = self
            .provisioner
            .provision(&ProvisionRequest {
                target: &parsed.target,
                target_port: parsed.descriptor.upstream_port,
                preferred_port: preferred,
                snapshot,
            })
            .await?;

        Ok((
            parsed.descriptor.rebind(&provisioned.record),
            ResolutionAction::Created,
            provisioned.attempts,
        ))
    }

    /// Every persisted assignment, ordered by port.
    pub async fn list_assignments(&self) -> Result<Vec<AssignmentRecord>> {
        load_all(self.provisioner.store()).await
    }
}

fn occupant_matches(occupant: &ProxyDescriptor, record: &AssignmentRecord) -> bool {
    occupant.upstream_host.eq_ignore_ascii_case(&record.upstream_host)
        && occupant.upstream_port == Some(record.upstream_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::catalog::{ProviderSettings, StaticCatalog};
    use crate::adapters::store::MemoryConfigStore;
    use crate::adapters::supervisor::DryRunSupervisor;
    use crate::core::allocator::{PortAllocator, PortRange};
    use crate::core::target_resolver::TargetResolver;
    use crate::domain::model::{ProfileRecord, ProviderServer};
    use crate::domain::ports::ProviderCatalog;
    use crate::utils::retry::RetryPolicy;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn server(id: u64, host: &str, country: &str) -> ProviderServer {
        ProviderServer {
            id,
            hostname: host.into(),
            country: country.into(),
            load: 10,
            tier: String::new(),
            status: "online".into(),
        }
    }

    fn resolver(range: PortRange) -> ProxyResolver<MemoryConfigStore, DryRunSupervisor> {
        let nord: Arc<dyn ProviderCatalog> = Arc::new(StaticCatalog::new(
            ProviderSettings::new("nordvpn", &["nordvpn.com"], 89),
            vec![server(1, "vn42.nordvpn.com", "VN"), server(2, "us7.nordvpn.com", "US")],
        ));
        let proton: Arc<dyn ProviderCatalog> = Arc::new(StaticCatalog::new(
            ProviderSettings::new("protonvpn", &["protonvpn.net"], 1080),
            vec![server(10, "jp-free-1.protonvpn.net", "JP")],
        ));

        let provisioner = EndpointProvisioner::new(
            MemoryConfigStore::new(),
            DryRunSupervisor::new(),
            PortAllocator::new(range),
            TargetResolver::new(vec![nord, proton]),
        )
        .with_retry(RetryPolicy::immediate(5));

        ProxyResolver::new(provisioner).with_readiness(ReadinessWaiter::new(
            Duration::from_millis(5),
            Duration::from_millis(20),
            Duration::from_millis(50),
        ))
    }

    fn request(descriptor: &str, active: &[&str]) -> ResolveRequest {
        ResolveRequest {
            descriptor: descriptor.to_string(),
            active_profiles: active
                .iter()
                .map(|p| ProfileRecord {
                    proxy: Some(p.to_string()),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_invalid_descriptor_fails_fast() {
        let r = resolver(PortRange::default());
        let result = r.resolve(&request("socks5://localhost", &[])).await;
        assert!(matches!(result, Err(ProxyError::InvalidDescriptor { .. })));
    }

    #[tokio::test]
    async fn test_exact_match_is_returned_unchanged() {
        let r = resolver(PortRange::default());
        let active = "socks5://localhost:7891:vn42.nordvpn.com:89";

        let outcome = r.resolve(&request(active, &[active])).await.unwrap();
        assert_eq!(outcome.action, ResolutionAction::Reused);
        assert_eq!(outcome.descriptor.to_string(), active);
        // nothing runs in the dry-run supervisor, so the short wait expires
        assert!(!outcome.ready);
    }

    #[tokio::test]
    async fn test_cross_port_redirect() {
        let r = resolver(PortRange::default());
        let outcome = r
            .resolve(&request(
                "socks5://localhost:7895:VN42.nordvpn.com:89",
                &["socks5://localhost:7891:vn42.nordvpn.com:89"],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.action, ResolutionAction::Redirected);
        assert_eq!(
            outcome.descriptor.to_string(),
            "socks5://localhost:7891:vn42.nordvpn.com:89"
        );
    }

    #[tokio::test]
    async fn test_redirect_answers_in_requested_scheme() {
        let r = resolver(PortRange::default());
        let outcome = r
            .resolve(&request(
                "http://127.0.0.1:7895:vn42.nordvpn.com:89",
                &["socks5://localhost:7891:vn42.nordvpn.com:89"],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.action, ResolutionAction::Redirected);
        assert_eq!(
            outcome.descriptor.to_string(),
            "http://127.0.0.1:7891:vn42.nordvpn.com:89"
        );
    }

    #[tokio::test]
    async fn test_create_at_requested_port() {
        let r = resolver(PortRange::default());
        let outcome = r
            .resolve(&request("socks5://localhost:7893:vn42.nordvpn.com:89", &[]))
            .await
            .unwrap();

        assert_eq!(outcome.action, ResolutionAction::Created);
        assert!(outcome.ready);
        assert_eq!(
            outcome.descriptor.to_string(),
            "socks5://localhost:7893:vn42.nordvpn.com:89"
        );
        assert!(r.provisioner().supervisor().is_alive(7893).await);
    }

    #[tokio::test]
    async fn test_same_port_conflict_moves_to_first_free_port() {
        let r = resolver(PortRange::default());
        let outcome = r
            .resolve(&request(
                "socks5://localhost:7891:vn42.nordvpn.com:89",
                &[
                    "socks5://localhost:7891:us7.nordvpn.com:89",
                    "socks5://localhost:7892:jp-free-1.protonvpn.net:1080",
                ],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.action, ResolutionAction::Reassigned);
        assert_eq!(
            outcome.descriptor.to_string(),
            "socks5://localhost:7893:vn42.nordvpn.com:89"
        );
        assert_eq!(r.provisioner().store().list().await.unwrap(), vec![7893]);
    }

    #[tokio::test]
    async fn test_country_request_is_idempotent() {
        let r = resolver(PortRange::default());
        let first = r
            .resolve(&request("socks5://localhost:7891:vn", &[]))
            .await
            .unwrap();
        assert_eq!(first.action, ResolutionAction::Created);
        assert_eq!(
            first.descriptor.to_string(),
            "socks5://localhost:7891:vn42.nordvpn.com:89"
        );

        // the profile now carries the resolved descriptor
        let active = first.descriptor.to_string();
        let second = r
            .resolve(&request("socks5://localhost:7891:vn", &[active.as_str()]))
            .await
            .unwrap();
        assert_eq!(second.action, ResolutionAction::Reused);
        assert_eq!(second.descriptor, first.descriptor);

        // and without any active profile the record itself is reused
        let third = r
            .resolve(&request("socks5://localhost:7891:vn", &[]))
            .await
            .unwrap();
        assert_eq!(third.action, ResolutionAction::Reused);
        assert_eq!(third.descriptor, first.descriptor);
    }

    #[tokio::test]
    async fn test_unknown_country_falls_back_to_random() {
        let r = resolver(PortRange::default());
        let outcome = r
            .resolve(&request("socks5://localhost:7891:zz", &[]))
            .await
            .unwrap();

        assert_eq!(outcome.action, ResolutionAction::Created);
        assert_eq!(outcome.descriptor.local_port, 7891);
        assert!(!outcome.descriptor.upstream_host.is_empty());
    }

    #[tokio::test]
    async fn test_busy_record_for_other_target_allocates_new_port() {
        let r = resolver(PortRange::new(7891, 7895));
        r.provisioner()
            .store()
            .write(
                7891,
                &AssignmentRecord {
                    local_port: 7891,
                    provider: "nordvpn".into(),
                    upstream_host: "us7.nordvpn.com".into(),
                    upstream_port: 89,
                    country: Some("US".into()),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let outcome = r
            .resolve(&request("socks5://localhost:7891:vn42.nordvpn.com:89", &[]))
            .await
            .unwrap();

        assert_eq!(outcome.action, ResolutionAction::Created);
        assert_eq!(outcome.descriptor.local_port, 7892);
        // the un-owned record is left alone
        assert_eq!(r.provisioner().store().list().await.unwrap(), vec![7891, 7892]);
    }

    #[tokio::test]
    async fn test_dead_matching_record_is_restored_in_place() {
        let r = resolver(PortRange::default());
        r.provisioner()
            .store()
            .write(
                7894,
                &AssignmentRecord {
                    local_port: 7894,
                    provider: "nordvpn".into(),
                    upstream_host: "vn42.nordvpn.com".into(),
                    upstream_port: 89,
                    country: Some("VN".into()),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let outcome = r
            .resolve(&request("socks5://localhost:7894:vn", &[]))
            .await
            .unwrap();

        assert_eq!(outcome.action, ResolutionAction::Restored);
        assert!(outcome.ready);
        assert_eq!(
            outcome.descriptor.to_string(),
            "socks5://localhost:7894:vn42.nordvpn.com:89"
        );
    }

    #[tokio::test]
    async fn test_full_range_reports_no_available_port() {
        let r = resolver(PortRange::new(7891, 7892));
        let result = r
            .resolve(&request(
                "socks5://localhost:7891:vn42.nordvpn.com:89",
                &[
                    "socks5://localhost:7891:us7.nordvpn.com:89",
                    "socks5://localhost:7892:jp-free-1.protonvpn.net:1080",
                ],
            ))
            .await;

        assert!(matches!(result, Err(ProxyError::NoAvailablePort { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_readiness() {
        let r = resolver(PortRange::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = r
            .resolve_with_cancel(
                &request("socks5://localhost:7891:vn42.nordvpn.com:89", &[]),
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(ProxyError::Cancelled)));
    }

    #[tokio::test]
    async fn test_list_assignments_sorted() {
        let r = resolver(PortRange::default());
        r.resolve(&request("socks5://localhost:7895:us", &[])).await.unwrap();
        r.resolve(&request("socks5://localhost:7892:vn", &[])).await.unwrap();

        let records = r.list_assignments().await.unwrap();
        let ports: Vec<u16> = records.iter().map(|r| r.local_port).collect();
        assert_eq!(ports, vec![7892, 7895]);
    }
}
