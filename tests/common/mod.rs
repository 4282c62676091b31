#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use vpn_proxy_pool::adapters::catalog::{ProviderSettings, StaticCatalog};
use vpn_proxy_pool::core::allocator::{PortAllocator, PortRange};
use vpn_proxy_pool::core::provisioner::EndpointProvisioner;
use vpn_proxy_pool::core::readiness::ReadinessWaiter;
use vpn_proxy_pool::core::target_resolver::TargetResolver;
use vpn_proxy_pool::domain::model::{ProfileRecord, ProviderServer, ResolveRequest, UpstreamSpec};
use vpn_proxy_pool::domain::ports::{ConfigStore, ProcessSupervisor, ProviderCatalog};
use vpn_proxy_pool::utils::retry::RetryPolicy;
use vpn_proxy_pool::{ProxyError, ProxyResolver, Result};

/// Supervisor double: keeps running forwarders in memory and refuses to
/// start any upstream host listed in `refused_hosts`. A `never_listening`
/// supervisor starts forwarders that never accept connections.
#[derive(Clone, Default)]
pub struct ScriptedSupervisor {
    refused_hosts: Arc<HashSet<String>>,
    never_listening: bool,
    running: Arc<Mutex<HashMap<u16, UpstreamSpec>>>,
    calls: Arc<Mutex<Vec<String>>>,
    listening_checks: Arc<AtomicUsize>,
}

impl ScriptedSupervisor {
    pub fn refusing(hosts: &[&str]) -> Self {
        Self {
            refused_hosts: Arc::new(hosts.iter().map(|h| h.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn never_listening() -> Self {
        Self {
            never_listening: true,
            ..Default::default()
        }
    }

    /// How many times readiness was polled.
    pub fn listening_checks(&self) -> usize {
        self.listening_checks.load(Ordering::SeqCst)
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn running(&self) -> HashMap<u16, UpstreamSpec> {
        self.running.lock().await.clone()
    }
}

impl ProcessSupervisor for ScriptedSupervisor {
    async fn start(&self, port: u16, upstream: &UpstreamSpec) -> Result<()> {
        self.restart(port, upstream).await
    }

    async fn restart(&self, port: u16, upstream: &UpstreamSpec) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(format!("restart {} {}", port, upstream.host));
        if self.refused_hosts.contains(&upstream.host) {
            return Err(ProxyError::SupervisorError {
                message: format!("{} refused the connection", upstream.host),
            });
        }
        self.running.lock().await.insert(port, upstream.clone());
        Ok(())
    }

    async fn stop(&self, port: u16) -> Result<()> {
        self.calls.lock().await.push(format!("stop {}", port));
        self.running.lock().await.remove(&port);
        Ok(())
    }

    async fn is_alive(&self, port: u16) -> bool {
        self.running.lock().await.contains_key(&port)
    }

    async fn is_listening(&self, port: u16) -> bool {
        self.listening_checks.fetch_add(1, Ordering::SeqCst);
        !self.never_listening && self.is_alive(port).await
    }
}

pub fn server(id: u64, hostname: &str, country: &str) -> ProviderServer {
    ProviderServer {
        id,
        hostname: hostname.to_string(),
        country: country.to_string(),
        load: 20,
        tier: "standard".to_string(),
        status: "online".to_string(),
    }
}

/// Two providers: nordvpn (port 89) and protonvpn (port 1080).
pub fn catalogs() -> Vec<Arc<dyn ProviderCatalog>> {
    let nord: Arc<dyn ProviderCatalog> = Arc::new(StaticCatalog::new(
        ProviderSettings::new("nordvpn", &["nordvpn.com"], 89),
        vec![
            server(1, "vn42.nordvpn.com", "VN"),
            server(2, "vn43.nordvpn.com", "VN"),
            server(3, "us7.nordvpn.com", "US"),
        ],
    ));
    let proton: Arc<dyn ProviderCatalog> = Arc::new(StaticCatalog::new(
        ProviderSettings::new("protonvpn", &["protonvpn.net"], 1080),
        vec![
            server(10, "jp-free-1.protonvpn.net", "JP"),
            server(11, "uk-12.protonvpn.net", "GB"),
        ],
    ));
    vec![nord, proton]
}

pub fn resolver<S: ConfigStore>(
    store: S,
    supervisor: ScriptedSupervisor,
    range: PortRange,
) -> ProxyResolver<S, ScriptedSupervisor> {
    resolver_with_readiness(
        store,
        supervisor,
        range,
        ReadinessWaiter::new(
            Duration::from_millis(5),
            Duration::from_millis(30),
            Duration::from_millis(100),
        ),
    )
}

pub fn resolver_with_readiness<S: ConfigStore>(
    store: S,
    supervisor: ScriptedSupervisor,
    range: PortRange,
    readiness: ReadinessWaiter,
) -> ProxyResolver<S, ScriptedSupervisor> {
    let provisioner = EndpointProvisioner::new(
        store,
        supervisor,
        PortAllocator::new(range),
        TargetResolver::new(catalogs()),
    )
    .with_retry(RetryPolicy::immediate(10));

    ProxyResolver::new(provisioner).with_readiness(readiness)
}

pub fn request(descriptor: &str, active: &[&str]) -> ResolveRequest {
    ResolveRequest {
        descriptor: descriptor.to_string(),
        active_profiles: active
            .iter()
            .map(|proxy| ProfileRecord {
                proxy: Some(proxy.to_string()),
            })
            .collect(),
    }
}
