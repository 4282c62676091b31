use crate::domain::model::{ProviderServer, TargetSpec, UpstreamSpec};
use crate::domain::ports::ProviderCatalog;
use crate::utils::error::{ProxyError, Result};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A concrete upstream chosen for a target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub server: ProviderServer,
    pub upstream: UpstreamSpec,
    pub country: Option<String>,
}

/// Hosts to keep out of the selection, lower-cased.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    /// Servers that failed verification during this resolution. Never picked.
    pub failed: HashSet<String>,
    /// Servers already serving other profiles. Picked only if nothing else is left.
    pub avoid: HashSet<String>,
}

impl Exclusions {
    pub fn avoiding(avoid: HashSet<String>) -> Self {
        Self {
            failed: HashSet::new(),
            avoid,
        }
    }

    pub fn mark_failed(&mut self, host: &str) {
        self.failed.insert(host.to_ascii_lowercase());
    }
}

pub struct TargetResolver {
    catalogs: Vec<Arc<dyn ProviderCatalog>>,
    country_aliases: HashMap<String, String>,
}

impl TargetResolver {
    pub fn new(catalogs: Vec<Arc<dyn ProviderCatalog>>) -> Self {
        Self {
            catalogs,
            country_aliases: HashMap::new(),
        }
    }

    pub fn with_country_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.country_aliases = aliases
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v.to_ascii_uppercase()))
            .collect();
        self
    }

    pub fn catalogs(&self) -> &[Arc<dyn ProviderCatalog>] {
        &self.catalogs
    }

    /// Turns `target` into a concrete upstream.
    ///
    /// Explicit hosts are never substituted. Country codes fall back to the
    /// other catalog, then to a random server anywhere; random targets take
    /// the first catalog (in random order) that has a usable server.
    pub async fn resolve(
        &self,
        target: &TargetSpec,
        target_port: Option<u16>,
        exclusions: &Exclusions,
    ) -> Result<ResolvedTarget> {
        match target {
            TargetSpec::ExplicitHostPort { host, port } => self.resolve_explicit(host, *port).await,
            TargetSpec::CountryCode { code } => {
                if let Some(resolved) = self.resolve_country(code, target_port, exclusions).await {
                    return Ok(resolved);
                }
                tracing::warn!("No usable server for country {}, falling back to random", code);
                self.resolve_random(target_port, exclusions)
                    .await
                    .ok_or_else(|| ProxyError::ProviderUnavailable {
                        target: target.to_string(),
                    })
            }
            TargetSpec::Random => self
                .resolve_random(target_port, exclusions)
                .await
                .ok_or_else(|| ProxyError::ProviderUnavailable {
                    target: target.to_string(),
                }),
        }
    }

    async fn resolve_explicit(&self, host: &str, port: u16) -> Result<ResolvedTarget> {
        let catalog = self
            .catalogs
            .iter()
            .find(|c| c.recognizes(host))
            .ok_or_else(|| ProxyError::ProviderUnavailable {
                target: format!("{}:{}", host, port),
            })?;

        let server = match catalog.get_by_name(host).await {
            Ok(Some(server)) => server,
            Ok(None) => {
                tracing::warn!("{} is not in the {} catalog, using it as given", host, catalog.name());
                synthesize_server(host)
            }
            Err(e) => {
                tracing::warn!("Looking up {} in {} failed: {}", host, catalog.name(), e);
                synthesize_server(host)
            }
        };

        Ok(build_resolved(catalog.name(), server, port))
    }

    async fn resolve_country(
        &self,
        code: &str,
        target_port: Option<u16>,
        exclusions: &Exclusions,
    ) -> Option<ResolvedTarget> {
        let mut codes = vec![code.to_ascii_uppercase()];
        if let Some(alias) = self.country_aliases.get(&codes[0]) {
            codes.push(alias.clone());
        }

        let mut found: Vec<(usize, Vec<ProviderServer>)> = Vec::new();
        for (idx, catalog) in self.catalogs.iter().enumerate() {
            let mut servers: Vec<ProviderServer> = Vec::new();
            for code in &codes {
                match catalog.get_by_country(code).await {
                    Ok(list) => {
                        for server in list {
                            if !servers.iter().any(|s| s.hostname == server.hostname) {
                                servers.push(server);
                            }
                        }
                    }
                    Err(e) => tracing::warn!("Country lookup {} in {} failed: {}", code, catalog.name(), e),
                }
            }
            if !servers.is_empty() {
                found.push((idx, servers));
            }
        }

        for pos in shuffled_order(found.len()) {
            let (idx, servers) = &found[pos];
            let catalog = &self.catalogs[*idx];
            if let Some(server) = pick_server(servers, exclusions) {
                let port = target_port.unwrap_or_else(|| catalog.default_port());
                return Some(build_resolved(catalog.name(), server, port));
            }
            tracing::debug!("{} has no usable {} server left, trying next catalog", catalog.name(), code);
        }

        None
    }

    async fn resolve_random(
        &self,
        target_port: Option<u16>,
        exclusions: &Exclusions,
    ) -> Option<ResolvedTarget> {
        for idx in shuffled_order(self.catalogs.len()) {
            let catalog = &self.catalogs[idx];
            let servers = match catalog.fetch_servers(false).await {
                Ok(servers) => servers,
                Err(e) => {
                    tracing::warn!("Fetching {} servers failed: {}", catalog.name(), e);
                    continue;
                }
            };

            if let Some(server) = pick_server(&servers, exclusions) {
                let port = target_port.unwrap_or_else(|| catalog.default_port());
                return Some(build_resolved(catalog.name(), server, port));
            }
        }

        None
    }
}

fn build_resolved(provider: &str, server: ProviderServer, port: u16) -> ResolvedTarget {
    let country = Some(server.country.trim().to_ascii_uppercase()).filter(|c| !c.is_empty());
    ResolvedTarget {
        upstream: UpstreamSpec {
            provider: provider.to_string(),
            host: server.hostname.clone(),
            port,
        },
        country,
        server,
    }
}

/// Catalog entry for an explicit host the catalog does not list. The country
/// is taken from a two-letter hostname prefix such as `vn42.`.
fn synthesize_server(host: &str) -> ProviderServer {
    let label = host.split('.').next().unwrap_or_default();
    let prefix: String = label.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let country = if prefix.len() == 2 {
        prefix.to_ascii_uppercase()
    } else {
        String::new()
    };

    ProviderServer {
        id: 0,
        hostname: host.to_string(),
        country,
        load: 0,
        tier: String::new(),
        status: "online".to_string(),
    }
}

/// Uniform pick among online, non-failed servers, preferring ones nobody
/// else is using.
fn pick_server(servers: &[ProviderServer], exclusions: &Exclusions) -> Option<ProviderServer> {
    let usable: Vec<&ProviderServer> = servers
        .iter()
        .filter(|s| s.is_online())
        .filter(|s| !exclusions.failed.contains(&s.hostname.to_ascii_lowercase()))
        .collect();

    let fresh: Vec<&ProviderServer> = usable
        .iter()
        .copied()
        .filter(|s| !exclusions.avoid.contains(&s.hostname.to_ascii_lowercase()))
        .collect();

    let pool = if fresh.is_empty() { &usable } else { &fresh };
    pool.choose(&mut rand::thread_rng()).map(|s| (*s).clone())
}

fn shuffled_order(len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(&mut rand::thread_rng());
    order
}
