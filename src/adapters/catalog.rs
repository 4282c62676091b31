use crate::domain::model::ProviderServer;
use crate::domain::ports::ProviderCatalog;
use crate::utils::error::{ProxyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;

/// Identity of a provider: its name, the domains its servers live under and
/// the proxy port its servers listen on.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub domain_suffixes: Vec<String>,
    pub default_port: u16,
}

impl ProviderSettings {
    pub fn new(name: &str, domain_suffixes: &[&str], default_port: u16) -> Self {
        Self {
            name: name.to_string(),
            domain_suffixes: domain_suffixes.iter().map(|s| s.to_string()).collect(),
            default_port,
        }
    }

    pub fn recognizes(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.domain_suffixes.iter().any(|suffix| {
            let suffix = suffix.trim_start_matches('.').to_ascii_lowercase();
            host == suffix || host.ends_with(&format!(".{}", suffix))
        })
    }
}

fn find_by_name(servers: &[ProviderServer], name: &str) -> Option<ProviderServer> {
    servers
        .iter()
        .find(|s| s.hostname.eq_ignore_ascii_case(name))
        .cloned()
}

fn filter_by_country(servers: &[ProviderServer], code: &str) -> Vec<ProviderServer> {
    servers
        .iter()
        .filter(|s| s.country.eq_ignore_ascii_case(code))
        .cloned()
        .collect()
}

/// Fixed server list, loaded once from a JSON file or built in memory.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    settings: ProviderSettings,
    servers: Vec<ProviderServer>,
}

impl StaticCatalog {
    pub fn new(settings: ProviderSettings, servers: Vec<ProviderServer>) -> Self {
        Self { settings, servers }
    }

    pub fn from_file<P: AsRef<Path>>(settings: ProviderSettings, path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let servers = parse_server_list(&content)?;
        tracing::debug!(
            "Loaded {} servers for {} from {}",
            servers.len(),
            settings.name,
            path.as_ref().display()
        );
        Ok(Self::new(settings, servers))
    }
}

#[async_trait]
impl ProviderCatalog for StaticCatalog {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn recognizes(&self, host: &str) -> bool {
        self.settings.recognizes(host)
    }

    fn default_port(&self) -> u16 {
        self.settings.default_port
    }

    async fn fetch_servers(&self, _force_refresh: bool) -> Result<Vec<ProviderServer>> {
        Ok(self.servers.clone())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ProviderServer>> {
        Ok(find_by_name(&self.servers, name))
    }

    async fn get_by_country(&self, code: &str) -> Result<Vec<ProviderServer>> {
        Ok(filter_by_country(&self.servers, code))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServerListPayload {
    Bare(Vec<ProviderServer>),
    Wrapped { servers: Vec<ProviderServer> },
}

/// Accepts either a bare JSON array or `{ "servers": [...] }`.
pub fn parse_server_list(content: &str) -> Result<Vec<ProviderServer>> {
    let payload: ServerListPayload = serde_json::from_str(content)?;
    Ok(match payload {
        ServerListPayload::Bare(servers) => servers,
        ServerListPayload::Wrapped { servers } => servers,
    })
}

struct CachedServers {
    fetched_at: DateTime<Utc>,
    servers: Vec<ProviderServer>,
}

/// Server list fetched over HTTP and cached in memory for `ttl`.
pub struct HttpCatalog {
    settings: ProviderSettings,
    url: String,
    ttl: chrono::Duration,
    client: Client,
    cache: RwLock<Option<CachedServers>>,
}

impl HttpCatalog {
    pub fn new(settings: ProviderSettings, url: String, ttl: Duration) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            settings,
            url,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1)),
            client,
            cache: RwLock::new(None),
        }
    }

    async fn download(&self) -> Result<Vec<ProviderServer>> {
        tracing::debug!("Fetching {} catalog from {}", self.settings.name, self.url);
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(ProxyError::CatalogError {
                provider: self.settings.name.clone(),
                message: format!("catalog returned HTTP {}", response.status()),
            });
        }

        let body = response.text().await?;
        parse_server_list(&body)
    }
}

#[async_trait]
impl ProviderCatalog for HttpCatalog {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn recognizes(&self, host: &str) -> bool {
        self.settings.recognizes(host)
    }

    fn default_port(&self) -> u16 {
        self.settings.default_port
    }

    async fn fetch_servers(&self, force_refresh: bool) -> Result<Vec<ProviderServer>> {
        if !force_refresh {
            if let Some(cached) = self.cache.read().await.as_ref() {
                if Utc::now() - cached.fetched_at < self.ttl {
                    return Ok(cached.servers.clone());
                }
            }
        }

        match self.download().await {
            Ok(servers) => {
                tracing::info!("Fetched {} servers for {}", servers.len(), self.settings.name);
                *self.cache.write().await = Some(CachedServers {
                    fetched_at: Utc::now(),
                    servers: servers.clone(),
                });
                Ok(servers)
            }
            Err(e) => {
                if let Some(cached) = self.cache.read().await.as_ref() {
                    tracing::warn!(
                        "Refreshing {} catalog failed ({}), serving cached copy",
                        self.settings.name,
                        e
                    );
                    return Ok(cached.servers.clone());
                }
                Err(e)
            }
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ProviderServer>> {
        let servers = self.fetch_servers(false).await?;
        Ok(find_by_name(&servers, name))
    }

    async fn get_by_country(&self, code: &str) -> Result<Vec<ProviderServer>> {
        let servers = self.fetch_servers(false).await?;
        Ok(filter_by_country(&servers, code))
    }
}
