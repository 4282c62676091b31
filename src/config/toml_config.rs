use crate::adapters::catalog::{HttpCatalog, ProviderSettings, StaticCatalog};
use crate::adapters::credentials::{RefreshingCredentials, StaticCredentials};
use crate::adapters::supervisor::{ShellSupervisor, SupervisorCommands};
use crate::core::allocator::{PortAllocator, PortRange};
use crate::core::provisioner::EndpointProvisioner;
use crate::core::readiness::ReadinessWaiter;
use crate::core::resolver::ProxyResolver;
use crate::core::target_resolver::TargetResolver;
use crate::domain::model::Credentials;
use crate::domain::ports::{ConfigStore, CredentialProvider, ProcessSupervisor, ProviderCatalog};
use crate::utils::error::{ProxyError, Result};
use crate::utils::retry::RetryPolicy;
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    pub credentials: Option<CredentialsConfig>,
    #[serde(default)]
    pub country_aliases: HashMap<String, String>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8790".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub min: u16,
    pub max: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        let range = PortRange::default();
        Self {
            min: range.min,
            max: range.max,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: "./data/proxies".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub start: Vec<String>,
    pub restart: Vec<String>,
    pub stop: Vec<String>,
    pub pid_dir: String,
    pub command_timeout_seconds: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let script = |action: &str, with_upstream: bool| {
            let mut command = vec![
                "./scripts/vpn-forward.sh".to_string(),
                action.to_string(),
                "{port}".to_string(),
            ];
            if with_upstream {
                command.extend(["{provider}", "{host}", "{upstream_port}"].map(String::from));
            }
            command
        };

        Self {
            start: script("start", true),
            restart: script("restart", true),
            stop: script("stop", false),
            pid_dir: "./data/pids".to_string(),
            command_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub interval_ms: u64,
    pub short_timeout_ms: u64,
    pub long_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_ms: 250,
            short_timeout_ms: 3_000,
            long_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub file: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
}

fn default_refresh_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub domain_suffixes: Vec<String>,
    pub default_port: u16,
    pub catalog_url: Option<String>,
    pub servers_file: Option<String>,
    pub cache_ttl_seconds: Option<u64>,
}

impl ProviderConfig {
    pub fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            name: self.name.clone(),
            domain_suffixes: self.domain_suffixes.clone(),
            default_port: self.default_port,
        }
    }

    pub fn build_catalog(&self) -> Result<Arc<dyn ProviderCatalog>> {
        match (&self.catalog_url, &self.servers_file) {
            (Some(url), None) => {
                let ttl = Duration::from_secs(self.cache_ttl_seconds.unwrap_or(3600));
                Ok(Arc::new(HttpCatalog::new(self.settings(), url.clone(), ttl)))
            }
            (None, Some(path)) => Ok(Arc::new(StaticCatalog::from_file(self.settings(), path)?)),
            _ => Err(ProxyError::ConfigValidationError {
                field: format!("providers.{}", self.name),
                message: "exactly one of catalog_url or servers_file is required".to_string(),
            }),
        }
    }
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ProxyError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CATALOG_URL})，未定義的保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ProxyError::ConfigError {
            message: format!("env substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .map_err(|e| ProxyError::InvalidConfigValueError {
                field: "server.bind".to_string(),
                value: self.server.bind.clone(),
                reason: format!("{}", e),
            })
    }

    pub fn port_range(&self) -> PortRange {
        PortRange::new(self.ports.min, self.ports.max)
    }

    pub fn store_dir(&self) -> PathBuf {
        PathBuf::from(&self.store.dir)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.provisioning.max_attempts)
            .with_base_delay(self.provisioning.base_delay_ms)
            .with_max_delay(self.provisioning.max_delay_ms)
    }

    pub fn readiness_waiter(&self) -> ReadinessWaiter {
        ReadinessWaiter::new(
            Duration::from_millis(self.readiness.interval_ms),
            Duration::from_millis(self.readiness.short_timeout_ms),
            Duration::from_millis(self.readiness.long_timeout_ms),
        )
    }

    pub fn build_catalogs(&self) -> Result<Vec<Arc<dyn ProviderCatalog>>> {
        self.providers.iter().map(ProviderConfig::build_catalog).collect()
    }

    pub fn build_target_resolver(&self) -> Result<TargetResolver> {
        Ok(TargetResolver::new(self.build_catalogs()?)
            .with_country_aliases(self.country_aliases.clone()))
    }

    /// Credentials from the configured file (kept fresh), else from
    /// `VPN_USERNAME` / `VPN_PASSWORD`. Must be called inside a tokio runtime.
    pub fn build_credentials(&self) -> Arc<dyn CredentialProvider> {
        match &self.credentials {
            Some(config) => Arc::new(RefreshingCredentials::spawn(
                &config.file,
                Duration::from_secs(config.refresh_interval_seconds),
            )),
            None => {
                let from_env = match (std::env::var("VPN_USERNAME"), std::env::var("VPN_PASSWORD")) {
                    (Ok(username), Ok(password)) => Some(Credentials { username, password }),
                    _ => None,
                };
                Arc::new(StaticCredentials::new(from_env))
            }
        }
    }

    pub fn build_supervisor(&self, credentials: Arc<dyn CredentialProvider>) -> ShellSupervisor {
        ShellSupervisor::new(
            SupervisorCommands {
                start: self.supervisor.start.clone(),
                restart: self.supervisor.restart.clone(),
                stop: self.supervisor.stop.clone(),
            },
            &self.supervisor.pid_dir,
        )
        .with_credentials(credentials)
        .with_command_timeout(Duration::from_secs(self.supervisor.command_timeout_seconds))
    }

    /// Wires the whole resolver around the given store and supervisor.
    pub fn build_resolver<S, P>(&self, store: S, supervisor: P) -> Result<ProxyResolver<S, P>>
    where
        S: ConfigStore,
        P: ProcessSupervisor,
    {
        let provisioner = EndpointProvisioner::new(
            store,
            supervisor,
            PortAllocator::new(self.port_range()),
            self.build_target_resolver()?,
        )
        .with_retry(self.retry_policy());

        Ok(ProxyResolver::new(provisioner).with_readiness(self.readiness_waiter()))
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_port_range("ports", self.ports.min, self.ports.max)?;
        validation::validate_path("store.dir", &self.store.dir)?;
        validation::validate_path("supervisor.pid_dir", &self.supervisor.pid_dir)?;
        validation::validate_command("supervisor.start", &self.supervisor.start)?;
        validation::validate_command("supervisor.restart", &self.supervisor.restart)?;
        validation::validate_command("supervisor.stop", &self.supervisor.stop)?;
        validation::validate_positive_number(
            "supervisor.command_timeout_seconds",
            self.supervisor.command_timeout_seconds,
            1,
        )?;

        validation::validate_positive_number("readiness.interval_ms", self.readiness.interval_ms, 1)?;
        validation::validate_positive_number(
            "readiness.short_timeout_ms",
            self.readiness.short_timeout_ms,
            1,
        )?;
        validation::validate_positive_number(
            "readiness.long_timeout_ms",
            self.readiness.long_timeout_ms,
            self.readiness.short_timeout_ms,
        )?;
        validation::validate_positive_number(
            "provisioning.max_attempts",
            u64::from(self.provisioning.max_attempts),
            1,
        )?;

        if let Some(credentials) = &self.credentials {
            validation::validate_path("credentials.file", &credentials.file)?;
            validation::validate_positive_number(
                "credentials.refresh_interval_seconds",
                credentials.refresh_interval_seconds,
                1,
            )?;
        }

        if self.providers.is_empty() {
            return Err(ProxyError::MissingConfigError {
                field: "providers".to_string(),
            });
        }

        for provider in &self.providers {
            provider.validate()?;
        }

        Ok(())
    }
}

impl Validate for ProviderConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("providers.name", &self.name)?;

        let field = |name: &str| format!("providers.{}.{}", self.name, name);
        if self.domain_suffixes.is_empty() {
            return Err(ProxyError::MissingConfigError {
                field: field("domain_suffixes"),
            });
        }
        validation::validate_positive_number(&field("default_port"), u64::from(self.default_port), 1)?;

        match (&self.catalog_url, &self.servers_file) {
            (Some(url), None) => validation::validate_url(&field("catalog_url"), url),
            (None, Some(path)) => validation::validate_path(&field("servers_file"), path),
            _ => Err(ProxyError::ConfigValidationError {
                field: field("catalog_url"),
                message: "exactly one of catalog_url or servers_file is required".to_string(),
            }),
        }
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
