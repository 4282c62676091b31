use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_SCHEME: &str = "socks5";

/// What the caller wants the local port to reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    ExplicitHostPort { host: String, port: u16 },
    CountryCode { code: String },
    Random,
}

impl TargetSpec {
    /// Classifies the raw `target` / `targetPort` descriptor components.
    pub fn classify(target: &str, target_port: Option<u16>) -> Self {
        let target = target.trim();

        if target.len() == 2 && target.chars().all(|c| c.is_ascii_alphabetic()) {
            return Self::CountryCode {
                code: target.to_ascii_uppercase(),
            };
        }

        match target_port {
            Some(port) if target.contains('.') => Self::ExplicitHostPort {
                host: target.to_string(),
                port,
            },
            _ => Self::Random,
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::ExplicitHostPort { .. })
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExplicitHostPort { host, port } => write!(f, "{}:{}", host, port),
            Self::CountryCode { code } => write!(f, "{}", code),
            Self::Random => write!(f, "any"),
        }
    }
}

/// Full external representation of one local endpoint:
/// `scheme://clientHost:localPort[:upstreamHost[:upstreamPort]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    pub scheme: String,
    pub client_host: String,
    pub local_port: u16,
    pub upstream_host: String,
    pub upstream_port: Option<u16>,
}

impl ProxyDescriptor {
    pub fn new(
        scheme: &str,
        client_host: &str,
        local_port: u16,
        upstream_host: &str,
        upstream_port: Option<u16>,
    ) -> Self {
        Self {
            scheme: scheme.to_string(),
            client_host: client_host.to_string(),
            local_port,
            upstream_host: upstream_host.to_string(),
            upstream_port,
        }
    }

    /// Same scheme and client host, pointing at a different local endpoint.
    pub fn rebind(&self, record: &AssignmentRecord) -> Self {
        Self {
            scheme: self.scheme.clone(),
            client_host: self.client_host.clone(),
            local_port: record.local_port,
            upstream_host: record.upstream_host.clone(),
            upstream_port: Some(record.upstream_port),
        }
    }

    /// Upstream host and port, equal on both sides. Host comparison ignores case.
    pub fn same_upstream(&self, other: &ProxyDescriptor) -> bool {
        self.upstream_host.eq_ignore_ascii_case(&other.upstream_host)
            && self.upstream_port == other.upstream_port
    }

    /// Upstream that names a real server: a dotted host plus a port.
    pub fn has_qualified_upstream(&self) -> bool {
        self.upstream_host.contains('.') && self.upstream_port.is_some()
    }
}

impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.client_host, self.local_port)?;
        if !self.upstream_host.is_empty() {
            write!(f, ":{}", self.upstream_host)?;
            if let Some(port) = self.upstream_port {
                write!(f, ":{}", port)?;
            }
        }
        Ok(())
    }
}

/// Persisted mapping of one local port to its upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub local_port: u16,
    pub provider: String,
    pub upstream_host: String,
    pub upstream_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AssignmentRecord {
    /// Whether this record already serves what `target` asks for.
    pub fn satisfies(&self, target: &TargetSpec) -> bool {
        match target {
            TargetSpec::ExplicitHostPort { host, port } => {
                self.upstream_host.eq_ignore_ascii_case(host) && self.upstream_port == *port
            }
            TargetSpec::CountryCode { code } => self
                .country
                .as_deref()
                .is_some_and(|country| country.eq_ignore_ascii_case(code)),
            TargetSpec::Random => true,
        }
    }

    pub fn upstream(&self) -> UpstreamSpec {
        UpstreamSpec {
            provider: self.provider.clone(),
            host: self.upstream_host.clone(),
            port: self.upstream_port,
        }
    }
}

/// One entry of the caller's active-profile snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveProfileProxy {
    pub descriptor: ProxyDescriptor,
}

impl ActiveProfileProxy {
    pub fn local_port(&self) -> u16 {
        self.descriptor.local_port
    }
}

/// A VPN exit server as reported by a provider catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderServer {
    #[serde(default)]
    pub id: u64,
    #[serde(alias = "domain")]
    pub hostname: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub load: u8,
    #[serde(default)]
    pub tier: String,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "online".to_string()
}

impl ProviderServer {
    pub fn is_online(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "online" | "active" | "ok"
        )
    }
}

/// What the process supervisor needs to run a forwarder for one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSpec {
    pub provider: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for UpstreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.provider)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Wire request accepted by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub descriptor: String,
    #[serde(default)]
    pub active_profiles: Vec<ProfileRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Wire error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
