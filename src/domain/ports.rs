use crate::domain::model::{AssignmentRecord, Credentials, ProviderServer, UpstreamSpec};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Key-value store of assignment records, keyed by local port.
pub trait ConfigStore: Send + Sync {
    fn write(
        &self,
        port: u16,
        record: &AssignmentRecord,
    ) -> impl Future<Output = Result<()>> + Send;
    fn read(&self, port: u16) -> impl Future<Output = Result<Option<AssignmentRecord>>> + Send;
    fn delete(&self, port: u16) -> impl Future<Output = Result<()>> + Send;
    fn list(&self) -> impl Future<Output = Result<Vec<u16>>> + Send;
}

/// Starts and stops the external forwarding processes, one per local port.
pub trait ProcessSupervisor: Send + Sync {
    fn start(&self, port: u16, upstream: &UpstreamSpec)
        -> impl Future<Output = Result<()>> + Send;
    fn restart(
        &self,
        port: u16,
        upstream: &UpstreamSpec,
    ) -> impl Future<Output = Result<()>> + Send;
    fn stop(&self, port: u16) -> impl Future<Output = Result<()>> + Send;
    fn is_alive(&self, port: u16) -> impl Future<Output = bool> + Send;

    /// Whether something accepts TCP connections on the local port.
    fn is_listening(&self, port: u16) -> impl Future<Output = bool> + Send {
        async move {
            let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
            matches!(
                tokio::time::timeout(Duration::from_millis(500), connect).await,
                Ok(Ok(_))
            )
        }
    }
}

/// Read-only view over one VPN provider's server list.
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `host` belongs to this provider (domain suffix match).
    fn recognizes(&self, host: &str) -> bool;

    /// Port used when the request does not name one.
    fn default_port(&self) -> u16;

    async fn fetch_servers(&self, force_refresh: bool) -> Result<Vec<ProviderServer>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<ProviderServer>>;
    async fn get_by_country(&self, code: &str) -> Result<Vec<ProviderServer>>;
}

pub trait CredentialProvider: Send + Sync {
    fn current_credentials(&self) -> Option<Credentials>;
}
