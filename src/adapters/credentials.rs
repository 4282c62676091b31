use crate::domain::model::Credentials;
use crate::domain::ports::CredentialProvider;
use crate::utils::error::{ProxyError, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Fixed credentials, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: Option<Credentials>,
}

impl StaticCredentials {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }
}

impl CredentialProvider for StaticCredentials {
    fn current_credentials(&self) -> Option<Credentials> {
        self.credentials.clone()
    }
}

/// Credentials reloaded from a TOML file on a fixed interval.
///
/// The refresh task belongs to this value and stops when it is dropped.
pub struct RefreshingCredentials {
    current: Arc<RwLock<Option<Credentials>>>,
    task: JoinHandle<()>,
}

impl RefreshingCredentials {
    /// Loads the file once, then keeps reloading it every `interval`.
    /// Must be called inside a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>, interval: Duration) -> Self {
        let path = path.into();
        let initial = match load_credentials(&path) {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                tracing::warn!("Could not load credentials from {}: {}", path.display(), e);
                None
            }
        };

        let current = Arc::new(RwLock::new(initial));
        let shared = current.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即觸發，已在上面載入過
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match load_credentials(&path) {
                    Ok(credentials) => {
                        if let Ok(mut slot) = shared.write() {
                            *slot = Some(credentials);
                        }
                        tracing::debug!("Refreshed VPN credentials from {}", path.display());
                    }
                    Err(e) => tracing::warn!("Credential refresh failed, keeping previous: {}", e),
                }
            }
        });

        Self { current, task }
    }
}

impl CredentialProvider for RefreshingCredentials {
    fn current_credentials(&self) -> Option<Credentials> {
        self.current.read().ok().and_then(|slot| slot.clone())
    }
}

impl Drop for RefreshingCredentials {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn load_credentials(path: &Path) -> Result<Credentials> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| ProxyError::ConfigValidationError {
        field: "credentials.file".to_string(),
        message: format!("TOML parsing error: {}", e),
    })
}
