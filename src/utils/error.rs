use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    #[error("No available port in range {min}-{max}")]
    NoAvailablePort { min: u16, max: u16 },

    #[error("No provider can serve target '{target}'")]
    ProviderUnavailable { target: String },

    #[error("Provisioning failed after {attempts} attempt(s): {message}")]
    ProvisioningFailed { attempts: u32, message: String },

    #[error("Port {port} not ready after {waited_ms}ms")]
    ReadinessTimeout { port: u16, waited_ms: u64 },

    #[error("Resolution cancelled")]
    Cancelled,

    #[error("Supervisor command failed: {message}")]
    SupervisorError { message: String },

    #[error("Catalog error ({provider}): {message}")]
    CatalogError { provider: String, message: String },

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Capacity,
    Provider,
    Provisioning,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// 根據錯誤嚴重程度決定退出碼
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Low => 0,      // 警告，但成功
            ErrorSeverity::Medium => 2,   // 可重試
            ErrorSeverity::High => 1,     // 處理錯誤
            ErrorSeverity::Critical => 3, // 系統錯誤
        }
    }
}

impl ProxyError {
    pub fn invalid_descriptor(descriptor: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            descriptor: descriptor.to_string(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidDescriptor { .. } => ErrorCategory::Input,
            Self::NoAvailablePort { .. } => ErrorCategory::Capacity,
            Self::ProviderUnavailable { .. }
            | Self::CatalogError { .. }
            | Self::ApiError(_) => ErrorCategory::Provider,
            Self::ProvisioningFailed { .. }
            | Self::ReadinessTimeout { .. }
            | Self::SupervisorError { .. }
            | Self::Cancelled => ErrorCategory::Provisioning,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ReadinessTimeout { .. } | Self::Cancelled => ErrorSeverity::Low,
            Self::NoAvailablePort { .. }
            | Self::ProviderUnavailable { .. }
            | Self::CatalogError { .. }
            | Self::ApiError(_) => ErrorSeverity::Medium,
            Self::InvalidDescriptor { .. }
            | Self::ProvisioningFailed { .. }
            | Self::SupervisorError { .. } => ErrorSeverity::High,
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. }
            | Self::IoError(_)
            | Self::SerializationError(_) => ErrorSeverity::Critical,
        }
    }

    /// Transient failures that a bounded retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProvisioningFailed { .. }
                | Self::SupervisorError { .. }
                | Self::CatalogError { .. }
                | Self::ApiError(_)
                | Self::IoError(_)
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Input => "Check the descriptor format: scheme://host:port[:target[:targetPort]]",
            ErrorCategory::Capacity => "Release unused proxies or widen the [ports] range",
            ErrorCategory::Provider => "Check provider catalogs and try another country or target",
            ErrorCategory::Provisioning => "Inspect the forwarding process logs and retry",
            ErrorCategory::Configuration => "Fix the configuration file and restart",
            ErrorCategory::System => "Check file permissions and disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::InvalidDescriptor { descriptor, .. } => {
                format!("The proxy descriptor '{}' could not be understood", descriptor)
            }
            Self::NoAvailablePort { min, max } => {
                format!("All local proxy ports ({}-{}) are in use", min, max)
            }
            Self::ProviderUnavailable { target } => {
                format!("No VPN server is available for '{}'", target)
            }
            Self::ProvisioningFailed { attempts, .. } => {
                format!("Could not start a local proxy after {} attempt(s)", attempts)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
