pub mod toml_config;

pub use toml_config::AppConfig;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "vpn-proxy-pool")]
#[command(about = "Assigns local proxy ports to VPN exit servers for browser profiles")]
pub struct CliConfig {
    #[arg(short, long, help = "TOML configuration file")]
    pub config: Option<String>,

    #[arg(long, help = "Override [server] bind address")]
    pub bind: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Simulate forwarders in memory instead of running scripts")]
    pub dry_run: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 載入 TOML 配置並套用命令列覆寫
    pub fn load_app_config(&self) -> crate::utils::error::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        Ok(config)
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_bind() {
        let cli = CliConfig::parse_from(["vpn-proxy-pool", "--bind", "0.0.0.0:9000", "--dry-run"]);
        assert!(cli.dry_run);
        assert!(!cli.verbose);

        let config = cli.load_app_config().unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.ports.min, 7891);
    }
}
