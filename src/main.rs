use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use vpn_proxy_pool::adapters::http;
use vpn_proxy_pool::domain::ports::{ConfigStore, ProcessSupervisor};
use vpn_proxy_pool::utils::{logger, validation::Validate};
use vpn_proxy_pool::{
    AppConfig, CliConfig, DryRunSupervisor, FileConfigStore, MemoryConfigStore, ProxyResolver,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("🚀 Starting vpn-proxy-pool");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let config = cli.load_app_config().with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.as_deref().unwrap_or("<defaults>")
        )
    })?;

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let addr = config.bind_addr().context("invalid bind address")?;
    display_config_summary(&config, cli.dry_run);

    let result = if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - forwarders are simulated in memory");
        let resolver = config
            .build_resolver(MemoryConfigStore::new(), DryRunSupervisor::new())
            .context("failed to build resolver")?;
        run_server(resolver, addr).await
    } else {
        let credentials = config.build_credentials();
        let supervisor = config.build_supervisor(credentials);
        let store = FileConfigStore::new(config.store_dir());
        let resolver = config
            .build_resolver(store, supervisor)
            .context("failed to build resolver")?;
        run_server(resolver, addr).await
    };

    match result {
        Ok(()) => {
            tracing::info!("✅ Server stopped cleanly");
        }
        Err(e) => {
            // 記錄詳細錯誤信息
            tracing::error!(
                "❌ Server failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            // 輸出用戶友好的錯誤信息
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            let exit_code = e.severity().exit_code();
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

async fn run_server<S, P>(resolver: ProxyResolver<S, P>, addr: SocketAddr) -> vpn_proxy_pool::Result<()>
where
    S: ConfigStore + 'static,
    P: ProcessSupervisor + 'static,
{
    let app = http::router(Arc::new(resolver));
    http::serve(addr, app, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown requested");
}

fn display_config_summary(config: &AppConfig, dry_run: bool) {
    tracing::info!("📋 Configuration summary:");
    tracing::info!("  🌐 Bind: {}", config.server.bind);
    tracing::info!("  🔢 Ports: {}-{}", config.ports.min, config.ports.max);
    if dry_run {
        tracing::info!("  💾 Store: in-memory");
    } else {
        tracing::info!("  💾 Store: {}", config.store.dir);
        tracing::info!("  📂 PID dir: {}", config.supervisor.pid_dir);
    }
    for provider in &config.providers {
        let source = provider
            .catalog_url
            .as_deref()
            .or(provider.servers_file.as_deref())
            .unwrap_or("-");
        tracing::info!(
            "  🛰️  Provider {} (port {}): {}",
            provider.name,
            provider.default_port,
            source
        );
    }
    tracing::info!(
        "  🔁 Provisioning: up to {} attempts",
        config.provisioning.max_attempts
    );
}
