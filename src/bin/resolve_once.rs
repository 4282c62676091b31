use anyhow::Context;
use clap::Parser;
use std::io::Read;
use vpn_proxy_pool::domain::model::ResolveRequest;
use vpn_proxy_pool::domain::ports::{ConfigStore, ProcessSupervisor};
use vpn_proxy_pool::utils::{logger, validation::Validate};
use vpn_proxy_pool::{
    AppConfig, DryRunSupervisor, FileConfigStore, MemoryConfigStore, ProxyError, ResolveOutcome,
};

#[derive(Parser)]
#[command(name = "resolve_once")]
#[command(about = "Resolve a single proxy request and print the descriptor")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "vpn-proxy-pool.toml")]
    config: String,

    /// Request JSON file; reads stdin when omitted or "-"
    #[arg(short, long)]
    input: Option<String>,

    /// Resolve this descriptor with no active profiles instead of reading a request
    #[arg(short, long, conflicts_with = "input")]
    descriptor: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Simulate forwarders in memory instead of running scripts
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日誌，stdout 只留給結果描述
    logger::init_cli_logger_stderr(args.verbose);

    tracing::info!("📁 Loading configuration from: {}", args.config);
    let config = AppConfig::from_file(&args.config)
        .with_context(|| format!("failed to load config file '{}'", args.config))?;

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());
        std::process::exit(1);
    }

    let request = read_request(&args).context("failed to read resolve request")?;
    tracing::info!("🎯 Resolving {}", request.descriptor);

    let result = if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - forwarders are simulated in memory");
        resolve(&config, &request, MemoryConfigStore::new(), DryRunSupervisor::new()).await
    } else {
        let supervisor = config.build_supervisor(config.build_credentials());
        let store = FileConfigStore::new(config.store_dir());
        resolve(&config, &request, store, supervisor).await
    };

    match result {
        Ok(outcome) => {
            tracing::info!("✅ {} ({})", outcome.descriptor, outcome.action);
            if !outcome.ready {
                eprintln!("⚠️  Endpoint did not report ready in time");
            }
            println!("{}", outcome.descriptor);
        }
        Err(e) => {
            tracing::error!(
                "❌ Resolution failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(e.severity().exit_code().max(1));
        }
    }

    Ok(())
}

async fn resolve<S, P>(
    config: &AppConfig,
    request: &ResolveRequest,
    store: S,
    supervisor: P,
) -> Result<ResolveOutcome, ProxyError>
where
    S: ConfigStore,
    P: ProcessSupervisor,
{
    let resolver = config.build_resolver(store, supervisor)?;
    resolver.resolve(request).await
}

fn read_request(args: &Args) -> anyhow::Result<ResolveRequest> {
    if let Some(descriptor) = &args.descriptor {
        return Ok(ResolveRequest {
            descriptor: descriptor.clone(),
            active_profiles: Vec::new(),
        });
    }

    let raw = match args.input.as_deref() {
        Some(path) if path != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read '{}'", path))?,
        _ => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    Ok(serde_json::from_str(&raw)?)
}
