use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("vpn_proxy_pool=debug,resolve_once=debug,info")
        } else {
            EnvFilter::new("vpn_proxy_pool=info,resolve_once=info")
        }
    })
}

pub fn init_cli_logger(verbose: bool) {
    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(compact_layer())
        .init();
}

/// Same output as [`init_cli_logger`] but written to stderr, leaving stdout
/// to the command's own result.
pub fn init_cli_logger_stderr(verbose: bool) {
    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(compact_layer().with_writer(std::io::stderr))
        .init();
}

type CompactLayer<S> =
    fmt::Layer<S, fmt::format::DefaultFields, fmt::format::Format<fmt::format::Compact>>;

fn compact_layer<S>() -> CompactLayer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
}

pub fn init_json_logger(verbose: bool) {
    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(), // 服務部署時以 JSON 輸出，方便集中收集
        )
        .init();
}
