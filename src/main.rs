use clap::Parser;
use nim_proxy::config::config_search_paths;
use nim_proxy::proxy::UpstreamClient;
use nim_proxy::{build_router, AppState, ProxyConfig, SharedExchangeLog};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "nim-proxy",
    about = "OpenAI-compatible front for NVIDIA NIM style chat-completion gateways",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Exchange log file path (JSONL)
    #[arg(long, default_value = "nim-proxy.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nim_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;
    config.apply_env_overrides()?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    // Validate config eagerly
    config.validate()?;
    let api_key = config.resolve_api_key()?;

    let log = SharedExchangeLog::open(&cli.log_file)?;

    info!("nim-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {}", config.upstream.base_url);
    info!("  Port:      {}", config.port);
    info!("  Models:    {} mapped, fallback {}", config.models.len(), config.fallback_model);
    info!(
        "  Reasoning: {}  Thinking mode: {}",
        if config.features.show_reasoning { "shown" } else { "hidden" },
        if config.features.thinking_mode { "on" } else { "off" }
    );
    info!("  Log file:  {}", cli.log_file.display());

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.upstream.timeout_secs))
        .build()?;
    let upstream = UpstreamClient::new(client, &config, api_key);

    let port = config.port;
    let state = Arc::new(AppState::new(config, upstream, log));

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", port);

    axum::serve(listener, app).await?;

    Ok(())
}
