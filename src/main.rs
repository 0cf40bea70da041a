use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router as AxumRouter, extract::Request};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portico::{
    adapters::FileConfigProvider,
    config::{GatewayConfig, GatewayConfigValidator},
    core::GatewayService,
    ports::config_provider::ConfigProvider,
    tracing_setup::{self, LogFormat},
};
use tracing::Instrument;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "gateway.yaml")]
    config: String,

    /// Log output format
    #[clap(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// Log filter directive, overrides RUST_LOG (e.g. "portico=debug")
    #[clap(long)]
    log_level: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let config_path = match args.command {
        Some(Commands::Validate { config }) => return validate_config_command(&config).await,
        Some(Commands::Serve { config }) => config,
        None => args.config,
    };

    match (args.log_level.as_deref(), args.log_format) {
        (Some(level), format) => tracing_setup::init_tracing_with_config(level, format, true)?,
        (None, LogFormat::Json) => tracing_setup::init_tracing()?,
        (None, LogFormat::Pretty) => tracing_setup::init_console_tracing()?,
    }

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default reported an error: {:?}. A provider was probably installed already.",
            e
        );
    }

    tracing::info!("Loading initial configuration from {config_path}");

    let config_provider: Arc<dyn ConfigProvider> = Arc::new(
        FileConfigProvider::new(&config_path).context("Failed to create config provider")?,
    );

    let initial_config: GatewayConfig = config_provider
        .load_config()
        .await
        .with_context(|| format!("Failed to load initial config from {config_path}"))?;
    log_validation(&initial_config);

    let gateway = Arc::new(GatewayService::from_config(&initial_config));

    spawn_config_watcher(config_provider.clone(), gateway.clone(), config_path.clone());

    let listen_addr: SocketAddr = initial_config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", initial_config.listen_addr))?;

    let gateway_for_fallback = gateway.clone();
    let app = AxumRouter::new().fallback(move |req: Request| {
        let gateway = gateway_for_fallback.clone();
        async move { gateway.handle(req).await }
    });

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {listen_addr}"))?;
    tracing::info!("Gateway listening on {listen_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {e}"))?;

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Reload the route table whenever the provider reports a change.
fn spawn_config_watcher(
    config_provider: Arc<dyn ConfigProvider>,
    gateway: Arc<GatewayService>,
    config_path: String,
) {
    let debounce_duration = Duration::from_secs(2);
    let mut notify_rx = config_provider.watch();

    let span = tracing_setup::configure_component_tracing("config_watcher");
    tokio::spawn(
        async move {
            tracing::info!("Config watcher task started.");

            while notify_rx.recv().await.is_some() {
                // Editors emit bursts of events for one save
                tokio::time::sleep(debounce_duration).await;
                while notify_rx.try_recv().is_ok() {}

                tracing::info!("Attempting to reload configuration from {}", config_path);

                match config_provider.load_config().await {
                    Ok(new_config) => {
                        log_validation(&new_config);
                        let report = gateway.reload(&new_config);
                        tracing::info!(
                            registered = report.registered,
                            failed = report.failed.len(),
                            "Configuration reloaded"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to reload configuration: {}. Keeping old configuration.",
                            e
                        );
                    }
                }
            }
            tracing::info!("Config watcher task is shutting down.");
        }
        .instrument(span),
    );
}

fn log_validation(config: &GatewayConfig) {
    if let Err(e) = GatewayConfigValidator::validate(config) {
        tracing::warn!("Configuration has issues, affected definitions may be skipped: {}", e);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    let config = match portico::config::load_config(config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            let active = config.apis.iter().filter(|d| d.active).count();
            println!("✅ Configuration is valid");
            println!("   Listen address: {}", config.listen_addr);
            println!("   Definitions: {} ({} active)", config.apis.len(), active);
            for definition in &config.apis {
                println!(
                    "   - {} {:?} -> {} target(s) [{}]",
                    definition.listen_path,
                    definition.methods,
                    definition.upstreams.targets.len(),
                    definition.upstreams.balancing
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    }
}
