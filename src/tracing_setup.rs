use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Output format of the global subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// One JSON object per event, with the span list attached
    #[default]
    Json,
    /// Multi-line human readable output
    Pretty,
}

/// Initialize structured logging with JSON output
pub fn init_tracing() -> Result<()> {
    install(env_filter(None)?, LogFormat::Json, true)
}

/// Initialize console-friendly logging for development
pub fn init_console_tracing() -> Result<()> {
    install(env_filter(None)?, LogFormat::Pretty, true)
}

/// Initialize tracing from an explicit filter directive such as
/// `"portico=debug,hyper=warn"`, ignoring `RUST_LOG`.
pub fn init_tracing_with_config(level: &str, format: LogFormat, include_spans: bool) -> Result<()> {
    install(env_filter(Some(level))?, format, include_spans)
}

fn env_filter(directive: Option<&str>) -> Result<EnvFilter> {
    match directive {
        Some(level) => {
            EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))
        }
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

fn install(filter: EnvFilter, format: LogFormat, include_spans: bool) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let registry = Registry::default().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(include_spans),
            )
            .try_init(),
        LogFormat::Pretty => registry.with(fmt_layer.pretty()).try_init(),
    }
    .wrap_err("Failed to install global tracing subscriber")?;

    tracing::info!(?format, include_spans, "Portico logging initialized");
    Ok(())
}

/// Span wrapping a long-running background component
pub fn configure_component_tracing(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Create a request-scoped tracing span
pub fn create_request_span(method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
    )
}

/// Create an upstream request span. `http.status_code` is recorded once
/// the upstream answers.
pub fn create_upstream_span(upstream_url: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "upstream_request",
        upstream.url = upstream_url,
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
    )
}
