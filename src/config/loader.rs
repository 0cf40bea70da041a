use std::path::Path;

use config::{Config, Environment, File, FileFormat, Map};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix of environment variables overriding file values,
/// e.g. `PORTICO_LISTEN_ADDR` or `PORTICO_TRANSPORT__FLUSH_INTERVAL`.
pub const ENV_PREFIX: &str = "PORTICO";

/// Load the gateway configuration at `config_path`, then apply environment overrides.
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    load_with_env(Path::new(config_path), None)
}

/// Format by extension. Unknown extensions are read as YAML.
fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    }
}

/// `env` replaces the process environment when given.
fn load_with_env(path: &Path, env: Option<Map<String, String>>) -> Result<GatewayConfig> {
    let name = path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?;

    let overrides = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .source(env);

    Config::builder()
        .add_source(File::new(name, file_format(path)))
        .add_source(overrides)
        .build()
        .with_context(|| format!("Failed to read config from {}", path.display()))?
        .try_deserialize::<GatewayConfig>()
        .with_context(|| format!("Invalid gateway config in {}", path.display()))
}
