use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Environment variable naming a config file with upstream group definitions.
pub const CONFIG_FILE_ENV: &str = "PORTICO_CONFIG";

/// Prefix for all environment overrides (e.g. `PORTICO__SERVER__PORT=9090`).
pub const ENV_PREFIX: &str = "PORTICO";

/// Load configuration from the environment and an optional file.
///
/// Sources are layered lowest to highest priority:
/// 1. built-in defaults,
/// 2. the file named by `PORTICO_CONFIG` (TOML / YAML / JSON; required only
///    when the variable is set),
/// 3. `PORTICO__`-prefixed environment variables with `__` as the section
///    separator.
///
/// Upstream groups are most naturally declared in the file; every scalar knob
/// can also be driven from the environment.
pub fn load_config() -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        builder = builder.add_source(file_source(&path)?);
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .wrap_err("Failed to assemble configuration sources")?;

    // serde(default) on every section keeps a bare environment valid
    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .wrap_err("Failed to deserialize gateway configuration")?;

    Ok(gateway_config)
}

/// Load configuration from an explicit file path (used by `portico validate`).
pub fn load_config_from_file(config_path: &str) -> Result<GatewayConfig> {
    let settings = Config::builder()
        .add_source(file_source(config_path)?)
        .build()
        .with_context(|| format!("Failed to build config from {config_path}"))?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {config_path}"))?;

    Ok(gateway_config)
}

fn file_source(config_path: &str) -> Result<File<config::FileSourceFile, FileFormat>> {
    let path = Path::new(config_path);

    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Toml,
    };

    let path_str = path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?;

    Ok(File::new(path_str, format))
}
