//! Settings loading: optional TOML file overlaid by `JOBRELAY__*` variables

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use jobrelay_core::config::Settings;

/// Variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "JOBRELAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/jobrelay.toml";

/// `JOBRELAY__BROKER__NAMESPACES=a,b` sets `broker.namespaces`
pub const ENV_PREFIX: &str = "JOBRELAY";
const ENV_SEPARATOR: &str = "__";

/// Keys whose environment value is a comma-separated list
const LIST_KEYS: &[&str] = &["broker.namespaces"];

pub fn environment() -> Environment {
    LIST_KEYS.iter().fold(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .list_separator(",")
            .try_parsing(true),
        |env, key| env.with_list_parse_key(key),
    )
}

/// Load from `$JOBRELAY_CONFIG` (default `config/jobrelay.toml`) and the process environment
pub fn load_settings() -> Result<Settings> {
    let path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let path = shellexpand::tilde(&path).into_owned();
    load_from(&path, environment())
}

/// A missing file is fine, a present but unreadable one is not
pub fn load_from(path: &str, env: Environment) -> Result<Settings> {
    let config = Config::builder()
        .add_source(File::new(path, FileFormat::Toml).required(false))
        .add_source(env)
        .build()
        .with_context(|| format!("failed to read configuration from {}", path))?;

    let settings: Settings = config
        .try_deserialize()
        .context("invalid configuration")?;
    settings.validate()?;
    Ok(settings)
}
