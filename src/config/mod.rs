//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "brusio";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

/// Command-line arguments for the Brusio binary.
#[derive(Debug, Parser)]
#[command(name = "brusio", version, about = "Brusio feed server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "BRUSIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Brusio HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the maximum items fetched per cache warm pass.
    #[arg(long = "cache-warm-cap", value_name = "COUNT")]
    pub cache_warm_cap: Option<u32>,

    /// Override the cache TTL in seconds.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    database: RawDatabaseSettings,
    logging: RawLoggingSettings,
    cache: CacheConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid listener address `{value}`: {detail}")]
    Address { value: String, detail: String },
    #[error("invalid log level `{0}`")]
    LogLevel(String),
}

/// Parse CLI arguments and load the layered configuration they point at.
pub fn load_with_cli() -> Result<(CliArgs, Settings), SettingsError> {
    let cli = CliArgs::parse();
    let overrides = match &cli.command {
        Some(Command::Serve(args)) => args.overrides.clone(),
        None => ServeOverrides::default(),
    };
    let settings = load(cli.config_file.as_deref(), &overrides)?;
    Ok((cli, settings))
}

pub fn load(
    config_file: Option<&Path>,
    overrides: &ServeOverrides,
) -> Result<Settings, SettingsError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.to_path_buf()));
    }

    let raw: RawSettings = builder
        .add_source(Environment::with_prefix("BRUSIO").separator("__"))
        .build()?
        .try_deserialize()?;

    resolve(raw, overrides)
}

fn resolve(raw: RawSettings, overrides: &ServeOverrides) -> Result<Settings, SettingsError> {
    let host = overrides
        .server_host
        .clone()
        .or(raw.server.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .server_port
        .or(raw.server.port)
        .unwrap_or(DEFAULT_PORT);
    let addr_value = format!("{host}:{port}");
    let addr = addr_value
        .parse::<SocketAddr>()
        .map_err(|err| SettingsError::Address {
            value: addr_value,
            detail: err.to_string(),
        })?;

    let graceful_shutdown = Duration::from_secs(
        overrides
            .graceful_shutdown_seconds
            .or(raw.server.graceful_shutdown_seconds)
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
    );

    let level_value = overrides
        .log_level
        .clone()
        .or(raw.logging.level)
        .unwrap_or_else(|| "info".to_string());
    let level = LevelFilter::from_str(&level_value)
        .map_err(|_| SettingsError::LogLevel(level_value))?;
    let format = match overrides.log_json.or(raw.logging.json).unwrap_or(false) {
        true => LogFormat::Json,
        false => LogFormat::Compact,
    };

    let max_connections = overrides
        .database_max_connections
        .or(raw.database.max_connections)
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections =
        NonZeroU32::new(max_connections).unwrap_or(NonZeroU32::new(DEFAULT_DB_MAX_CONNECTIONS)
            .expect("default pool size is non-zero"));

    let mut cache = raw.cache;
    if let Some(cap) = overrides.cache_warm_cap {
        cache.warm_cap = cap;
    }
    if let Some(ttl) = overrides.cache_ttl_seconds {
        cache.ttl_seconds = ttl;
    }

    Ok(Settings {
        server: ServerSettings {
            addr,
            graceful_shutdown,
        },
        database: DatabaseSettings {
            url: overrides.database_url.clone().or(raw.database.url),
            max_connections,
        },
        logging: LoggingSettings { level, format },
        cache,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_defaults() {
        let settings = resolve(RawSettings::default(), &ServeOverrides::default()).unwrap();

        assert_eq!(settings.server.addr.to_string(), "127.0.0.1:3000");
        assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert_eq!(settings.logging.format, LogFormat::Compact);
        assert!(settings.database.url.is_none());
        assert_eq!(settings.database.max_connections.get(), 8);
        assert_eq!(settings.cache.warm_cap, 100);
    }

    #[test]
    fn cli_overrides_win() {
        let overrides = ServeOverrides {
            server_host: Some("0.0.0.0".to_string()),
            server_port: Some(8080),
            log_level: Some("debug".to_string()),
            log_json: Some(true),
            database_url: Some("postgres://localhost/brusio".to_string()),
            cache_warm_cap: Some(50),
            cache_ttl_seconds: Some(120),
            ..Default::default()
        };
        let settings = resolve(RawSettings::default(), &overrides).unwrap();

        assert_eq!(settings.server.addr.to_string(), "0.0.0.0:8080");
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(
            settings.database.url.as_deref(),
            Some("postgres://localhost/brusio")
        );
        assert_eq!(settings.cache.warm_cap, 50);
        assert_eq!(settings.cache.ttl_seconds, 120);
    }

    #[test]
    fn rejects_unparseable_log_level() {
        let overrides = ServeOverrides {
            log_level: Some("chatty".to_string()),
            ..Default::default()
        };
        let result = resolve(RawSettings::default(), &overrides);
        assert!(matches!(result, Err(SettingsError::LogLevel(_))));
    }

    #[test]
    fn rejects_unparseable_address() {
        let overrides = ServeOverrides {
            server_host: Some("not a host".to_string()),
            ..Default::default()
        };
        let result = resolve(RawSettings::default(), &overrides);
        assert!(matches!(result, Err(SettingsError::Address { .. })));
    }

    #[test]
    fn zero_pool_size_falls_back_to_default() {
        let overrides = ServeOverrides {
            database_max_connections: Some(0),
            ..Default::default()
        };
        let settings = resolve(RawSettings::default(), &overrides).unwrap();
        assert_eq!(settings.database.max_connections.get(), 8);
    }
}
