use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_polls.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Real-time polls server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "POLLS_PORT", help = "Port to listen on for HTTP and WebSocket clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "POLLS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "POLLS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "POLLS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection URL. In-memory storage when absent.")]
    pub db_url: Option<String>,

    #[clap(long, env = "POLLS_DB_MAX_CONNECTIONS", help = "Maximum pooled database connections.")]
    pub db_max_connections: Option<usize>,

    #[clap(long, env = "POLLS_TOKENS_PATH", help = "Path to the JSON token table used to verify bearer tokens.")]
    pub tokens_path: Option<PathBuf>,

    #[clap(long, env = "POLLS_SUBSCRIBER_BUFFER", help = "Snapshots buffered per WebSocket subscriber before dropping.")]
    pub subscriber_buffer: Option<usize>,

    #[clap(long, env = "POLLS_STORE_TIMEOUT_MS", help = "Upper bound in milliseconds for store calls.")]
    pub store_timeout_ms: Option<u64>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            db_url: other.db_url.or(self.db_url),
            db_max_connections: other.db_max_connections.or(self.db_max_connections),
            tokens_path: other.tokens_path.or(self.tokens_path),
            subscriber_buffer: other.subscriber_buffer.or(self.subscriber_buffer),
            store_timeout_ms: other.store_timeout_ms.or(self.store_timeout_ms),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(4000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            db_max_connections: Some(16),
            subscriber_buffer: Some(64),
            store_timeout_ms: Some(5000),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(4000)
    }

    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_deref().unwrap_or(Path::new("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn db_max_connections(&self) -> usize {
        self.db_max_connections.unwrap_or(16)
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer.unwrap_or(64)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.unwrap_or(5000))
    }

    /// TLS is only enabled when both paths are configured.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// Layers defaults, the config file, then environment and CLI arguments.
pub fn load_config() -> Result<Config> {
    // .env is optional.
    let _ = dotenvy::dotenv();
    load_config_from(Config::parse())
}

/// Same as `load_config` with already-parsed CLI/env values.
pub fn load_config_from(cli: Config) -> Result<Config> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("Failed to read config file: {}", config_file_path.display()))?;
        let file_config = serde_json::from_str::<Config>(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    }

    Ok(current_config.merge(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_apply_without_file() {
        let cli = Config {
            config_path: Some(PathBuf::from("/definitely/not/here.conf")),
            ..Default::default()
        };
        let config = load_config_from(cli).unwrap();
        assert_eq!(config.port(), 4000);
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.subscriber_buffer(), 64);
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert!(config.db_url.is_none());
        assert!(config.tls_paths().is_none());
    }

    #[test]
    fn test_file_overrides_defaults_and_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 5001, "logLevel": "debug", "subscriberBuffer": 8, "tokensPath": "/etc/polls/tokens.json"}}"#
        )
        .unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            port: Some(6001),
            ..Default::default()
        };
        let config = load_config_from(cli).unwrap();
        assert_eq!(config.port(), 6001);
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.subscriber_buffer(), 8);
        assert_eq!(config.tokens_path, Some(PathBuf::from("/etc/polls/tokens.json")));
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ port: ").unwrap();
        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(load_config_from(cli).is_err());
    }

    #[test]
    fn test_tls_needs_both_paths() {
        let config = Config {
            tls_cert_path: Some(PathBuf::from("cert.pem")),
            ..Default::default()
        };
        assert!(config.tls_paths().is_none());
        let config = Config {
            tls_key_path: Some(PathBuf::from("key.pem")),
            ..config
        };
        assert!(config.tls_paths().is_some());
    }
}
