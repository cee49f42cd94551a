//! 服务配置
//!
//! Read once at startup from the TOML file named by `NETPROBE_CONFIG`
//! (default `netprobe.toml`). A missing file means defaults; a file that
//! fails to parse stops startup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use netprobe_toolbox::ProbeConfig;
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "netprobe.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    /// `[timeout]`, `[security]`, `[ping]`, `[http]` and `[cache]` tables.
    #[serde(flatten)]
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
    /// Also write daily-rotated JSON logs here.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub capacity: u64,
    /// Tokens added at the end of each full period.
    pub refill_tokens: u64,
    pub refill_period_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100,
            refill_tokens: 100,
            refill_period_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `env` to look up `NETPROBE_CONFIG`, `NETPROBE_HOST` and
    /// `NETPROBE_PORT`.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = env("NETPROBE_CONFIG").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;

        if let Some(host) = env("NETPROBE_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env("NETPROBE_PORT") {
            config.server.port = port
                .parse()
                .with_context(|| format!("NETPROBE_PORT is not a valid port: {port}"))?;
        }
        if config.server.workers == 0 {
            config.server.workers = num_cpus::get();
        }
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}
