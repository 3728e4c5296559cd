use crate::error::{ExporterError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub exporter: ExporterConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    /// Broker hostname. Required, usually given on the command line.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_kafka_port")]
    pub port: u16,
    /// Groups whose id fully matches this pattern are not collected.
    #[serde(default = "default_group_blacklist")]
    pub group_blacklist: String,
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Extra librdkafka properties (security, SASL, ...).
    #[serde(default)]
    pub client_properties: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExporterConfig {
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub mode: TriggerMode,
}

/// What starts a collection cycle.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Collect every `poll_interval`.
    #[default]
    Timer,
    /// Collect when `/metrics` is scraped.
    Scrape,
    Both,
}

impl TriggerMode {
    pub const fn uses_timer(self) -> bool {
        matches!(self, Self::Timer | Self::Both)
    }

    pub const fn uses_scrape(self) -> bool {
        matches!(self, Self::Scrape | Self::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub const fn to_duration(self, amount: u64) -> Duration {
        match self {
            Self::Milliseconds => Duration::from_millis(amount),
            Self::Seconds => Duration::from_secs(amount),
            Self::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            Self::Hours => Duration::from_secs(amount.saturating_mul(3600)),
        }
    }
}

/// Values given on the command line; each one replaces the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub kafka_host: Option<String>,
    pub kafka_port: Option<u16>,
    pub http_host: Option<String>,
    pub http_port: Option<u16>,
    pub group_blacklist: Option<String>,
    pub period: Option<u64>,
    pub unit: Option<TimeUnit>,
    pub mode: Option<TriggerMode>,
}

fn default_kafka_port() -> u16 {
    9092
}

fn default_group_blacklist() -> String {
    "console-consumer.*".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    7979
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_kafka_port(),
            group_blacklist: default_group_blacklist(),
            request_timeout: default_request_timeout(),
            client_properties: HashMap::new(),
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            poll_interval: default_poll_interval(),
            mode: TriggerMode::default(),
        }
    }
}

impl Config {
    /// Load the TOML file at `path`, or start from defaults when no file is given.
    /// The result is not validated; call [`Config::validate`] after overrides.
    pub fn load(path: Option<&str>) -> Result<Config> {
        let Some(config_path) = path else {
            return Ok(Config::default());
        };

        if !Path::new(config_path).exists() {
            return Err(ExporterError::Config(format!(
                "Configuration file not found: {config_path}"
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let content = Self::substitute_env_vars(&content)?;

        toml::from_str(&content)
            .map_err(|e| ExporterError::Config(format!("TOML parse error: {e}")))
    }

    fn substitute_env_vars(content: &str) -> Result<String> {
        // ${VAR}, ${?VAR} and ${VAR:-default}
        let re = Regex::new(r"\$\{\??([^}:-]+)(?::-([^}]*))?\}")?;
        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let default_value = caps.get(2).map_or("", |m| m.as_str());
                std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
            })
            .to_string())
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.kafka_host {
            self.kafka.host = host;
        }
        if let Some(port) = overrides.kafka_port {
            self.kafka.port = port;
        }
        if let Some(pattern) = overrides.group_blacklist {
            self.kafka.group_blacklist = pattern;
        }
        if let Some(host) = overrides.http_host {
            self.exporter.http_host = host;
        }
        if let Some(port) = overrides.http_port {
            self.exporter.http_port = port;
        }
        if let Some(mode) = overrides.mode {
            self.exporter.mode = mode;
        }
        match (overrides.period, overrides.unit) {
            (Some(period), unit) => {
                self.exporter.poll_interval =
                    unit.unwrap_or(TimeUnit::Seconds).to_duration(period);
            }
            (None, Some(unit)) => {
                // Reinterpret the default amount in the requested unit
                self.exporter.poll_interval = unit.to_duration(30);
            }
            (None, None) => {}
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka.host.trim().is_empty() {
            return Err(ExporterError::Config(
                "kafka host is required (--kafka-host)".to_string(),
            ));
        }

        if self.kafka.port == 0 {
            return Err(ExporterError::Config(
                "kafka port must be non-zero".to_string(),
            ));
        }

        if self.exporter.poll_interval.is_zero() {
            return Err(ExporterError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        self.kafka.compile_group_blacklist()?;
        Ok(())
    }
}

impl KafkaConfig {
    pub fn bootstrap_servers(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Compile the exclusion pattern anchored on both ends so it only matches
    /// whole group ids.
    pub fn compile_group_blacklist(&self) -> Result<Regex> {
        Ok(Regex::new(&format!("^(?:{})$", self.group_blacklist))?)
    }
}
