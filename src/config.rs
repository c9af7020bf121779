use eyre::{Result, WrapErr};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "profgrants.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub server: ServerConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::from("sqlite://profgrants.db?mode=rwc"),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub base_url: String,
    pub page_size: u32,
    pub timeout_secs: u64,
    pub on_fetch_error: FetchErrorPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://api.reporter.nih.gov/v2"),
            page_size: 100,
            timeout_secs: 30,
            on_fetch_error: FetchErrorPolicy::default(),
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// What the workflow does when the registry cannot be queried.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FetchErrorPolicy {
    /// Log the failure and treat it as the end of the results.
    #[default]
    Stop,
    /// Abort the run with an error.
    Fail,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
            max_attempts: 3,
            retry_delay_ms: 2000,
        }
    }
}

impl JobsConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    pub fn load(file_name: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(file_name)
            .wrap_err_with(|| format!("cannot read configuration file {}", file_name.display()))?;
        Self::parse(&content).wrap_err("cannot load configuration file")
    }

    /// Load `file_name` if given, or the default file if it exists, or fall
    /// back to built-in defaults.
    pub fn load_or_default(file_name: Option<&Path>) -> Result<Config> {
        match file_name {
            Some(file_name) => Self::load(file_name),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Config::default()),
        }
    }

    pub fn parse(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        eyre::ensure!(
            config.registry.page_size > 0,
            "registry.page_size must be positive"
        );
        eyre::ensure!(config.jobs.workers > 0, "jobs.workers must be positive");
        eyre::ensure!(
            config.jobs.queue_capacity > 0,
            "jobs.queue_capacity must be positive"
        );
        eyre::ensure!(
            config.jobs.max_attempts > 0,
            "jobs.max_attempts must be positive"
        );
        Ok(config)
    }
}
