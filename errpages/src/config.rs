use discovery::config::Config as DiscoveryConfig;
use renderer::config::Config as RendererConfig;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,
    #[error("template_root cannot be empty")]
    EmptyTemplateRoot,
    #[error("statsd_host cannot be empty")]
    EmptyStatsdHost,
    #[error(transparent)]
    Discovery(#[from] discovery::config::ValidationError),
    #[error(transparent)]
    Renderer(#[from] renderer::config::ValidationError),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            format: LogFormat::default(),
            level: default_log_level(),
            sentry_dsn: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener the ingress sends failed requests to.
    #[serde(default = "default_listener")]
    pub listener: Listener,
    /// Health and readiness probes.
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    /// Written by the template sync, read by the resolver.
    #[serde(default = "default_template_root")]
    pub template_root: PathBuf,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listener() -> Listener {
    Listener {
        host: "0.0.0.0".into(),
        port: 8082,
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "0.0.0.0".into(),
        port: 8083,
    }
}

fn default_template_root() -> PathBuf {
    PathBuf::from("/html-templates")
}

fn default_metrics_prefix() -> String {
    "errpages".into()
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.template_root.as_os_str().is_empty() {
            return Err(ValidationError::EmptyTemplateRoot);
        }
        if let Some(metrics) = &self.metrics {
            if metrics.statsd_host.is_empty() {
                return Err(ValidationError::EmptyStatsdHost);
            }
            if metrics.statsd_port == 0 {
                return Err(ValidationError::InvalidPort);
            }
        }

        self.discovery.validate()?;
        self.renderer.validate()?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    ValidationError(#[from] ValidationError),
}
