use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("scan_interval_secs cannot be 0")]
    InvalidScanInterval,
    #[error("call_timeout_secs cannot be 0")]
    InvalidCallTimeout,
}

/// Connection to the Kubernetes API. Without an `api_url` the in-cluster
/// service account is used.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct KubernetesConfig {
    pub api_url: Option<Url>,
    pub token_path: Option<PathBuf>,
    pub ca_cert_path: Option<PathBuf>,
}

/// Overrides for the S3 client. Everything else comes from the standard
/// AWS environment (credentials chain, AWS_REGION, ...).
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ObjectStoreConfig {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Upper bound for every individual Kubernetes or S3 call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
}

fn default_scan_interval_secs() -> u64 {
    10
}

fn default_call_timeout_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_interval_secs: default_scan_interval_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            kubernetes: KubernetesConfig::default(),
            object_store: ObjectStoreConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scan_interval_secs == 0 {
            return Err(ValidationError::InvalidScanInterval);
        }
        if self.call_timeout_secs == 0 {
            return Err(ValidationError::InvalidCallTimeout);
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
