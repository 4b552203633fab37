use serde::Deserialize;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("static_dir cannot be empty")]
    EmptyStaticDir,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Directory served for favicon and `cniep-statics/` requests.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("/static")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            static_dir: default_static_dir(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.static_dir.as_os_str().is_empty() {
            return Err(ValidationError::EmptyStaticDir);
        }
        Ok(())
    }
}
