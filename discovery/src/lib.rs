//! Discovers per-service error page configuration.
//!
//! The scanner polls the metadata source on a fixed interval, builds one
//! `ConfigurationRecord` per annotated service and publishes them together as
//! a snapshot in the `ConfigStore`. Template bundles referenced by a service
//! are mirrored into the local template root along the way.

pub mod annotations;
pub mod assets;
pub mod config;
pub mod metadata;
pub mod metrics_defs;
pub mod object_store;
pub mod record;
pub mod scanner;
pub mod store;

#[cfg(test)]
mod testutils;

use assets::AssetSync;
use metadata::MetadataSource;
use object_store::ObjectStore;
use scanner::{Command, ScanError, ScanReport, Scanner};
use std::path::PathBuf;
use std::sync::Arc;
use store::ConfigStore;
use tokio::sync::{mpsc, oneshot};

#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    #[error("invalid discovery config: {0}")]
    InvalidConfig(#[from] config::ValidationError),
    #[error("scanner is not running")]
    Stopped,
    #[error(transparent)]
    Scan(#[from] ScanError),
}

struct DiscoveryInner {
    store: Arc<ConfigStore>,
    tx: mpsc::Sender<Command>,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

/// Handle to the background scanner. Cheap to clone.
#[derive(Clone)]
pub struct Discovery {
    inner: Arc<DiscoveryInner>,
}

impl Discovery {
    /// Spawns the scanner on the current runtime. The first cycle starts
    /// immediately; `is_ready` turns true once it has published.
    pub fn start(
        config: &config::Config,
        template_root: PathBuf,
        source: Arc<dyn MetadataSource>,
        object_store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, DiscoveryError> {
        config.validate()?;

        let store = Arc::new(ConfigStore::new());
        let assets = object_store
            .map(|os| Arc::new(AssetSync::new(os, template_root, config.call_timeout())));
        let scanner = Scanner::new(source, assets, store.clone(), config.call_timeout());

        let (tx, rx) = mpsc::channel::<Command>(16);
        let interval = config.scan_interval();
        let handle = tokio::spawn(async move { scanner.run(rx, interval).await });

        Ok(Discovery {
            inner: Arc::new(DiscoveryInner { store, tx, handle }),
        })
    }

    pub fn store(&self) -> Arc<ConfigStore> {
        self.inner.store.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.store.is_ready()
    }

    /// Runs a cycle now instead of waiting for the next interval.
    pub async fn refresh(&self) -> Result<ScanReport, DiscoveryError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .tx
            .send(Command::Refresh(reply_tx))
            .await
            .map_err(|_| DiscoveryError::Stopped)?;
        let report = reply_rx.await.map_err(|_| DiscoveryError::Stopped)??;
        Ok(report)
    }

    pub async fn shutdown(&self) {
        let _ = self.inner.tx.send(Command::Shutdown).await;
    }
}
