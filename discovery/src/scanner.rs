use crate::annotations;
use crate::assets::AssetSync;
use crate::metadata::{MetadataError, MetadataSource, Replicas, ServiceInfo};
use crate::metrics_defs::{DESTINATION_FAILURES, DESTINATIONS, SCAN_DURATION, SCAN_FAILURES};
use crate::record::{ConfigurationRecord, DestinationId};
use crate::store::{ConfigStore, SnapshotBuilder};
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, timeout};

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("listing services failed: {0}")]
    List(#[from] MetadataError),
    #[error("listing services timed out after {0:?}")]
    ListTimeout(Duration),
}

#[derive(thiserror::Error, Debug)]
enum DestinationError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("deployment lookup timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Services returned by the metadata source.
    pub services: usize,
    /// Records in the published snapshot.
    pub published: usize,
    /// Destinations that failed and kept their previous record.
    pub preserved: usize,
    /// Destinations that failed with nothing to fall back to.
    pub failed: usize,
}

#[derive(Debug)]
pub enum Command {
    // Run a cycle now. The result of that cycle is sent back.
    Refresh(oneshot::Sender<Result<ScanReport, ScanError>>),
    Shutdown,
}

/// Rebuilds the configuration snapshot from the metadata source.
pub struct Scanner {
    source: Arc<dyn MetadataSource>,
    assets: Option<Arc<AssetSync>>,
    store: Arc<ConfigStore>,
    call_timeout: Duration,
}

impl Scanner {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        assets: Option<Arc<AssetSync>>,
        store: Arc<ConfigStore>,
        call_timeout: Duration,
    ) -> Self {
        Scanner {
            source,
            assets,
            store,
            call_timeout,
        }
    }

    /// Runs one full cycle and publishes the result. When the service list
    /// cannot be fetched nothing is published.
    pub async fn scan_once(&self) -> Result<ScanReport, ScanError> {
        let start = Instant::now();

        let services = match timeout(self.call_timeout, self.source.list_services()).await {
            Ok(Ok(services)) => services,
            Ok(Err(e)) => {
                counter!(SCAN_FAILURES).increment(1);
                return Err(e.into());
            }
            Err(_) => {
                counter!(SCAN_FAILURES).increment(1);
                return Err(ScanError::ListTimeout(self.call_timeout));
            }
        };

        let previous = self.store.snapshot();
        let mut builder = SnapshotBuilder::new(&previous);
        let mut report = ScanReport {
            services: services.len(),
            ..Default::default()
        };

        for service in &services {
            if !annotations::is_recognized(&service.annotations) {
                continue;
            }
            let id = DestinationId::new(&service.name, &service.namespace);

            match self.build_record(service).await {
                Ok(record) => builder.insert(id, record),
                Err(e) => {
                    counter!(DESTINATION_FAILURES).increment(1);
                    if builder.preserve(&id) {
                        tracing::warn!(destination = %id, error = %e, "Keeping previous configuration");
                        report.preserved += 1;
                    } else {
                        tracing::warn!(destination = %id, error = %e, "Skipping destination");
                        report.failed += 1;
                    }
                }
            }
        }

        let snapshot = builder.build();
        report.published = snapshot.len();
        self.store.publish(snapshot);

        gauge!(DESTINATIONS).set(report.published as f64);
        histogram!(SCAN_DURATION).record(start.elapsed().as_secs_f64());
        tracing::debug!(
            services = report.services,
            published = report.published,
            preserved = report.preserved,
            failed = report.failed,
            "Scan cycle complete"
        );

        Ok(report)
    }

    async fn build_record(&self, service: &ServiceInfo) -> Result<ConfigurationRecord, DestinationError> {
        let mut record = annotations::parse(&service.annotations, &service.selector);

        if let (Some(assets), Some(source)) = (&self.assets, &record.template_source) {
            match assets.sync(source).await {
                Ok(report) if report.downloaded > 0 => {
                    tracing::info!(
                        service = %service.name,
                        namespace = %service.namespace,
                        downloaded = report.downloaded,
                        "Templates synced"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(service = %service.name, namespace = %service.namespace, error = %e, "Template sync failed");
                }
            }
        }

        let lookup = self
            .source
            .deployment_replicas(&service.namespace, &record.deployment);
        let replicas = match timeout(self.call_timeout, lookup).await {
            Ok(Ok(replicas)) => replicas,
            Ok(Err(e @ MetadataError::NotFound { .. })) => {
                tracing::debug!(error = %e, "Publishing without replica counts");
                Replicas::default()
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(DestinationError::Timeout(self.call_timeout)),
        };

        record.desired_replicas = replicas.desired;
        record.current_replicas = replicas.current;
        Ok(record)
    }

    /// Scans once immediately, then every `interval` until `Shutdown` is
    /// received or every sender is dropped.
    pub async fn run(&self, mut rx: mpsc::Receiver<Command>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        tracing::error!(error = %e, "Scan cycle failed, keeping previous configuration");
                    }
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Refresh(reply)) => {
                        let result = self.scan_once().await;
                        if let Err(e) = &result {
                            tracing::error!(error = %e, "Requested scan failed");
                        }
                        let _ = reply.send(result);
                        ticker.reset();
                    }
                    Some(Command::Shutdown) | None => {
                        tracing::info!("Scanner stopped");
                        return;
                    }
                },
            }
        }
    }
}
