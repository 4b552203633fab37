//! Mirrors template bundles from object storage into the local template root.
//!
//! A bundle lives under `s3://<bucket>/<prefix>/<template>/<file>`. Every object
//! is compared against what was last written locally and only fetched when its
//! path, template or modification time changed. Files are staged next to their
//! destination and renamed into place, so readers never see a partial file.

use crate::metrics_defs::{ASSET_DOWNLOADS, ASSET_FAILURES};
use crate::object_store::{ObjectStore, ObjectStoreError, ObjectSummary};
use parking_lot::Mutex;
use shared::counter;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const REMOTE_SCHEME: &str = "s3://";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RemotePathError {
    #[error("{0} is an invalid s3 path: missing s3:// scheme")]
    MissingScheme(String),
    #[error("{0} is an invalid s3 path: missing bucket")]
    MissingBucket(String),
    #[error("{0} is an invalid s3 path: missing prefix")]
    MissingPrefix(String),
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    InvalidPath(#[from] RemotePathError),
    #[error("{operation} {target} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        target: String,
        timeout: Duration,
    },
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not move staged file into place: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Bucket and key prefix parsed from `s3://bucket/prefix`. The prefix always
/// ends with `/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemotePath {
    pub bucket: String,
    pub prefix: String,
}

impl RemotePath {
    pub fn parse(expr: &str) -> Result<Self, RemotePathError> {
        let rest = expr
            .strip_prefix(REMOTE_SCHEME)
            .ok_or_else(|| RemotePathError::MissingScheme(expr.to_string()))?;
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));

        if bucket.is_empty() {
            return Err(RemotePathError::MissingBucket(expr.to_string()));
        }
        if prefix.is_empty() {
            return Err(RemotePathError::MissingPrefix(expr.to_string()));
        }

        let mut prefix = prefix.to_string();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }

        Ok(RemotePath {
            bucket: bucket.to_string(),
            prefix,
        })
    }
}

/// Last synced state of one remote object, keyed by `bucket/key`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetRecord {
    pub object_path: String,
    pub template: String,
    pub last_modified: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub listed: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct AssetSync {
    store: Arc<dyn ObjectStore>,
    template_root: PathBuf,
    call_timeout: Duration,
    records: Mutex<HashMap<String, AssetRecord>>,
}

impl AssetSync {
    pub fn new(store: Arc<dyn ObjectStore>, template_root: PathBuf, call_timeout: Duration) -> Self {
        AssetSync {
            store,
            template_root,
            call_timeout,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, object_path: &str) -> Option<AssetRecord> {
        self.records.lock().get(object_path).cloned()
    }

    /// Lists everything under `path_expr` and downloads the objects that
    /// changed since the last sync. Per-object failures are logged and
    /// counted; they are retried on the next call.
    pub async fn sync(&self, path_expr: &str) -> Result<SyncReport, SyncError> {
        let remote = RemotePath::parse(path_expr)?;

        let objects = match timeout(
            self.call_timeout,
            self.store.list(&remote.bucket, &remote.prefix),
        )
        .await
        {
            Ok(listed) => listed.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout {
                operation: "listing",
                target: path_expr.to_string(),
                timeout: self.call_timeout,
            }),
        }
        .inspect_err(|_| counter!(ASSET_FAILURES).increment(1))?;

        let mut report = SyncReport {
            listed: objects.len(),
            ..Default::default()
        };

        for object in objects.iter().filter(|o| o.size != 0) {
            let Some((template, filename)) = asset_target(&object.key) else {
                tracing::warn!(key = %object.key, "Skipping object outside of a template directory");
                report.skipped += 1;
                continue;
            };

            let observed = AssetRecord {
                object_path: format!("{}/{}", remote.bucket, object.key),
                template: template.to_string(),
                last_modified: object.last_modified.clone(),
            };

            let unchanged = self.records.lock().get(&observed.object_path) == Some(&observed);
            if unchanged {
                report.skipped += 1;
                continue;
            }

            match self.download(&remote.bucket, object, template, filename).await {
                Ok(destination) => {
                    tracing::info!(
                        destination = %destination.display(),
                        bucket = %remote.bucket,
                        "Template file downloaded"
                    );
                    counter!(ASSET_DOWNLOADS).increment(1);
                    self.records
                        .lock()
                        .insert(observed.object_path.clone(), observed);
                    report.downloaded += 1;
                }
                Err(e) => {
                    tracing::error!(object = %observed.object_path, error = %e, "Template download failed");
                    counter!(ASSET_FAILURES).increment(1);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn download(
        &self,
        bucket: &str,
        object: &ObjectSummary,
        template: &str,
        filename: &str,
    ) -> Result<PathBuf, SyncError> {
        let body = timeout(self.call_timeout, self.store.get(bucket, &object.key))
            .await
            .map_err(|_| SyncError::Timeout {
                operation: "downloading",
                target: format!("{bucket}/{}", object.key),
                timeout: self.call_timeout,
            })??;

        let dir = self.template_root.join(template);
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &filename, &body)).await?
    }
}

/// Template name and file name of an object key: its last two segments.
fn asset_target(key: &str) -> Option<(&str, &str)> {
    let mut segments = key.rsplit('/');
    let filename = segments.next()?;
    let template = segments.next()?;

    let valid = |s: &str| !s.is_empty() && s != "." && s != "..";
    if valid(template) && valid(filename) {
        Some((template, filename))
    } else {
        None
    }
}

fn write_atomically(dir: &Path, filename: &str, contents: &[u8]) -> Result<PathBuf, SyncError> {
    std::fs::create_dir_all(dir)?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;

    let destination = dir.join(filename);
    staged.persist(&destination)?;
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::FakeObjectStore;

    fn setup() -> (tempfile::TempDir, Arc<FakeObjectStore>, AssetSync) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeObjectStore::default());
        let sync = AssetSync::new(
            store.clone(),
            dir.path().to_path_buf(),
            Duration::from_millis(100),
        );
        (dir, store, sync)
    }

    #[test]
    fn test_parse_remote_path() {
        assert_eq!(
            RemotePath::parse("s3://bucket/templates").unwrap(),
            RemotePath {
                bucket: "bucket".into(),
                prefix: "templates/".into()
            }
        );
        assert_eq!(
            RemotePath::parse("s3://bucket/a/b/").unwrap().prefix,
            "a/b/"
        );
        assert!(matches!(
            RemotePath::parse("https://bucket/templates"),
            Err(RemotePathError::MissingScheme(_))
        ));
        assert!(matches!(
            RemotePath::parse("s3:///templates"),
            Err(RemotePathError::MissingBucket(_))
        ));
        assert!(matches!(
            RemotePath::parse("s3://bucket"),
            Err(RemotePathError::MissingPrefix(_))
        ));
        assert!(matches!(
            RemotePath::parse("s3://bucket/"),
            Err(RemotePathError::MissingPrefix(_))
        ));
    }

    #[test]
    fn test_asset_target() {
        assert_eq!(
            asset_target("templates/checkout/index.html"),
            Some(("checkout", "index.html"))
        );
        assert_eq!(asset_target("index.html"), None);
        assert_eq!(asset_target("templates/checkout/"), None);
        assert_eq!(asset_target("templates/../index.html"), None);
    }

    #[tokio::test]
    async fn test_malformed_path_makes_no_calls() {
        let (_dir, store, sync) = setup();
        assert!(matches!(
            sync.sync("bucket/templates").await,
            Err(SyncError::InvalidPath(_))
        ));
        assert_eq!(store.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_downloads_once_per_change() {
        let (dir, store, sync) = setup();
        store.put("templates/checkout/index.html", "<h1>v1</h1>", "t1");
        store.put("templates/checkout/style.css", "h1 {}", "t1");

        let report = sync.sync("s3://bucket/templates").await.unwrap();
        assert_eq!(report.downloaded, 2);
        assert_eq!(store.get_calls(), 2);

        let html = dir.path().join("checkout").join("index.html");
        assert_eq!(std::fs::read_to_string(&html).unwrap(), "<h1>v1</h1>");
        assert_eq!(
            sync.record("bucket/templates/checkout/index.html"),
            Some(AssetRecord {
                object_path: "bucket/templates/checkout/index.html".into(),
                template: "checkout".into(),
                last_modified: "t1".into(),
            })
        );

        // Unchanged timestamps: listing only, no body fetch
        let report = sync.sync("s3://bucket/templates/").await.unwrap();
        assert_eq!(report.downloaded, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(store.get_calls(), 2);
        assert_eq!(store.list_calls(), 2);

        // New modification time triggers exactly one more download
        store.put("templates/checkout/index.html", "<h1>v2</h1>", "t2");
        let report = sync.sync("s3://bucket/templates").await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(store.get_calls(), 3);
        assert_eq!(std::fs::read_to_string(&html).unwrap(), "<h1>v2</h1>");

        // Staged files are renamed into place, nothing else is left behind
        let mut files: Vec<_> = std::fs::read_dir(dir.path().join("checkout"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert_eq!(files, ["index.html", "style.css"]);
    }

    #[tokio::test]
    async fn test_skips_empty_and_invalid_objects() {
        let (dir, store, sync) = setup();
        store.put("templates/checkout/", "", "t1");
        store.put("templates/index.html", "<h1>root</h1>", "t1");

        let report = sync.sync("s3://bucket/templates").await.unwrap();
        assert_eq!(report.listed, 2);
        assert_eq!(report.downloaded, 1);
        assert!(dir.path().join("templates").join("index.html").exists());

        let report = sync.sync("s3://bucket/templates").await.unwrap();
        assert_eq!(report.downloaded, 0);
    }

    #[tokio::test]
    async fn test_failed_download_is_retried() {
        let (dir, store, sync) = setup();
        store.put("templates/checkout/index.html", "<h1>v1</h1>", "t1");
        store.fail_gets(true);

        let report = sync.sync("s3://bucket/templates").await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(sync.record("bucket/templates/checkout/index.html").is_none());
        assert!(!dir.path().join("checkout").join("index.html").exists());

        store.fail_gets(false);
        let report = sync.sync("s3://bucket/templates").await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert!(dir.path().join("checkout").join("index.html").exists());
    }

    #[tokio::test]
    async fn test_download_timeout_is_retried() {
        let (dir, store, sync) = setup();
        store.put("templates/checkout/index.html", "<h1>v1</h1>", "t1");
        store.hang_gets(true);

        let report = sync.sync("s3://bucket/templates").await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.downloaded, 0);
        assert!(sync.record("bucket/templates/checkout/index.html").is_none());
        assert!(!dir.path().join("checkout").exists());

        store.hang_gets(false);
        let report = sync.sync("s3://bucket/templates").await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(store.get_calls(), 2);
        assert!(sync.record("bucket/templates/checkout/index.html").is_some());
    }

    #[tokio::test]
    async fn test_listing_timeout() {
        let (_dir, store, sync) = setup();
        store.put("templates/checkout/index.html", "<h1>v1</h1>", "t1");
        store.hang_lists(true);

        assert!(matches!(
            sync.sync("s3://bucket/templates").await,
            Err(SyncError::Timeout {
                operation: "listing",
                ..
            })
        ));
        assert_eq!(store.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_listing_failure() {
        let (_dir, store, sync) = setup();
        store.fail_lists(true);
        assert!(matches!(
            sync.sync("s3://bucket/templates").await,
            Err(SyncError::ObjectStore(_))
        ));
    }
}
