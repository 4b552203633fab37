use crate::metadata::{MetadataError, MetadataSource, Replicas, ServiceInfo};
use crate::object_store::{ObjectStore, ObjectStoreError, ObjectSummary};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn service(name: &str, namespace: &str, annotations: &[(&str, &str)]) -> ServiceInfo {
    ServiceInfo {
        name: name.to_string(),
        namespace: namespace.to_string(),
        annotations: annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        selector: BTreeMap::from([("app".to_string(), format!("{name}-app"))]),
    }
}

#[derive(Default)]
pub struct FakeMetadataSource {
    services: Mutex<Vec<ServiceInfo>>,
    replicas: Mutex<HashMap<(String, String), Replicas>>,
    unavailable: Mutex<HashSet<(String, String)>>,
    hanging: Mutex<HashSet<(String, String)>>,
    fail_list: AtomicBool,
    hang_list: AtomicBool,
    replica_calls: AtomicUsize,
}

impl FakeMetadataSource {
    pub fn set_services(&self, services: Vec<ServiceInfo>) {
        *self.services.lock() = services;
    }

    pub fn set_replicas(&self, namespace: &str, name: &str, desired: i32, current: i32) {
        self.replicas.lock().insert(
            (namespace.to_string(), name.to_string()),
            Replicas { desired, current },
        );
    }

    /// Lookups for this deployment fail with a 503 until cleared.
    pub fn set_unavailable(&self, namespace: &str, name: &str, unavailable: bool) {
        let key = (namespace.to_string(), name.to_string());
        let mut set = self.unavailable.lock();
        if unavailable {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }

    /// Lookups for this deployment never complete in a reasonable time.
    pub fn set_hanging(&self, namespace: &str, name: &str) {
        self.hanging
            .lock()
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::Relaxed);
    }

    /// Service listings never complete in a reasonable time.
    pub fn hang_list(&self, hang: bool) {
        self.hang_list.store(hang, Ordering::Relaxed);
    }

    pub fn replica_calls(&self) -> usize {
        self.replica_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetadataSource for FakeMetadataSource {
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, MetadataError> {
        if self.hang_list.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail_list.load(Ordering::Relaxed) {
            return Err(MetadataError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                url: "api/v1/services".into(),
            });
        }
        Ok(self.services.lock().clone())
    }

    async fn deployment_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Replicas, MetadataError> {
        self.replica_calls.fetch_add(1, Ordering::Relaxed);
        let key = (namespace.to_string(), name.to_string());

        let hanging = self.hanging.lock().contains(&key);
        if hanging {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.unavailable.lock().contains(&key) {
            return Err(MetadataError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                url: format!("apis/apps/v1/namespaces/{namespace}/deployments/{name}"),
            });
        }

        self.replicas
            .lock()
            .get(&key)
            .copied()
            .ok_or_else(|| MetadataError::NotFound {
                kind: "deployment",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

#[derive(Default)]
pub struct FakeObjectStore {
    // key -> (body, last_modified)
    objects: Mutex<BTreeMap<String, (Bytes, String)>>,
    fail_lists: AtomicBool,
    fail_gets: AtomicBool,
    hang_lists: AtomicBool,
    hang_gets: AtomicBool,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl FakeObjectStore {
    pub fn put(&self, key: &str, body: &str, last_modified: &str) {
        self.objects.lock().insert(
            key.to_string(),
            (Bytes::from(body.to_string()), last_modified.to_string()),
        );
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::Relaxed);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::Relaxed);
    }

    pub fn hang_lists(&self, hang: bool) {
        self.hang_lists.store(hang, Ordering::Relaxed);
    }

    pub fn hang_gets(&self, hang: bool) {
        self.hang_gets.store(hang, Ordering::Relaxed);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        if self.hang_lists.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail_lists.load(Ordering::Relaxed) {
            return Err(ObjectStoreError::List {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                message: "access denied".into(),
            });
        }

        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (body, last_modified))| ObjectSummary {
                key: key.clone(),
                size: body.len() as i64,
                last_modified: last_modified.clone(),
            })
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        if self.hang_gets.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let missing = || ObjectStoreError::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: "NoSuchKey".into(),
        };

        if self.fail_gets.load(Ordering::Relaxed) {
            return Err(missing());
        }
        self.objects
            .lock()
            .get(key)
            .map(|(body, _)| body.clone())
            .ok_or_else(missing)
    }
}
