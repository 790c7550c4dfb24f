use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::ObjectStoreSettings;
use crate::error::NklError;
use crate::layout::file_name;

pub const RESULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);
pub const CREDENTIAL_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const LIST_PAGE_SIZE: usize = 500;
const DELETE_BATCH: usize = 100;

/// Outcome of a read against the object store.
///
/// `Missing` means the provider answered that the object does not exist;
/// `Unavailable` covers transport failures and unexpected statuses.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    Missing,
    Unavailable(String),
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub size: Option<u64>,
}

pub trait ObjectStore: Send + Sync {
    fn fetch(&self, path: &str, timeout: Duration) -> Lookup<Vec<u8>>;
    fn stat(&self, path: &str) -> Lookup<ObjectMeta>;
    /// Uploads with overwrite semantics and asks the CDN to drop cached copies.
    fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), NklError>;
    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, NklError>;
    /// Returns the number of objects actually removed.
    fn delete(&self, paths: &[String]) -> Result<usize, NklError>;

    fn exists(&self, path: &str) -> bool {
        self.stat(path).is_found()
    }
}

/// Cloudinary raw-resource backend.
pub struct HttpObjectStore {
    client: Client,
    settings: ObjectStoreSettings,
    last_stamp: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct ResourceInfo {
    public_id: String,
    created_at: String,
    #[serde(default)]
    bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResourcePage {
    #[serde(default)]
    resources: Vec<ResourceInfo>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted: BTreeMap<String, String>,
}

impl HttpObjectStore {
    pub fn new(settings: ObjectStoreSettings) -> Result<Self, NklError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pareto-nkl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| NklError::StoreHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| NklError::StoreHttp(err.to_string()))?;
        Ok(Self {
            client,
            settings,
            last_stamp: AtomicU64::new(0),
        })
    }

    fn delivery_url(&self, path: &str, stamp: u64) -> String {
        format!(
            "https://res.cloudinary.com/{}/raw/upload/v1/{path}?t={stamp}",
            self.settings.cloud_name
        )
    }

    fn admin_url(&self, suffix: &str) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/resources/raw/upload{suffix}",
            self.settings.cloud_name
        )
    }

    fn upload_url(&self) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/raw/upload",
            self.settings.cloud_name
        )
    }

    /// Strictly increasing millisecond stamp, so two fetches never share a URL.
    fn next_stamp(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    fn admin(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.settings.api_key, Some(&self.settings.api_secret))
    }

    fn sign(&self, params: &BTreeMap<&str, String>) -> String {
        let payload = params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        hasher.update(self.settings.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn handle_status(response: Response) -> Result<Response, NklError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "object store request failed".to_string());
        Err(NklError::StoreStatus { status, message })
    }

    fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
    ) -> Result<ResourcePage, NklError> {
        let page_size = LIST_PAGE_SIZE.to_string();
        let mut query = vec![("prefix", prefix), ("max_results", page_size.as_str())];
        if let Some(cursor) = cursor {
            query.push(("next_cursor", cursor));
        }
        let response = self
            .admin(self.client.get(self.admin_url("")))
            .query(&query)
            .send()
            .map_err(|err| NklError::StoreHttp(err.to_string()))?;
        Self::handle_status(response)?
            .json::<ResourcePage>()
            .map_err(|err| NklError::StoreHttp(err.to_string()))
    }
}

impl ObjectStore for HttpObjectStore {
    fn fetch(&self, path: &str, timeout: Duration) -> Lookup<Vec<u8>> {
        let url = self.delivery_url(path, self.next_stamp());
        debug!(path, "object store fetch");
        let response = match self.client.get(&url).timeout(timeout).send() {
            Ok(response) => response,
            Err(err) => {
                warn!(path, error = %err, "object store fetch failed");
                return Lookup::Unavailable(err.to_string());
            }
        };
        match response.status().as_u16() {
            200 => match response.bytes() {
                Ok(bytes) => Lookup::Found(bytes.to_vec()),
                Err(err) => Lookup::Unavailable(err.to_string()),
            },
            404 => Lookup::Missing,
            status => {
                warn!(path, status, "object store fetch returned unexpected status");
                Lookup::Unavailable(format!("status {status}"))
            }
        }
    }

    fn stat(&self, path: &str) -> Lookup<ObjectMeta> {
        let url = self.admin_url(&format!("/{path}"));
        let response = match self.admin(self.client.get(&url)).send() {
            Ok(response) => response,
            Err(err) => return Lookup::Unavailable(err.to_string()),
        };
        match response.status().as_u16() {
            200 => {}
            404 => return Lookup::Missing,
            status => return Lookup::Unavailable(format!("status {status}")),
        }
        match response.json::<ResourceInfo>() {
            Ok(info) => match resource_meta(info) {
                Some(meta) => Lookup::Found(meta),
                None => Lookup::Unavailable("unparseable created_at".to_string()),
            },
            Err(err) => Lookup::Unavailable(err.to_string()),
        }
    }

    fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), NklError> {
        let mut params = BTreeMap::new();
        params.insert("invalidate", "true".to_string());
        params.insert("overwrite", "true".to_string());
        params.insert("public_id", path.to_string());
        params.insert("timestamp", Utc::now().timestamp().to_string());
        let signature = self.sign(&params);

        let mut form = Form::new();
        for (key, value) in params {
            form = form.text(key, value);
        }
        let part = Part::bytes(bytes).file_name(file_name(path).to_string());
        let form = form
            .text("api_key", self.settings.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256")
            .part("file", part);

        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .map_err(|err| NklError::StoreHttp(err.to_string()))?;
        Self::handle_status(response)?;
        info!(path, "object uploaded");
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, NklError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..self.settings.max_list_pages {
            let page = self.list_page(prefix, cursor.as_deref())?;
            items.extend(page.resources.into_iter().filter_map(resource_meta));
            cursor = page.next_cursor;
            if cursor.is_none() {
                return Ok(items);
            }
        }
        warn!(
            prefix,
            pages = self.settings.max_list_pages,
            "listing truncated at page limit"
        );
        Ok(items)
    }

    fn delete(&self, paths: &[String]) -> Result<usize, NklError> {
        let mut deleted = 0usize;
        for batch in paths.chunks(DELETE_BATCH) {
            let mut query = batch
                .iter()
                .map(|path| ("public_ids[]", path.as_str()))
                .collect::<Vec<_>>();
            query.push(("invalidate", "true"));
            let response = self
                .admin(self.client.delete(self.admin_url("")))
                .query(&query)
                .send()
                .map_err(|err| NklError::StoreHttp(err.to_string()))?;
            let body = Self::handle_status(response)?
                .json::<DeleteResponse>()
                .map_err(|err| NklError::StoreHttp(err.to_string()))?;
            deleted += body
                .deleted
                .values()
                .filter(|state| state.as_str() == "deleted")
                .count();
        }
        info!(requested = paths.len(), deleted, "objects deleted");
        Ok(deleted)
    }
}

fn resource_meta(info: ResourceInfo) -> Option<ObjectMeta> {
    let last_modified = DateTime::parse_from_rfc3339(&info.created_at)
        .ok()?
        .with_timezone(&Utc);
    Some(ObjectMeta {
        path: info.public_id,
        last_modified,
        size: info.bytes,
    })
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// In-process store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object with an explicit modification time.
    pub fn insert(&self, path: &str, bytes: Vec<u8>, last_modified: DateTime<Utc>) {
        self.objects().insert(
            path.to_string(),
            StoredObject {
                bytes,
                last_modified,
            },
        );
    }

    /// While offline every call behaves like an unreachable provider.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.objects().get(path).map(|object| object.bytes.clone())
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    fn offline_error() -> NklError {
        NklError::StoreHttp("memory store is offline".to_string())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn fetch(&self, path: &str, _timeout: Duration) -> Lookup<Vec<u8>> {
        if self.is_offline() {
            return Lookup::Unavailable("offline".to_string());
        }
        match self.objects().get(path) {
            Some(object) => Lookup::Found(object.bytes.clone()),
            None => Lookup::Missing,
        }
    }

    fn stat(&self, path: &str) -> Lookup<ObjectMeta> {
        if self.is_offline() {
            return Lookup::Unavailable("offline".to_string());
        }
        match self.objects().get(path) {
            Some(object) => Lookup::Found(ObjectMeta {
                path: path.to_string(),
                last_modified: object.last_modified,
                size: u64::try_from(object.bytes.len()).ok(),
            }),
            None => Lookup::Missing,
        }
    }

    fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), NklError> {
        if self.is_offline() {
            return Err(Self::offline_error());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(path, bytes, Utc::now());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, NklError> {
        if self.is_offline() {
            return Err(Self::offline_error());
        }
        Ok(self
            .objects()
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, object)| ObjectMeta {
                path: path.clone(),
                last_modified: object.last_modified,
                size: u64::try_from(object.bytes.len()).ok(),
            })
            .collect())
    }

    fn delete(&self, paths: &[String]) -> Result<usize, NklError> {
        if self.is_offline() {
            return Err(Self::offline_error());
        }
        let mut objects = self.objects();
        let removed = paths
            .iter()
            .filter(|path| objects.remove(path.as_str()).is_some())
            .count();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ObjectStoreSettings {
        ObjectStoreSettings {
            cloud_name: "demo".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            root: "pareto_nkl".to_string(),
            max_list_pages: 1,
        }
    }

    #[test]
    fn cache_busting_stamps_increase() {
        let store = HttpObjectStore::new(settings()).unwrap();
        let first = store.next_stamp();
        let second = store.next_stamp();
        assert!(second > first);
        assert!(store.delivery_url("a/b.xlsx", second).ends_with(&format!("?t={second}")));
    }

    #[test]
    fn signature_is_deterministic_and_secret_bound() {
        let store = HttpObjectStore::new(settings()).unwrap();
        let mut params = BTreeMap::new();
        params.insert("public_id", "x".to_string());
        params.insert("timestamp", "1".to_string());
        let signature = store.sign(&params);
        assert_eq!(signature.len(), 64);
        assert_eq!(signature, store.sign(&params));

        let mut other = settings();
        other.api_secret = "different".to_string();
        let other = HttpObjectStore::new(other).unwrap();
        assert_ne!(signature, other.sign(&params));
    }

    #[test]
    fn memory_store_distinguishes_missing_from_unavailable() {
        let store = MemoryObjectStore::new();
        assert_eq!(store.fetch("a", DEFAULT_TIMEOUT), Lookup::Missing);
        store.put("a", b"x".to_vec()).unwrap();
        assert_eq!(store.fetch("a", DEFAULT_TIMEOUT), Lookup::Found(b"x".to_vec()));
        store.set_offline(true);
        assert!(matches!(
            store.fetch("a", DEFAULT_TIMEOUT),
            Lookup::Unavailable(_)
        ));
        assert!(!store.exists("a"));
    }
}
