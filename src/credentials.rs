use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::Caches;
use crate::config::CredentialSettings;
use crate::domain::UserId;
use crate::error::NklError;
use crate::layout::Layout;
use crate::object_store::{CREDENTIAL_FETCH_TIMEOUT, Lookup, ObjectStore};

/// User id to secret, persisted as a single JSON object.
///
/// Secrets are stored and compared in plain text. This mirrors the existing
/// deployment's credential file and is a known weakness: anyone with read
/// access to the object store can read every password.
pub type CredentialMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterOutcome {
    Registered,
    AlreadyExists,
}

pub struct CredentialStore<S: ObjectStore> {
    store: Arc<S>,
    layout: Layout,
    caches: Arc<Caches>,
    attempts: u32,
    backoff: Duration,
}

impl<S: ObjectStore> CredentialStore<S> {
    pub fn new(
        store: Arc<S>,
        layout: Layout,
        caches: Arc<Caches>,
        settings: &CredentialSettings,
    ) -> Self {
        Self {
            store,
            layout,
            caches,
            attempts: settings.lookup_attempts.max(1),
            backoff: settings.backoff(),
        }
    }

    pub fn lookup(&self, user: &UserId) -> Result<Option<String>, NklError> {
        let map = self.load()?;
        Ok(map.get(user.as_str()).cloned())
    }

    /// Exact string comparison against the stored secret.
    pub fn verify(&self, user: &UserId, secret: &str) -> Result<(), NklError> {
        match self.lookup(user)? {
            Some(stored) if stored == secret => Ok(()),
            _ => Err(NklError::InvalidCredentials),
        }
    }

    /// Read-modify-write of the whole credential object. Two registrations
    /// racing each other can lose one of the writes.
    pub fn register(&self, user: &UserId, secret: &str) -> Result<RegisterOutcome, NklError> {
        if secret.is_empty() {
            return Err(NklError::EmptyPassword);
        }
        self.caches.invalidate_credentials();
        let mut map = self.load()?;
        if map.contains_key(user.as_str()) {
            debug!(user = %user, "registration rejected, id exists");
            return Ok(RegisterOutcome::AlreadyExists);
        }
        map.insert(user.as_str().to_string(), secret.to_string());
        self.write(&map)?;
        info!(user = %user, "user registered");
        Ok(RegisterOutcome::Registered)
    }

    /// Overwrites (or creates) the secret for `user`.
    pub fn reset(&self, user: &UserId, secret: &str) -> Result<(), NklError> {
        if secret.is_empty() {
            return Err(NklError::EmptyPassword);
        }
        self.caches.invalidate_credentials();
        let mut map = self.load()?;
        map.insert(user.as_str().to_string(), secret.to_string());
        self.write(&map)?;
        info!(user = %user, "password reset");
        Ok(())
    }

    fn write(&self, map: &CredentialMap) -> Result<(), NklError> {
        let bytes =
            serde_json::to_vec(map).map_err(|err| NklError::ConfigParse(err.to_string()))?;
        self.store.put(&self.layout.credentials_path(), bytes)?;
        self.caches.invalidate_all();
        Ok(())
    }

    fn load(&self) -> Result<CredentialMap, NklError> {
        if let Some(map) = self.caches.credentials() {
            return Ok(map);
        }

        let path = self.layout.credentials_path();
        for attempt in 1..=self.attempts {
            match self.store.fetch(&path, CREDENTIAL_FETCH_TIMEOUT) {
                Lookup::Found(bytes) => match serde_json::from_slice::<CredentialMap>(&bytes) {
                    Ok(map) => {
                        self.caches.store_credentials(map.clone());
                        return Ok(map);
                    }
                    Err(err) => warn!(attempt, error = %err, "credential file unparseable"),
                },
                Lookup::Missing => {
                    debug!(attempt, "credential file not served");
                    return self.confirm_absent(&path);
                }
                Lookup::Unavailable(reason) => {
                    warn!(attempt, reason = %reason, "credential fetch failed");
                }
            }
            if attempt < self.attempts {
                thread::sleep(self.backoff);
            }
        }
        Err(NklError::CredentialsUnavailable)
    }

    /// A fetch miss only counts as "no accounts yet" once the provider's
    /// metadata agrees; a CDN miss on an existing file must not reset it.
    fn confirm_absent(&self, path: &str) -> Result<CredentialMap, NklError> {
        match self.store.stat(path) {
            Lookup::Missing => {
                info!("no credential file yet, starting empty");
                Ok(CredentialMap::new())
            }
            Lookup::Found(_) => {
                warn!(path, "credential file exists but was not served");
                Err(NklError::CredentialsUnavailable)
            }
            Lookup::Unavailable(reason) => {
                warn!(reason = %reason, "credential metadata unavailable");
                Err(NklError::CredentialsUnavailable)
            }
        }
    }
}
