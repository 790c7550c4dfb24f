use std::time::Duration;

use moka::sync::Cache;

use crate::config::CacheSettings;
use crate::credentials::CredentialMap;
use crate::domain::{StoreCode, Version};
use crate::master::MasterDataset;
use crate::sheet::Table;

type ResultKey = (StoreCode, Version);

/// Process-wide read caches, one per logical resource, each with its own
/// time-to-live. Every write to the object store calls [`Caches::invalidate_all`].
#[derive(Clone)]
pub struct Caches {
    credentials: Cache<(), CredentialMap>,
    master: Cache<(), MasterDataset>,
    results: Cache<ResultKey, Option<Table>>,
}

impl Caches {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            credentials: single_entry(settings.credentials_ttl_secs),
            master: single_entry(settings.master_ttl_secs),
            results: Cache::builder()
                .time_to_live(Duration::from_secs(settings.results_ttl_secs))
                .build(),
        }
    }

    pub fn credentials(&self) -> Option<CredentialMap> {
        self.credentials.get(&())
    }

    pub fn store_credentials(&self, map: CredentialMap) {
        self.credentials.insert((), map);
    }

    pub fn invalidate_credentials(&self) {
        self.credentials.invalidate(&());
    }

    pub fn master_or_load<F>(&self, load: F) -> MasterDataset
    where
        F: FnOnce() -> MasterDataset,
    {
        self.master.get_with((), load)
    }

    pub fn invalidate_master(&self) {
        self.master.invalidate(&());
    }

    /// `Some(None)` is a cached "no prior result".
    pub fn result(&self, store: &StoreCode, version: &Version) -> Option<Option<Table>> {
        self.results.get(&(store.clone(), version.clone()))
    }

    pub fn store_result(&self, store: &StoreCode, version: &Version, result: Option<Table>) {
        self.results.insert((store.clone(), version.clone()), result);
    }

    pub fn invalidate_all(&self) {
        tracing::debug!("invalidating all read caches");
        self.credentials.invalidate_all();
        self.master.invalidate_all();
        self.results.invalidate_all();
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new(&CacheSettings::default())
    }
}

fn single_entry<V>(ttl_secs: u64) -> Cache<(), V>
where
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(1)
        .time_to_live(Duration::from_secs(ttl_secs))
        .build()
}
