use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{GroupKey, Version};
use crate::layout::Layout;
use crate::master::MasterDataset;
use crate::object_store::ObjectStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStatus {
    pub store_code: String,
    pub store_name: String,
    pub area_manager: String,
    pub area_supervisor: String,
    pub done: bool,
}

impl StoreStatus {
    /// 1 when the store has a result for the round, 0 otherwise.
    pub fn status(&self) -> u8 {
        u8::from(self.done)
    }

    fn group_value(&self, key: GroupKey) -> &str {
        match key {
            GroupKey::AreaManager => &self.area_manager,
            GroupKey::AreaSupervisor => &self.area_supervisor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Totals {
    pub target: usize,
    pub done: usize,
    pub remaining: usize,
    pub ratio: f64,
}

impl Totals {
    fn from_counts(target: usize, done: usize) -> Self {
        let ratio = if target == 0 {
            0.0
        } else {
            done as f64 / target as f64
        };
        Self {
            target,
            done,
            remaining: target - done,
            ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupProgress {
    pub key: String,
    #[serde(flatten)]
    pub totals: Totals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub version: Version,
    pub stores: Vec<StoreStatus>,
    pub finished: Vec<String>,
}

impl ProgressSnapshot {
    pub fn totals(&self) -> Totals {
        let done = self.stores.iter().filter(|store| store.done).count();
        Totals::from_counts(self.stores.len(), done)
    }

    /// Per-group counts, least complete first. Ties keep key order.
    pub fn by_group(&self, key: GroupKey) -> Vec<GroupProgress> {
        let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for store in &self.stores {
            let entry = counts.entry(store.group_value(key)).or_default();
            entry.0 += 1;
            entry.1 += usize::from(store.done);
        }

        let mut groups: Vec<GroupProgress> = counts
            .into_iter()
            .map(|(value, (target, done))| GroupProgress {
                key: value.to_string(),
                totals: Totals::from_counts(target, done),
            })
            .collect();
        groups.sort_by(|a, b| a.totals.ratio.total_cmp(&b.totals.ratio));
        groups
    }

    /// Group values that still have at least one store without a result.
    pub fn groups_with_pending(&self, key: GroupKey) -> Vec<String> {
        self.stores
            .iter()
            .filter(|store| !store.done)
            .map(|store| store.group_value(key).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn pending_in_group(&self, key: GroupKey, value: &str) -> Vec<&StoreStatus> {
        self.stores
            .iter()
            .filter(|store| !store.done && store.group_value(key) == value)
            .collect()
    }
}

pub struct ProgressAggregator<S: ObjectStore> {
    store: Arc<S>,
    layout: Layout,
}

impl<S: ObjectStore> ProgressAggregator<S> {
    pub fn new(store: Arc<S>, layout: Layout) -> Self {
        Self { store, layout }
    }

    /// Store codes with a result artifact for `version`. A failed listing
    /// reads as "nobody finished".
    pub fn finished_stores(&self, version: &Version) -> Vec<String> {
        let prefix = self.layout.results_prefix();
        let listing = match self.store.list(&prefix) {
            Ok(listing) => listing,
            Err(err) => {
                warn!(error = %err, "result listing failed, progress shows no submissions");
                return Vec::new();
            }
        };
        let finished: Vec<String> = listing
            .iter()
            .filter_map(|meta| Layout::parse_result_name(&meta.path, version))
            .map(|code| code.as_str().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        debug!(version = %version, finished = finished.len(), "finished stores resolved");
        finished
    }

    pub fn compute(&self, dataset: &MasterDataset) -> ProgressSnapshot {
        if dataset.is_empty() {
            return ProgressSnapshot {
                version: dataset.version.clone(),
                stores: Vec::new(),
                finished: Vec::new(),
            };
        }
        let finished = self.finished_stores(&dataset.version);
        snapshot(dataset, finished)
    }
}

/// Marks every unique master store as done iff its code is in `finished`.
pub fn snapshot(dataset: &MasterDataset, finished: Vec<String>) -> ProgressSnapshot {
    let done: BTreeSet<&str> = finished.iter().map(String::as_str).collect();
    let stores = dataset
        .stores()
        .into_iter()
        .map(|row| StoreStatus {
            store_code: row.store_code.clone(),
            store_name: row.store_name.clone(),
            area_manager: row.area_manager.clone(),
            area_supervisor: row.area_supervisor.clone(),
            done: done.contains(row.store_code.as_str()),
        })
        .collect();
    ProgressSnapshot {
        version: dataset.version.clone(),
        stores,
        finished,
    }
}
