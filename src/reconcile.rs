use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::Caches;
use crate::domain::{StoreCode, Version, columns};
use crate::error::NklError;
use crate::layout::Layout;
use crate::master::{MasterDataset, MasterRow};
use crate::object_store::{Lookup, ObjectStore, RESULT_FETCH_TIMEOUT};
use crate::sheet::{Cell, Table, decode_xlsx, encode_xlsx};

/// Remark written for every non-negative (NL) item on submit.
pub const NL_PLACEHOLDER: &str = "ini item nl!";

/// Working set for one store in one round.
#[derive(Debug, Clone, Serialize)]
pub struct InputSession {
    pub store_code: StoreCode,
    pub store_name: String,
    pub area_manager: String,
    pub area_supervisor: String,
    pub version: Version,
    /// True when remarks were restored from an earlier submission.
    pub resumed: bool,
    pub columns: Vec<String>,
    /// Negative-value (NK) items; each needs a remark.
    pub must_annotate: Vec<MasterRow>,
    /// Non-negative (NL) items, display only.
    pub informational: Vec<MasterRow>,
}

impl InputSession {
    pub fn set_remark(&mut self, item_code: &str, remark: &str) -> Result<(), NklError> {
        let row = self
            .must_annotate
            .iter_mut()
            .find(|row| row.item_code == item_code.trim())
            .ok_or_else(|| NklError::UnknownItem {
                store: self.store_code.to_string(),
                item: item_code.to_string(),
            })?;
        row.remark = remark.to_string();
        Ok(())
    }

    /// Applies a batch of remarks. Entries for NL items are accepted and
    /// dropped since those rows always get the placeholder.
    pub fn apply_remarks(&mut self, remarks: &BTreeMap<String, String>) -> Result<(), NklError> {
        for (item_code, remark) in remarks {
            let item_code = item_code.trim();
            if self
                .informational
                .iter()
                .any(|row| row.item_code == item_code)
            {
                debug!(item = item_code, "remark for NL item ignored");
                continue;
            }
            self.set_remark(item_code, remark)?;
        }
        Ok(())
    }

    pub fn missing_remarks(&self) -> Vec<String> {
        self.must_annotate
            .iter()
            .filter(|row| row.remark.trim().is_empty())
            .map(|row| row.item_code.clone())
            .collect()
    }

    /// The sheet a submit would upload: NK rows with their remarks, then NL
    /// rows with the placeholder.
    pub fn to_artifact(&self) -> Result<Table, NklError> {
        let missing = self.missing_remarks();
        if !missing.is_empty() {
            return Err(NklError::MissingRemarks { items: missing });
        }
        let informational = self.informational.iter().map(|row| MasterRow {
            remark: NL_PLACEHOLDER.to_string(),
            ..row.clone()
        });
        let rows: Vec<MasterRow> = self
            .must_annotate
            .iter()
            .cloned()
            .chain(informational)
            .collect();
        Ok(MasterDataset::table_of(&self.columns, rows.iter()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub path: String,
    pub store_code: StoreCode,
    pub version: Version,
    pub must_annotate: usize,
    pub informational: usize,
}

pub struct ResultReconciler<S: ObjectStore> {
    store: Arc<S>,
    layout: Layout,
    caches: Arc<Caches>,
}

impl<S: ObjectStore> ResultReconciler<S> {
    pub fn new(store: Arc<S>, layout: Layout, caches: Arc<Caches>) -> Self {
        Self {
            store,
            layout,
            caches,
        }
    }

    /// Previously submitted sheet for (store, version). Only counts when the
    /// fetch succeeds and the object is confirmed to still exist.
    pub fn existing_result(&self, store: &StoreCode, version: &Version) -> Option<Table> {
        if let Some(cached) = self.caches.result(store, version) {
            return cached;
        }

        let path = self.layout.result_path(store, version);
        let result = match self.store.fetch(&path, RESULT_FETCH_TIMEOUT) {
            Lookup::Found(bytes) => match decode_xlsx(&bytes) {
                Ok(mut table) => {
                    table.normalize_headers();
                    Some(table)
                }
                Err(err) => {
                    warn!(path = %path, error = %err, "stored result unreadable, starting fresh");
                    None
                }
            },
            Lookup::Missing => None,
            Lookup::Unavailable(reason) => {
                warn!(path = %path, reason = %reason, "stored result unavailable, starting fresh");
                None
            }
        };
        let result = result.filter(|_| {
            let confirmed = self.store.exists(&path);
            if !confirmed {
                debug!(path = %path, "fetched result not confirmed by metadata, ignoring");
            }
            confirmed
        });

        self.caches.store_result(store, version, result.clone());
        result
    }

    pub fn open(
        &self,
        dataset: &MasterDataset,
        store_code: &StoreCode,
    ) -> Result<InputSession, NklError> {
        if dataset.is_empty() {
            return Err(NklError::MasterNotConfigured);
        }
        let rows = dataset.rows_for_store(store_code.as_str());
        let Some(first) = rows.first() else {
            return Err(NklError::UnknownStore(store_code.to_string()));
        };

        let existing = self.existing_result(store_code, &dataset.version);
        let remarks = existing.as_ref().map(remarks_by_item).unwrap_or_default();

        let mut must_annotate = Vec::new();
        let mut informational = Vec::new();
        for row in &rows {
            let mut row = (*row).clone();
            row.remark = remarks.get(&row.item_code).cloned().unwrap_or_default();
            if row.value < 0.0 {
                must_annotate.push(row);
            } else {
                informational.push(row);
            }
        }

        debug!(
            store = %store_code,
            version = %dataset.version,
            nk = must_annotate.len(),
            nl = informational.len(),
            resumed = existing.is_some(),
            "input session opened"
        );
        Ok(InputSession {
            store_code: store_code.clone(),
            store_name: first.store_name.clone(),
            area_manager: first.area_manager.clone(),
            area_supervisor: first.area_supervisor.clone(),
            version: dataset.version.clone(),
            resumed: existing.is_some(),
            columns: dataset.result_columns(),
            must_annotate,
            informational,
        })
    }

    /// Validates and uploads the session, replacing any earlier submission
    /// for the same (store, version). Nothing is written when validation fails.
    pub fn submit(&self, session: &InputSession) -> Result<SubmitReceipt, NklError> {
        let artifact = session.to_artifact()?;
        let bytes = encode_xlsx(&artifact)?;
        let path = self.layout.result_path(&session.store_code, &session.version);
        self.store.put(&path, bytes)?;
        self.caches.invalidate_all();

        info!(store = %session.store_code, version = %session.version, "result submitted");
        Ok(SubmitReceipt {
            path,
            store_code: session.store_code.clone(),
            version: session.version.clone(),
            must_annotate: session.must_annotate.len(),
            informational: session.informational.len(),
        })
    }
}

/// Item code to remark, first occurrence wins.
fn remarks_by_item(table: &Table) -> HashMap<String, String> {
    let mut remarks = HashMap::new();
    for row in 0..table.len() {
        let Some(item) = table.cell(row, columns::ITEM_CODE).map(Cell::to_text) else {
            continue;
        };
        let remark = table
            .cell(row, columns::REMARK)
            .map(Cell::to_raw_text)
            .map(|text| clean_remark(&text))
            .unwrap_or_default();
        remarks.entry(item).or_insert(remark);
    }
    remarks
}

fn clean_remark(text: &str) -> String {
    match text.trim() {
        "nan" | "NaN" | "None" => String::new(),
        _ => text.to_string(),
    }
}
