use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{Version, columns};
use crate::error::NklError;
use crate::layout::{Layout, file_name};
use crate::master::{MasterDataset, MasterRow};
use crate::object_store::{DEFAULT_TIMEOUT, Lookup, ObjectStore};
use crate::sheet::{Cell, Table, decode_xlsx, encode_xlsx};

/// Full cross-store export for one round.
#[derive(Debug, Clone)]
pub struct ConsolidatedReport {
    pub version: Version,
    pub table: Table,
    pub sources: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub version: Version,
    pub file_name: String,
    pub rows: usize,
    pub sources: usize,
    pub skipped: Vec<String>,
}

impl ConsolidatedReport {
    pub fn file_name(&self) -> String {
        format!("Full_Rekap_{}.xlsx", self.version)
    }

    pub fn to_xlsx(&self) -> Result<Vec<u8>, NklError> {
        encode_xlsx(&self.table)
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            version: self.version.clone(),
            file_name: self.file_name(),
            rows: self.table.len(),
            sources: self.sources.len(),
            skipped: self.skipped.clone(),
        }
    }
}

pub struct Consolidator<S: ObjectStore> {
    store: Arc<S>,
    layout: Layout,
}

impl<S: ObjectStore> Consolidator<S> {
    pub fn new(store: Arc<S>, layout: Layout) -> Self {
        Self { store, layout }
    }

    /// Left-joins every result of `version` onto the master rows.
    pub fn consolidate(
        &self,
        dataset: &MasterDataset,
        version: &Version,
    ) -> Result<ConsolidatedReport, NklError> {
        let listing = self.store.list(&self.layout.results_prefix())?;
        let mut sources = Vec::new();
        let mut skipped = Vec::new();
        let mut remarks: HashMap<(String, String), String> = HashMap::new();

        for meta in listing
            .iter()
            .filter(|meta| Layout::mentions_version(&meta.path, version))
        {
            let table = match self.store.fetch(&meta.path, DEFAULT_TIMEOUT) {
                Lookup::Found(bytes) => decode_xlsx(&bytes),
                Lookup::Missing => Err(NklError::Sheet("object vanished".to_string())),
                Lookup::Unavailable(reason) => Err(NklError::StoreHttp(reason)),
            };
            let mut table = match table {
                Ok(table) => table,
                Err(err) => {
                    warn!(path = %meta.path, error = %err, "result skipped in consolidation");
                    skipped.push(file_name(&meta.path).to_string());
                    continue;
                }
            };
            table.normalize_headers();
            if !table.has_column(columns::STORE_CODE) || !table.has_column(columns::ITEM_CODE) {
                warn!(path = %meta.path, "result lacks key columns, skipped");
                skipped.push(file_name(&meta.path).to_string());
                continue;
            }
            collect_remarks(&table, &mut remarks);
            sources.push(file_name(&meta.path).to_string());
        }

        let report_columns = dataset.report_columns();
        let joined: Vec<MasterRow> = dataset
            .rows
            .iter()
            .map(|row| MasterRow {
                remark: remarks
                    .get(&(row.store_code.clone(), row.item_code.clone()))
                    .cloned()
                    .unwrap_or_default(),
                ..row.clone()
            })
            .collect();
        let table = MasterDataset::table_of(&report_columns, joined.iter());

        info!(
            version = %version,
            sources = sources.len(),
            skipped = skipped.len(),
            rows = table.len(),
            "consolidation built"
        );
        Ok(ConsolidatedReport {
            version: version.clone(),
            table,
            sources,
            skipped,
        })
    }
}

/// (store, item) to remark; the first artifact seen for a key wins.
fn collect_remarks(table: &Table, remarks: &mut HashMap<(String, String), String>) {
    for row in 0..table.len() {
        let text = |column: &str| {
            table
                .cell(row, column)
                .map(Cell::to_text)
                .unwrap_or_default()
        };
        remarks
            .entry((text(columns::STORE_CODE), text(columns::ITEM_CODE)))
            .or_insert_with(|| {
                table
                    .cell(row, columns::REMARK)
                    .map(Cell::to_raw_text)
                    .unwrap_or_default()
            });
    }
}
