use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::Caches;
use crate::domain::{Version, columns};
use crate::error::NklError;
use crate::layout::Layout;
use crate::object_store::{DEFAULT_TIMEOUT, Lookup, ObjectStore};
use crate::sheet::{Cell, Table, decode_xlsx, encode_xlsx};

/// One (store, item) line of the master sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MasterRow {
    pub store_code: String,
    pub store_name: String,
    pub area_manager: String,
    pub area_supervisor: String,
    pub item_code: String,
    pub description: String,
    pub quantity: f64,
    pub value: f64,
    pub remark: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Cell>,
}

impl MasterRow {
    fn from_table(table: &Table, row: usize) -> Self {
        let text = |column: &str| {
            table
                .cell(row, column)
                .map(Cell::to_text)
                .unwrap_or_default()
        };
        let amount = |column: &str| table.cell(row, column).map(parse_amount).unwrap_or(0.0);

        let extra = table
            .columns
            .iter()
            .filter(|column| !is_core_column(column))
            .map(|column| {
                let cell = match table.cell(row, column) {
                    Some(Cell::Number(value)) => Cell::Number(*value),
                    Some(other) => Cell::Text(other.to_text()),
                    None => Cell::text(""),
                };
                (column.clone(), cell)
            })
            .collect();

        Self {
            store_code: text(columns::STORE_CODE),
            store_name: text(columns::STORE_NAME),
            area_manager: text(columns::AREA_MANAGER),
            area_supervisor: text(columns::AREA_SUPERVISOR),
            item_code: text(columns::ITEM_CODE),
            description: text(columns::DESCRIPTION),
            quantity: amount(columns::QUANTITY),
            value: amount(columns::VALUE),
            remark: String::new(),
            extra,
        }
    }

    pub fn cell(&self, column: &str) -> Cell {
        match column {
            columns::STORE_CODE => Cell::text(&self.store_code),
            columns::STORE_NAME => Cell::text(&self.store_name),
            columns::AREA_MANAGER => Cell::text(&self.area_manager),
            columns::AREA_SUPERVISOR => Cell::text(&self.area_supervisor),
            columns::ITEM_CODE => Cell::text(&self.item_code),
            columns::DESCRIPTION => Cell::text(&self.description),
            columns::QUANTITY => Cell::Number(self.quantity),
            columns::VALUE => Cell::Number(self.value),
            columns::REMARK => Cell::text(&self.remark),
            other => self.extra.get(other).cloned().unwrap_or_default(),
        }
    }
}

fn is_core_column(column: &str) -> bool {
    matches!(
        column,
        columns::STORE_CODE
            | columns::STORE_NAME
            | columns::AREA_MANAGER
            | columns::AREA_SUPERVISOR
            | columns::ITEM_CODE
            | columns::DESCRIPTION
            | columns::QUANTITY
            | columns::VALUE
            | columns::REMARK
    )
}

/// Tolerant amount parser: drops thousands separators and spaces, reads
/// `(1,200)` as `-1200`, and turns anything unparseable into zero.
pub fn parse_amount(cell: &Cell) -> f64 {
    let raw = match cell {
        Cell::Empty => return 0.0,
        Cell::Number(value) => return if value.is_finite() { *value } else { 0.0 },
        Cell::Text(text) => text,
    };
    let mut cleaned: String = raw.chars().filter(|ch| *ch != ',' && !ch.is_whitespace()).collect();
    if cleaned.contains('(') && cleaned.contains(')') {
        cleaned = format!("-{}", cleaned.replace(['(', ')'], ""));
    }
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => 0.0,
    }
}

/// Master rows plus the round they belong to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MasterDataset {
    pub version: Version,
    pub columns: Vec<String>,
    pub rows: Vec<MasterRow>,
}

impl MasterDataset {
    pub fn empty(version: Version) -> Self {
        Self {
            version,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Normalises headers, coerces amounts, blanks remarks and keeps the last
    /// row for every (store, item) pair.
    pub fn from_table(mut table: Table, version: Version) -> Result<Self, NklError> {
        table.normalize_headers();
        require_key_columns(&table)?;
        let table = dedup_keep_last(table);

        let rows = (0..table.len())
            .map(|row| MasterRow::from_table(&table, row))
            .collect();
        Ok(Self {
            version,
            columns: table.columns,
            rows,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_table(&self) -> Table {
        Self::table_of(&self.columns, self.rows.iter())
    }

    pub fn table_of<'a>(
        columns: &[String],
        rows: impl Iterator<Item = &'a MasterRow>,
    ) -> Table {
        let mut table = Table::new(columns.to_vec());
        for row in rows {
            table
                .rows
                .push(columns.iter().map(|column| row.cell(column)).collect());
        }
        table
    }

    /// Master column order with the remark column moved to the end.
    pub fn result_columns(&self) -> Vec<String> {
        let mut result: Vec<String> = self
            .columns
            .iter()
            .filter(|column| column.as_str() != columns::REMARK)
            .cloned()
            .collect();
        result.push(columns::REMARK.to_string());
        result
    }

    /// Master column order, remark appended only when the master lacks it.
    pub fn report_columns(&self) -> Vec<String> {
        let mut result = self.columns.clone();
        if !result.iter().any(|column| column == columns::REMARK) {
            result.push(columns::REMARK.to_string());
        }
        result
    }

    pub fn area_managers(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| row.area_manager.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn store_names(&self, area_manager: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter(|row| row.area_manager == area_manager)
            .map(|row| row.store_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn find_store(&self, area_manager: &str, store_name: &str) -> Option<&MasterRow> {
        self.rows
            .iter()
            .find(|row| row.area_manager == area_manager && row.store_name == store_name)
    }

    pub fn rows_for_store(&self, store_code: &str) -> Vec<&MasterRow> {
        self.rows
            .iter()
            .filter(|row| row.store_code == store_code)
            .collect()
    }

    /// First row of every store, in master order.
    pub fn stores(&self) -> Vec<&MasterRow> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.store_code.as_str()))
            .collect()
    }
}

fn require_key_columns(table: &Table) -> Result<(), NklError> {
    for column in [columns::STORE_CODE, columns::ITEM_CODE] {
        if !table.has_column(column) {
            return Err(NklError::MalformedMaster(column.to_string()));
        }
    }
    Ok(())
}

fn row_key(table: &Table, row: usize) -> (String, String) {
    let text = |column: &str| {
        table
            .cell(row, column)
            .map(Cell::to_text)
            .unwrap_or_default()
    };
    (text(columns::STORE_CODE), text(columns::ITEM_CODE))
}

fn dedup_keep_last(mut table: Table) -> Table {
    let mut last_seen: HashMap<(String, String), usize> = HashMap::new();
    for row in 0..table.len() {
        last_seen.insert(row_key(&table, row), row);
    }
    let keep: Vec<bool> = (0..table.len())
        .map(|row| last_seen.get(&row_key(&table, row)) == Some(&row))
        .collect();
    let mut index = 0;
    table.rows.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
    table
}

/// Upsert of an incoming sheet onto the current master: union of columns,
/// incoming rows win on (store, item), remarks blanked.
pub fn merge_master(existing: &MasterDataset, mut incoming: Table) -> Result<Table, NklError> {
    incoming.normalize_headers();
    require_key_columns(&incoming)?;

    let mut merged = dedup_keep_last(Table::concat(vec![existing.to_table(), incoming]));
    if let Some(remark) = merged.column_index(columns::REMARK) {
        for row in &mut merged.rows {
            row[remark] = Cell::text("");
        }
    }
    Ok(merged)
}

#[derive(Debug, Clone, Serialize)]
pub struct MasterUpdate {
    pub rows: usize,
    pub stores: usize,
    pub replaced_existing: bool,
}

pub struct MasterDatasetManager<S: ObjectStore> {
    store: Arc<S>,
    layout: Layout,
    caches: Arc<Caches>,
}

impl<S: ObjectStore> MasterDatasetManager<S> {
    pub fn new(store: Arc<S>, layout: Layout, caches: Arc<Caches>) -> Self {
        Self {
            store,
            layout,
            caches,
        }
    }

    /// Current master, served from a short-lived cache. Never fails: an
    /// absent or unreadable master yields an empty dataset.
    pub fn load(&self) -> MasterDataset {
        self.caches.master_or_load(|| self.load_uncached())
    }

    fn load_uncached(&self) -> MasterDataset {
        let path = self.layout.master_path();
        let version = match self.store.stat(&path) {
            Lookup::Found(meta) => Version::from_timestamp(meta.last_modified),
            Lookup::Missing => {
                info!(path = %path, "no master dataset configured");
                return MasterDataset::empty(Version::current());
            }
            Lookup::Unavailable(reason) => {
                warn!(path = %path, reason = %reason, "master metadata unavailable");
                return MasterDataset::empty(Version::current());
            }
        };

        let bytes = match self.store.fetch(&path, DEFAULT_TIMEOUT) {
            Lookup::Found(bytes) => bytes,
            Lookup::Missing => return MasterDataset::empty(Version::current()),
            Lookup::Unavailable(reason) => {
                warn!(path = %path, reason = %reason, "master fetch failed");
                return MasterDataset::empty(Version::current());
            }
        };

        match decode_xlsx(&bytes).and_then(|table| MasterDataset::from_table(table, version)) {
            Ok(dataset) => {
                debug!(rows = dataset.rows.len(), version = %dataset.version, "master loaded");
                dataset
            }
            Err(err) => {
                warn!(error = %err, "master dataset unreadable");
                MasterDataset::empty(Version::current())
            }
        }
    }

    /// Uncached strict read. `None` only when the master is confirmed absent.
    fn load_for_update(&self) -> Result<Option<MasterDataset>, NklError> {
        let path = self.layout.master_path();
        match self.store.fetch(&path, DEFAULT_TIMEOUT) {
            Lookup::Found(bytes) => {
                let table = decode_xlsx(&bytes)?;
                MasterDataset::from_table(table, Version::current()).map(Some)
            }
            Lookup::Missing => match self.store.stat(&path) {
                Lookup::Missing => Ok(None),
                Lookup::Found(_) => {
                    warn!(path = %path, "master listed but not served");
                    Err(NklError::StoreHttp(format!(
                        "{path} exists but could not be fetched"
                    )))
                }
                Lookup::Unavailable(reason) => Err(NklError::StoreHttp(reason)),
            },
            Lookup::Unavailable(reason) => {
                warn!(path = %path, reason = %reason, "master fetch failed before merge");
                Err(NklError::StoreHttp(reason))
            }
        }
    }

    pub fn exists(&self) -> bool {
        self.store.exists(&self.layout.master_path())
    }

    /// Merges `incoming` onto the stored master and uploads the result.
    /// Fails instead of publishing when the stored master cannot be read.
    pub fn upsert(&self, incoming: Table) -> Result<MasterUpdate, NklError> {
        self.caches.invalidate_master();
        let existing = self.load_for_update()?;
        let replaced_existing = existing.is_some();
        let current = existing.unwrap_or_else(|| MasterDataset::empty(Version::current()));
        let merged = merge_master(&current, incoming)?;
        self.publish(&merged)?;

        let stores = (0..merged.len())
            .map(|row| row_key(&merged, row).0)
            .collect::<HashSet<_>>()
            .len();
        info!(rows = merged.len(), stores, "master dataset updated");
        Ok(MasterUpdate {
            rows: merged.len(),
            stores,
            replaced_existing,
        })
    }

    pub fn publish(&self, table: &Table) -> Result<(), NklError> {
        let bytes = encode_xlsx(table)?;
        self.store.put(&self.layout.master_path(), bytes)?;
        self.caches.invalidate_all();
        Ok(())
    }

    pub fn delete(&self) -> Result<bool, NklError> {
        let removed = self.store.delete(&[self.layout.master_path()])?;
        self.caches.invalidate_all();
        Ok(removed > 0)
    }
}
