use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Utc;

use pareto_nkl::consolidate::Consolidator;
use pareto_nkl::error::NklError;
use pareto_nkl::layout::Layout;
use pareto_nkl::master::MasterDataset;
use pareto_nkl::object_store::MemoryObjectStore;
use pareto_nkl::sheet::{Cell, Table, decode_xlsx, encode_xlsx};

fn dataset() -> MasterDataset {
    let mut table = Table::new(
        ["KDTOKO", "AM", "PLU", "RUPIAH"]
            .iter()
            .map(|column| column.to_string())
            .collect(),
    );
    for (store, item, value) in [("T1", "P1", -100.0), ("T1", "P2", 50.0), ("T2", "P1", -7.0)] {
        table.push_row(vec![
            Cell::text(store),
            Cell::text("AM-A"),
            Cell::text(item),
            Cell::Number(value),
        ]);
    }
    MasterDataset::from_table(table, "05-2024".parse().unwrap()).unwrap()
}

fn result(rows: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut table = Table::new(
        ["KDTOKO", "PLU", "KETERANGAN"]
            .iter()
            .map(|column| column.to_string())
            .collect(),
    );
    for (store, item, remark) in rows {
        table.push_row(vec![Cell::text(*store), Cell::text(*item), Cell::text(*remark)]);
    }
    encode_xlsx(&table).unwrap()
}

#[test]
fn results_are_left_joined_onto_master() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert(
        "pareto_nkl/hasil/Hasil_T1_v05-2024.xlsx",
        result(&[("T1", "P1", "rusak"), ("T1", "P2", "ini item nl!")]),
        Utc::now(),
    );
    store.insert(
        "pareto_nkl/hasil/Hasil_T2_v04-2024.xlsx",
        result(&[("T2", "P1", "last round")]),
        Utc::now(),
    );
    store.insert(
        "pareto_nkl/hasil/Hasil_T3_v05-2024.xlsx",
        b"truncated upload".to_vec(),
        Utc::now(),
    );
    let consolidator = Consolidator::new(Arc::clone(&store), Layout::new("pareto_nkl"));

    let master = dataset();
    let report = consolidator.consolidate(&master, &master.version).unwrap();
    assert_eq!(report.file_name(), "Full_Rekap_05-2024.xlsx");
    assert_eq!(report.sources, vec!["Hasil_T1_v05-2024.xlsx"]);
    assert_eq!(report.skipped, vec!["Hasil_T3_v05-2024.xlsx"]);

    let table = &report.table;
    assert_eq!(table.columns, vec!["KDTOKO", "AM", "PLU", "RUPIAH", "KETERANGAN"]);
    assert_eq!(table.len(), 3);
    assert_eq!(table.cell(0, "KETERANGAN"), Some(&Cell::text("rusak")));
    assert_eq!(table.cell(1, "KETERANGAN"), Some(&Cell::text("ini item nl!")));
    assert_eq!(table.cell(2, "KETERANGAN"), Some(&Cell::text("")));

    let written = decode_xlsx(&report.to_xlsx().unwrap()).unwrap();
    assert_eq!(written.len(), 3);
    let summary = report.summary();
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.sources, 1);
}

#[test]
fn earlier_artifact_wins_on_duplicate_keys() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert(
        "pareto_nkl/hasil/Hasil_T1_v05-2024.xlsx",
        result(&[("T1", "P1", "first")]),
        Utc::now(),
    );
    store.insert(
        "pareto_nkl/hasil/Hasil_T1_v05-2024_copy.xlsx",
        result(&[("T1", "P1", "second")]),
        Utc::now(),
    );
    let consolidator = Consolidator::new(Arc::clone(&store), Layout::new("pareto_nkl"));

    let master = dataset();
    let report = consolidator.consolidate(&master, &master.version).unwrap();
    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.table.cell(0, "KETERANGAN"), Some(&Cell::text("first")));
}

#[test]
fn listing_failure_is_reported() {
    let store = Arc::new(MemoryObjectStore::new());
    store.set_offline(true);
    let consolidator = Consolidator::new(Arc::clone(&store), Layout::new("pareto_nkl"));

    let master = dataset();
    assert_matches!(
        consolidator.consolidate(&master, &master.version),
        Err(NklError::StoreHttp(_))
    );
}

#[test]
fn remarks_are_copied_verbatim() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert(
        "pareto_nkl/hasil/Hasil_T1_v05-2024.xlsx",
        result(&[("T1", "P1", " rak 3, bawah ")]),
        Utc::now(),
    );
    let consolidator = Consolidator::new(Arc::clone(&store), Layout::new("pareto_nkl"));

    let master = dataset();
    let report = consolidator.consolidate(&master, &master.version).unwrap();
    assert_eq!(report.table.cell(0, "KETERANGAN"), Some(&Cell::text(" rak 3, bawah ")));
}
