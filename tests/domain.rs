use std::str::FromStr;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};

use pareto_nkl::domain::{GroupKey, StoreCode, UserId, Version, columns};
use pareto_nkl::error::NklError;
use pareto_nkl::layout::{Layout, file_name};

#[test]
fn user_ids_are_ten_digits() {
    let id = UserId::from_str(" 2013000123 ").unwrap();
    assert_eq!(id.as_str(), "2013000123");

    assert_matches!(UserId::from_str("201300012"), Err(NklError::InvalidUserId(_)));
    assert_matches!(UserId::from_str("20130001234"), Err(NklError::InvalidUserId(_)));
    assert_matches!(UserId::from_str("20130A0123"), Err(NklError::InvalidUserId(_)));
}

#[test]
fn store_codes_cannot_escape_the_results_folder() {
    assert!(StoreCode::from_str("TZ01").is_ok());
    assert!(StoreCode::from_str("F-123").is_ok());
    assert!(StoreCode::from_str("T 01_A.1").is_ok());
    assert_matches!(StoreCode::from_str("a\\b"), Err(NklError::InvalidStoreCode(_)));
    assert_matches!(StoreCode::from_str("../T1"), Err(NklError::InvalidStoreCode(_)));
    assert_matches!(StoreCode::from_str(""), Err(NklError::InvalidStoreCode(_)));
}

#[test]
fn version_follows_master_timestamp() {
    let stamp = Utc.with_ymd_and_hms(2024, 5, 31, 23, 0, 0).unwrap();
    assert_eq!(Version::from_timestamp(stamp).as_str(), "05-2024");
    assert_matches!(Version::from_str("05/2024"), Err(NklError::ConfigInvalid(_)));
}

#[test]
fn group_keys_name_their_columns() {
    assert_eq!(GroupKey::AreaManager.column(), columns::AREA_MANAGER);
    assert_eq!(GroupKey::AreaSupervisor.to_string(), "AS");
}

#[test]
fn layout_paths() {
    let layout = Layout::new("pareto_nkl");
    let store: StoreCode = "TZ01".parse().unwrap();
    let version: Version = "05-2024".parse().unwrap();

    assert_eq!(layout.credentials_path(), "pareto_nkl/config/users_pareto_nkl.json");
    assert_eq!(layout.master_path(), "pareto_nkl/master_pareto_nkl.xlsx");
    assert_eq!(layout.results_prefix(), "pareto_nkl/hasil/");

    let path = layout.result_path(&store, &version);
    assert_eq!(file_name(&path), "Hasil_TZ01_v05-2024.xlsx");
    assert!(Layout::mentions_version(&path, &version));
    assert!(!Layout::mentions_version(&path, &"06-2024".parse().unwrap()));
}
