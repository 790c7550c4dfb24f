use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;

use pareto_nkl::app::{App, ProgressEvent, ProgressSink};
use pareto_nkl::config::{CacheSettings, Config, CredentialSettings, ObjectStoreSettings};
use pareto_nkl::credentials::RegisterOutcome;
use pareto_nkl::domain::{StoreCode, UserId};
use pareto_nkl::error::NklError;
use pareto_nkl::object_store::{MemoryObjectStore, ObjectStore};
use pareto_nkl::output::JsonOutput;
use pareto_nkl::sheet::{Cell, Table, encode_xlsx};
use pareto_nkl::upstream::UpstreamSource;

struct StaticUpstream {
    table: Table,
}

impl UpstreamSource for StaticUpstream {
    fn pull(&self) -> Result<Table, NklError> {
        Ok(self.table.clone())
    }
}

struct FailingUpstream;

impl UpstreamSource for FailingUpstream {
    fn pull(&self) -> Result<Table, NklError> {
        Err(NklError::UpstreamStatus {
            status: 401,
            message: "invalid api key".to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn config() -> Config {
    Config {
        object_store: ObjectStoreSettings {
            cloud_name: "demo".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            root: "pareto_nkl".to_string(),
            max_list_pages: 20,
        },
        upstream: None,
        admin_secret: "admin-pass".to_string(),
        cache: CacheSettings::default(),
        credentials: CredentialSettings {
            lookup_attempts: 1,
            lookup_backoff_ms: 0,
        },
    }
}

fn inventory() -> Table {
    let mut table = Table::new(
        ["kdtoko", "nama toko", "am", "as", "plu", "rupiah"]
            .iter()
            .map(|column| column.to_string())
            .collect(),
    );
    for (store, am, item, value) in [
        ("S1", "AM-A", "P1", -100.0),
        ("S1", "AM-A", "P2", 20.0),
        ("S2", "AM-A", "P1", -3.0),
        ("S3", "AM-B", "P7", -1.0),
    ] {
        table.push_row(vec![
            Cell::text(store),
            Cell::text(format!("Toko {store}")),
            Cell::text(am),
            Cell::text("AS-1"),
            Cell::text(item),
            Cell::Number(value),
        ]);
    }
    table
}

fn app(store: &Arc<MemoryObjectStore>) -> App<MemoryObjectStore, StaticUpstream> {
    App::new(
        Arc::clone(store),
        Some(StaticUpstream { table: inventory() }),
        &config(),
    )
}

fn user() -> UserId {
    "2013000123".parse().unwrap()
}

#[test]
fn admin_operations_require_the_admin_secret() {
    let store = Arc::new(MemoryObjectStore::new());
    let app = app(&store);

    assert_matches!(app.authorize_admin("wrong"), Err(NklError::AdminDenied));
    assert!(app.authorize_admin("admin-pass").is_ok());
}

#[test]
fn sync_then_submit_moves_progress() {
    let store = Arc::new(MemoryObjectStore::new());
    let app = app(&store);

    let home = app.home();
    assert!(!home.configured);
    assert_eq!(home.totals.target, 0);

    let admin = app.authorize_admin("admin-pass").unwrap();
    let sink = RecordingSink::default();
    let update = app.sync_master(&admin, &sink).unwrap();
    assert_eq!(update.rows, 4);
    assert_eq!(update.stores, 3);
    let events = sink.events.lock().unwrap();
    assert!(events.last().and_then(|event| event.elapsed).is_some());
    drop(events);

    assert_eq!(
        app.register(&user(), "pw", "pw").unwrap(),
        RegisterOutcome::Registered
    );
    assert_matches!(
        app.login(&user(), "nope"),
        Err(NklError::InvalidCredentials)
    );
    let session = app.login(&user(), "pw").unwrap();

    let s1: StoreCode = "S1".parse().unwrap();
    let mut input = app.open_session(&session, &s1).unwrap();
    input.set_remark("P1", "selisih stok").unwrap();
    app.submit(&session, &input).unwrap();

    let home = app.home();
    assert!(home.configured);
    assert_eq!(home.totals.target, 3);
    assert_eq!(home.totals.done, 1);
    assert_eq!(home.by_area_manager[0].key, "AM-B");
    assert_eq!(home.by_area_manager[1].totals.done, 1);
}

#[test]
fn register_checks_confirmation() {
    let store = Arc::new(MemoryObjectStore::new());
    let app = app(&store);

    assert_matches!(
        app.register(&user(), "pw", "pw2"),
        Err(NklError::PasswordMismatch)
    );
    assert_eq!(store.write_count(), 0);
}

#[test]
fn upload_merges_sheet_and_reset_password_works() {
    let store = Arc::new(MemoryObjectStore::new());
    let app = app(&store);
    let admin = app.authorize_admin("admin-pass").unwrap();
    let sink = RecordingSink::default();

    let bytes = encode_xlsx(&inventory()).unwrap();
    let update = app.upload_master(&admin, &bytes, &sink).unwrap();
    assert_eq!(update.rows, 4);
    assert!(!app.master().is_empty());

    app.reset_password(&admin, &user(), "fresh").unwrap();
    assert!(app.login(&user(), "fresh").is_ok());

    assert_matches!(
        app.upload_master(&admin, b"garbage", &sink),
        Err(NklError::Sheet(_))
    );
}

#[test]
fn purge_removes_only_results() {
    let store = Arc::new(MemoryObjectStore::new());
    let app = app(&store);
    let admin = app.authorize_admin("admin-pass").unwrap();
    let sink = RecordingSink::default();
    app.sync_master(&admin, &sink).unwrap();
    app.register(&user(), "pw", "pw").unwrap();
    let session = app.login(&user(), "pw").unwrap();
    for code in ["S2", "S3"] {
        let mut input = app.open_session(&session, &code.parse().unwrap()).unwrap();
        let item = input.must_annotate[0].item_code.clone();
        input.set_remark(&item, "ok").unwrap();
        app.submit(&session, &input).unwrap();
    }
    assert_eq!(app.home().totals.done, 2);

    assert_eq!(app.purge_results(&admin, &sink).unwrap(), 2);
    assert_eq!(app.home().totals.done, 0);
    assert!(store.exists("pareto_nkl/master_pareto_nkl.xlsx"));
    assert!(store.exists("pareto_nkl/config/users_pareto_nkl.json"));
}

#[test]
fn delete_master_can_purge_results_too() {
    let store = Arc::new(MemoryObjectStore::new());
    let app = app(&store);
    let admin = app.authorize_admin("admin-pass").unwrap();
    let sink = JsonOutput;
    app.sync_master(&admin, &sink).unwrap();
    store
        .put("pareto_nkl/hasil/Hasil_S1_v01-2000.xlsx", b"x".to_vec())
        .unwrap();

    let summary = app.delete_master(&admin, true, &sink).unwrap();
    assert!(summary.master_deleted);
    assert_eq!(summary.results_deleted, 1);
    assert!(!app.home().configured);

    let s1: StoreCode = "S1".parse().unwrap();
    app.register(&user(), "pw", "pw").unwrap();
    let session = app.login(&user(), "pw").unwrap();
    assert_matches!(
        app.open_session(&session, &s1),
        Err(NklError::MasterNotConfigured)
    );
}

#[test]
fn consolidation_defaults_to_current_round() {
    let store = Arc::new(MemoryObjectStore::new());
    let app = app(&store);
    let admin = app.authorize_admin("admin-pass").unwrap();
    let sink = RecordingSink::default();
    app.sync_master(&admin, &sink).unwrap();
    app.register(&user(), "pw", "pw").unwrap();
    let session = app.login(&user(), "pw").unwrap();
    let mut input = app.open_session(&session, &"S1".parse().unwrap()).unwrap();
    input.set_remark("P1", "hilang").unwrap();
    app.submit(&session, &input).unwrap();

    let report = app.consolidate(&admin, None, &sink).unwrap();
    assert_eq!(report.version, app.master().version);
    assert_eq!(report.table.len(), 4);
    assert_eq!(report.table.cell(0, "KETERANGAN"), Some(&Cell::text("hilang")));
    assert_eq!(report.sources.len(), 1);
}

#[test]
fn sync_surfaces_upstream_errors_and_missing_config() {
    let store = Arc::new(MemoryObjectStore::new());
    let failing = App::new(Arc::clone(&store), Some(FailingUpstream), &config());
    let admin = failing.authorize_admin("admin-pass").unwrap();
    let sink = RecordingSink::default();
    assert_matches!(
        failing.sync_master(&admin, &sink),
        Err(NklError::UpstreamStatus { status: 401, .. })
    );

    let unconfigured: App<MemoryObjectStore, FailingUpstream> =
        App::new(Arc::clone(&store), None, &config());
    let admin = unconfigured.authorize_admin("admin-pass").unwrap();
    assert_matches!(
        unconfigured.sync_master(&admin, &sink),
        Err(NklError::ConfigInvalid(_))
    );
    assert_eq!(store.write_count(), 0);
}
