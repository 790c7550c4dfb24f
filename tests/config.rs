use std::fs;

use assert_matches::assert_matches;
use tempfile::tempdir;

use pareto_nkl::config::ConfigLoader;
use pareto_nkl::error::NklError;

#[test]
fn resolve_reads_explicit_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pareto-nkl.json");
    fs::write(
        &path,
        r#"{
            "object_store": {
                "cloud_name": "demo",
                "api_key": "key",
                "api_secret": "secret",
                "root": "/pareto_nkl/"
            },
            "upstream": {"url": "https://inventory.example/api", "api_key": "abc"},
            "admin_secret": "admin",
            "credentials": {"lookup_attempts": 5}
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(config.object_store.root, "pareto_nkl");
    assert_eq!(config.object_store.max_list_pages, 20);
    assert_eq!(config.credentials.lookup_attempts, 5);
    assert_eq!(config.credentials.lookup_backoff_ms, 1000);
    assert_eq!(config.cache.credentials_ttl_secs, 60);
    let upstream = config.upstream.unwrap();
    assert_eq!(upstream.timeout_secs, 30);
}

#[test]
fn resolve_reports_unreadable_and_malformed_files() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(NklError::ConfigRead(_))
    );

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(broken.to_str()),
        Err(NklError::ConfigParse(_))
    );
}

#[test]
fn validation_rejects_empty_secrets_and_roots() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");

    fs::write(
        &path,
        r#"{
            "object_store": {"cloud_name": "demo", "api_key": "k", "api_secret": "s"},
            "admin_secret": ""
        }"#,
    )
    .unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(NklError::ConfigInvalid(_))
    );

    fs::write(
        &path,
        r#"{
            "object_store": {"cloud_name": "demo", "api_key": "k", "api_secret": "s", "root": "/"},
            "admin_secret": "admin"
        }"#,
    )
    .unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(NklError::ConfigInvalid(_))
    );
}
