//! Cache persistence tests.

use serde_json::json;
use unicorn_core::{CacheError, Idl, Language, Registry, cache, decode_command};

#[test]
fn registry_round_trips_through_the_cache_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idl-cache.json");

    let mut registry = Registry::new();
    registry.upsert(
        Idl::from_value(
            "room/kitchen",
            &json!({
                "completion": {
                    "type": "keyword",
                    "stmts": {"on": {"type": "empty"}, "off": {"type": "empty"}}
                },
                "stdout": "room/kitchen/out",
                "result": "room/kitchen/ret",
                "adHocChannels": true
            }),
        )
        .unwrap(),
    );

    cache::save(&registry, &path).unwrap();
    let loaded = cache::load(&path).unwrap();
    assert_eq!(loaded.len(), 1);

    let idl = loaded.get("room/kitchen").unwrap();
    assert_eq!(idl.stdout.as_deref(), Some("room/kitchen/out"));
    assert_eq!(idl.result.as_deref(), Some("room/kitchen/ret"));
    assert!(idl.ad_hoc_channels);

    // A language composed from the reloaded registry still routes.
    let language = Language::compose(&loaded);
    let dispatch = decode_command("room kitchen on", &language.routes).unwrap();
    assert!(dispatch.topic.starts_with("room/kitchen/"));
}

#[test]
fn corrupt_cache_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idl-cache.json");
    std::fs::write(&path, "{oops").unwrap();
    assert!(matches!(cache::load(&path), Err(CacheError::Corrupt(_))));
}

#[test]
fn missing_cache_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert!(matches!(cache::load(&path), Err(CacheError::Io(_))));
}

#[test]
fn invalid_entries_are_dropped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idl-cache.json");
    let good = Idl::from_value(
        "ok",
        &json!({"completion": {"type": "keyword", "stmts": {"go": {"type": "empty"}}}}),
    )
    .unwrap();
    let blob = json!({
        "ok": ["ok", good.to_json()],
        "bad": ["bad", "{not json"]
    });
    std::fs::write(&path, blob.to_string()).unwrap();

    let loaded = cache::load(&path).unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded.get("ok").is_some());
    assert!(loaded.get("bad").is_none());
}
