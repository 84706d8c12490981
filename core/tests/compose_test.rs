//! Registry composition tests: flat merge, nested spines, collisions.

use serde_json::json;
use unicorn_core::{Idl, Language, Registry, TokenStream};

fn idl(topic: &str, value: serde_json::Value) -> Idl {
    Idl::from_value(topic, &value).unwrap()
}

fn keyword_idl(topic: &str, flat: bool, keywords: &[&str]) -> Idl {
    let stmts: serde_json::Map<String, serde_json::Value> = keywords
        .iter()
        .map(|kw| (kw.to_string(), json!({"type": "empty"})))
        .collect();
    idl(
        topic,
        json!({"completion": {"type": "keyword", "stmts": stmts}, "flat": flat}),
    )
}

fn complete(language: &Language, buffer: &str) -> Vec<String> {
    let mut toks = TokenStream::new(buffer, buffer.len());
    let mut candidates = language.grammar.complete(&mut toks).unwrap_or_default();
    candidates.sort();
    candidates
}

#[test]
fn flat_idl_merges_keywords_into_the_root() {
    let mut registry = Registry::new();
    registry.upsert(keyword_idl("home", true, &["light", "fan"]));
    let language = Language::compose(&registry);

    assert_eq!(complete(&language, "li"), vec!["light"]);

    let route = language.routes.children["light"].route.as_ref().unwrap();
    assert_eq!(route.topic, "home");
    assert!(route.include_head);
}

#[test]
fn nested_idl_builds_a_keyword_spine() {
    let mut registry = Registry::new();
    registry.upsert(keyword_idl("room/kitchen", false, &["on", "off"]));
    let language = Language::compose(&registry);

    assert_eq!(complete(&language, "room "), vec!["kitchen"]);
    assert_eq!(complete(&language, "room kitchen "), vec!["off", "on"]);

    let room = &language.routes.children["room"];
    assert!(room.route.is_none());
    let kitchen = room.children["kitchen"].route.as_ref().unwrap();
    assert_eq!(kitchen.topic, "room/kitchen");
    assert!(!kitchen.include_head);
}

#[test]
fn routing_metadata_is_propagated() {
    let mut registry = Registry::new();
    registry.upsert(idl(
        "svc/run",
        json!({
            "completion": {"type": "keyword", "stmts": {"go": {"type": "empty"}}},
            "stdout": "svc/out",
            "stderr": "svc/err",
            "result": "svc/ret",
            "adHocChannels": true
        }),
    ));
    let language = Language::compose(&registry);
    let route = language.routes.children["svc"].children["run"]
        .route
        .as_ref()
        .unwrap();
    assert!(route.ad_hoc_channels);
    assert_eq!(route.stdout.as_deref(), Some("svc/out"));
    assert_eq!(route.stderr.as_deref(), Some("svc/err"));
    assert_eq!(route.result.as_deref(), Some("svc/ret"));
}

#[test]
fn keyword_collisions_resolve_to_the_greatest_topic() {
    let mut registry = Registry::new();
    registry.upsert(keyword_idl("alpha", true, &["x"]));
    registry.upsert(keyword_idl("beta", true, &["x"]));
    let language = Language::compose(&registry);
    let route = language.routes.children["x"].route.as_ref().unwrap();
    assert_eq!(route.topic, "beta");

    // Upserting the same topic again replaces, not duplicates.
    registry.upsert(keyword_idl("beta", true, &["x", "y"]));
    assert_eq!(registry.len(), 2);
}

#[test]
fn spine_blocked_by_non_keyword_node_skips_the_idl() {
    let mut registry = Registry::new();
    // "svc" attaches a string completion root at the spine position that
    // "svc/sub" would need to pass through as a keyword.
    registry.upsert(idl(
        "svc",
        json!({"completion": {"type": "string", "id": null, "options": null}}),
    ));
    registry.upsert(keyword_idl("svc/sub", false, &["go"]));
    let language = Language::compose(&registry);

    assert!(language.routes.children["svc"].route.is_some());
    assert!(!language.routes.children["svc"].children.contains_key("sub"));
}

#[test]
fn flat_idl_without_keyword_root_is_ignored() {
    let mut registry = Registry::new();
    registry.upsert(idl(
        "odd",
        json!({"completion": {"type": "string", "id": null, "options": null}, "flat": true}),
    ));
    let language = Language::compose(&registry);
    assert!(language.routes.children.is_empty());
    assert_eq!(complete(&language, ""), Vec::<String>::new());
}

#[test]
fn references_survive_composition() {
    let mut registry = Registry::new();
    registry.upsert(idl(
        "recur",
        json!({
            "completion": {
                "type": "keyword",
                "id": "top",
                "stmts": {
                    "again": {"type": "reference", "ref": "top"},
                    "stop": {"type": "empty"}
                }
            }
        }),
    ));
    let language = Language::compose(&registry);
    // The reference points back at the advertised root, so the grammar
    // accepts arbitrarily long "again" chains.
    assert_eq!(
        complete(&language, "recur again again "),
        vec!["again", "stop"]
    );
}
