//! Command decoder tests: longest routable prefix, payload slicing,
//! ad-hoc channels.

use serde_json::json;
use unicorn_core::{Idl, Language, Registry, decode_command};
use uuid::Uuid;

fn language(idls: &[(&str, serde_json::Value)]) -> Language {
    let mut registry = Registry::new();
    for (topic, value) in idls {
        registry.upsert(Idl::from_value(*topic, value).unwrap());
    }
    Language::compose(&registry)
}

fn on_off(flat: bool) -> serde_json::Value {
    json!({
        "completion": {
            "type": "keyword",
            "stmts": {"on": {"type": "empty"}, "off": {"type": "empty"}}
        },
        "flat": flat
    })
}

#[test]
fn nested_idl_dispatches_past_the_spine() {
    let language = language(&[("room/kitchen", on_off(false))]);
    let dispatch = decode_command("room kitchen on", &language.routes).unwrap();
    assert_eq!(dispatch.topic, "room/kitchen");
    assert_eq!(dispatch.payload, "on");
    assert_eq!(dispatch.suffix, "");
}

#[test]
fn flat_idl_includes_the_head_keyword() {
    let language = language(&[(
        "say",
        json!({
            "completion": {"type": "keyword", "stmts": {"hello": {"type": "empty"}}},
            "flat": true
        }),
    )]);
    let dispatch = decode_command("hello world", &language.routes).unwrap();
    assert_eq!(dispatch.topic, "say");
    assert_eq!(dispatch.payload, "hello world");
}

#[test]
fn unroutable_lines_decode_to_none() {
    let language = language(&[("room/kitchen", on_off(false))]);
    assert!(decode_command("pantry on", &language.routes).is_none());
    assert!(decode_command("", &language.routes).is_none());
    // "room" alone is a spine node without a route.
    assert!(decode_command("room", &language.routes).is_none());
}

#[test]
fn longest_routable_prefix_wins() {
    let language = language(&[
        ("a", on_off(false)),
        ("a/b", on_off(false)),
    ]);
    let dispatch = decode_command("a b rest", &language.routes).unwrap();
    assert_eq!(dispatch.topic, "a/b");
    assert_eq!(dispatch.payload, "rest");

    let dispatch = decode_command("a on", &language.routes).unwrap();
    assert_eq!(dispatch.topic, "a");
    assert_eq!(dispatch.payload, "on");
}

#[test]
fn payload_is_sliced_from_the_raw_line() {
    let language = language(&[("say", json!({
        "completion": {"type": "keyword", "stmts": {"hello": {"type": "empty"}}},
        "flat": true
    }))]);
    let dispatch = decode_command("  hello   'quoted arg'  ", &language.routes).unwrap();
    assert_eq!(dispatch.payload, "hello   'quoted arg'");
}

#[test]
fn ad_hoc_channels_get_a_fresh_suffix_per_dispatch() {
    let language = language(&[(
        "svc/run",
        json!({
            "completion": {"type": "keyword", "stmts": {"go": {"type": "empty"}}},
            "adHocChannels": true
        }),
    )]);

    let first = decode_command("svc run go", &language.routes).unwrap();
    let second = decode_command("svc run go", &language.routes).unwrap();

    assert!(first.topic.starts_with("svc/run/"));
    assert_eq!(first.topic, format!("svc/run{}", first.suffix));
    assert!(Uuid::parse_str(&first.suffix[1..]).is_ok());
    assert_ne!(first.suffix, second.suffix);
    assert_eq!(first.payload, "go");
}
