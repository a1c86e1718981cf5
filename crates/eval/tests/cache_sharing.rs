//! Parsed-schema cache shared between instances.

use std::sync::Arc;
use std::thread;

use formeval_eval::{EvalError, ParsedSchemaCache, SchemaEvaluator, SchemaSource};
use serde_json::{json, Value};

fn schema() -> Value {
    json!({
        "w": {"type": "number"},
        "h": {"type": "number"},
        "area": {"value": {"$evaluation": {"*": [{"var": "w"}, {"var": "h"}]}}}
    })
}

#[test]
fn instances_from_one_key_share_the_parse() {
    let store = ParsedSchemaCache::new();
    let doc = schema();
    let first = SchemaEvaluator::with_cache(
        store.clone(),
        SchemaSource::Document { schema: &doc, key: Some("rect") },
        None,
        None,
    )
    .unwrap();
    let mut a = SchemaEvaluator::with_cache(store.clone(), SchemaSource::Cached("rect"), None, None).unwrap();
    let mut b = SchemaEvaluator::with_cache(store.clone(), SchemaSource::Cached("rect"), None, None).unwrap();

    assert!(Arc::ptr_eq(first.parsed_schema(), a.parsed_schema()));
    assert!(Arc::ptr_eq(a.parsed_schema(), b.parsed_schema()));
    assert_eq!(store.stats().parses, 1);

    let data = json!({"w": 3, "h": 4});
    assert_eq!(a.evaluate(data.clone(), None).unwrap(), b.evaluate(data, None).unwrap());
}

#[test]
fn instances_keep_separate_state() {
    let store = ParsedSchemaCache::new();
    let doc = schema();
    let source = SchemaSource::Document { schema: &doc, key: None };
    let mut a = SchemaEvaluator::with_cache(store.clone(), source, None, None).unwrap();
    let mut b = SchemaEvaluator::with_cache(store.clone(), source, None, None).unwrap();
    a.evaluate(json!({"w": 2, "h": 2}), None).unwrap();
    b.evaluate(json!({"w": 5, "h": 5}), None).unwrap();
    assert_eq!(a.get_schema_value()["area"], json!(4));
    assert_eq!(b.get_schema_value()["area"], json!(25));
    assert_eq!(store.len(), 1);
}

#[test]
fn same_key_with_new_content_replaces_the_entry() {
    let store = ParsedSchemaCache::new();
    let doc = schema();
    let mut old = SchemaEvaluator::with_cache(
        store.clone(),
        SchemaSource::Document { schema: &doc, key: Some("rect") },
        None,
        None,
    )
    .unwrap();
    let wider = json!({
        "w": {"type": "number"},
        "h": {"type": "number"},
        "area": {"value": {"$evaluation": {"*": [{"var": "w"}, {"var": "h"}, 2]}}}
    });
    let mut new = SchemaEvaluator::with_cache(
        store.clone(),
        SchemaSource::Document { schema: &wider, key: Some("rect") },
        None,
        None,
    )
    .unwrap();
    assert!(!Arc::ptr_eq(old.parsed_schema(), new.parsed_schema()));
    assert_eq!(store.len(), 1);

    let data = json!({"w": 3, "h": 4});
    old.evaluate(data.clone(), None).unwrap();
    new.evaluate(data, None).unwrap();
    assert_eq!(old.get_schema_value()["area"], json!(12));
    assert_eq!(new.get_schema_value()["area"], json!(24));
}

#[test]
fn missing_key_is_a_cache_miss() {
    let store = ParsedSchemaCache::new();
    let err = SchemaEvaluator::with_cache(store, SchemaSource::Cached("absent"), None, None).unwrap_err();
    assert_eq!(err, EvalError::CacheMiss { key: "absent".into() });
}

#[test]
fn bad_schema_publishes_nothing() {
    let store = ParsedSchemaCache::new();
    let doc = json!({"x": {"type": "matrix"}});
    let err = SchemaEvaluator::with_cache(
        store.clone(),
        SchemaSource::Document { schema: &doc, key: Some("bad") },
        None,
        None,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "SchemaError");
    assert!(store.is_empty());
}

#[test]
fn concurrent_construction_parses_once() {
    let store = ParsedSchemaCache::new();
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let doc = schema();
                let mut ev = SchemaEvaluator::with_cache(
                    store,
                    SchemaSource::Document { schema: &doc, key: Some("shared") },
                    None,
                    None,
                )
                .unwrap();
                ev.evaluate(json!({"w": i, "h": 2}), None).unwrap();
                ev.get_schema_value()["area"].as_i64().unwrap()
            })
        })
        .collect();
    let areas: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(areas, vec![0, 2, 4, 6, 8, 10]);
    assert_eq!(store.len(), 1);
}

#[test]
fn from_parsed_skips_the_store() {
    let parsed = Arc::new(formeval_eval::ParsedSchema::parse(&schema()).unwrap());
    let mut ev = SchemaEvaluator::from_parsed(Arc::clone(&parsed), None, None).unwrap();
    ev.evaluate(json!({"w": 1, "h": 7}), None).unwrap();
    assert!(Arc::ptr_eq(ev.parsed_schema(), &parsed));
    assert_eq!(ev.get_schema_value()["area"], json!(7));
}
