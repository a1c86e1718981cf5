//! Incremental re-evaluation through `evaluate_dependents`.

use formeval_eval::{DataPath, ParsedSchemaCache, SchemaEvaluator, SchemaSource};
use serde_json::{json, Value};

// ──────────────────────────────────────────────
// Test fixtures
// ──────────────────────────────────────────────

fn instance(schema: &Value) -> SchemaEvaluator {
    SchemaEvaluator::with_cache(
        ParsedSchemaCache::new(),
        SchemaSource::Document { schema, key: None },
        None,
        None,
    )
    .unwrap()
}

/// `a` feeds `b`, `b` feeds `c`; `d` depends on nothing the tests change.
fn chain_schema() -> Value {
    json!({
        "a": {"type": "number"},
        "b": {"type": "number", "value": {"$evaluation": {"+": [{"var": "a"}, 1]}}},
        "c": {
            "type": "number",
            "value": {"$evaluation": {"*": [{"var": "b"}, 10]}},
            "visible": {"$evaluation": {">": [{"var": "b"}, 2]}}
        },
        "d": {"type": "string", "value": {"$evaluation": {"upper": [{"var": "label"}]}}},
        "label": {"type": "string"},
        "notes": {"type": "string"}
    })
}

fn contact_schema() -> Value {
    json!({
        "name": {"type": "string", "rules": {"required": {"value": true, "message": "Name is required"}}},
        "email": {
            "type": "string",
            "rules": {
                "required": {"value": true, "message": "Email is required"},
                "pattern": {"value": "^[^@]+@[^@]+$", "message": "Invalid email"}
            }
        }
    })
}

fn keys(v: &Value) -> Vec<String> {
    v.as_object().unwrap().keys().cloned().collect()
}

// ──────────────────────────────────────────────
// Affected sets
// ──────────────────────────────────────────────

#[test]
fn dependents_update_exactly_the_affected_nodes() {
    let schema = chain_schema();
    let mut ev = instance(&schema);
    ev.evaluate(json!({"a": 1, "label": "x"}), None).unwrap();
    let out = ev
        .evaluate_dependents(&["a"], json!({"a": 5, "label": "x"}), None, false)
        .unwrap();
    let expected = ev.parsed_schema().affected(&DataPath::parse("a"));
    assert_eq!(keys(&out), expected);
    assert_eq!(keys(&out), vec!["b", "c"]);
    assert_eq!(out["b"]["value"], json!(6));
    assert_eq!(out["c"]["value"], json!(60));
    assert_eq!(out["c"]["visible"], json!(true));
}

#[test]
fn dependents_match_full_evaluation() {
    let schema = chain_schema();
    let data = json!({"a": 7, "label": "q"});

    let mut incremental = instance(&schema);
    incremental.evaluate(json!({"a": 1, "label": "q"}), None).unwrap();
    incremental
        .evaluate_dependents(&["a"], data.clone(), None, false)
        .unwrap();

    let mut full = instance(&schema);
    full.evaluate(data, None).unwrap();

    assert_eq!(incremental.get_schema_value(), full.get_schema_value());
    assert_eq!(
        incremental.get_evaluated_schema(Some(true)),
        full.get_evaluated_schema(Some(true))
    );
}

#[test]
fn untouched_units_keep_their_cache_entries() {
    let schema = chain_schema();
    let mut ev = instance(&schema);
    ev.evaluate(json!({"a": 1, "label": "x"}), None).unwrap();
    let before = ev.cache_stats();
    ev.evaluate_dependents(&["a"], json!({"a": 2, "label": "x"}), None, false)
        .unwrap();
    let after = ev.cache_stats();
    // b.value, c.value and c.visible ran; d did not.
    assert_eq!(after.misses - before.misses, 3);
    assert_eq!(after.entries, before.entries);
}

#[test]
fn unreferenced_path_is_a_noop() {
    let schema = chain_schema();
    let mut ev = instance(&schema);
    ev.evaluate(json!({"a": 1}), None).unwrap();
    let before = ev.cache_stats();
    let out = ev
        .evaluate_dependents(&["notes"], json!({"a": 1, "notes": "hello"}), None, false)
        .unwrap();
    assert_eq!(out, json!({}));
    assert_eq!(ev.cache_stats(), before);
}

#[test]
fn own_rules_only_for_email_change() {
    let schema = contact_schema();
    let mut ev = instance(&schema);
    ev.evaluate(json!({"name": "John", "email": "old@example.com"}), None)
        .unwrap();
    let out = ev
        .evaluate_dependents(
            &["email"],
            json!({"name": "John", "email": "new@example.com"}),
            None,
            false,
        )
        .unwrap();
    assert_eq!(keys(&out), vec!["email"]);
    assert_eq!(out["email"]["value"], json!("new@example.com"));
    assert_eq!(out["email"]["rules"]["pattern"]["passed"], json!(true));
}

#[test]
fn parent_change_reaches_child_readers() {
    let schema = json!({
        "address": {"properties": {"city": {"type": "string"}}},
        "city_upper": {"value": {"$evaluation": {"upper": [{"var": "address.city"}]}}}
    });
    let mut ev = instance(&schema);
    ev.evaluate(json!({"address": {"city": "oslo"}}), None).unwrap();
    let out = ev
        .evaluate_dependents(&["address"], json!({"address": {"city": "rome"}}), None, false)
        .unwrap();
    assert_eq!(out["city_upper"]["value"], json!("ROME"));
}

// ──────────────────────────────────────────────
// Nested
// ──────────────────────────────────────────────

#[test]
fn nested_recomputes_schema_descendants() {
    let schema = json!({
        "mode": {"type": "string"},
        "panel": {
            "visible": {"$evaluation": {"==": [{"var": "mode"}, "advanced"]}},
            "properties": {
                "level": {"type": "number", "value": {"$evaluation": {"+": [{"var": "panel.base"}, 1]}}},
                "base": {"type": "number"}
            }
        }
    });
    let mut ev = instance(&schema);
    ev.evaluate(json!({"mode": "basic", "panel": {"base": 1}}), None)
        .unwrap();
    let flat = ev
        .evaluate_dependents(&["mode"], json!({"mode": "advanced", "panel": {"base": 1}}), None, false)
        .unwrap();
    assert_eq!(keys(&flat), vec!["panel"]);
    let nested = ev
        .evaluate_dependents(&["mode"], json!({"mode": "advanced", "panel": {"base": 1}}), None, true)
        .unwrap();
    assert_eq!(keys(&nested), vec!["panel", "panel.level"]);
    assert_eq!(nested["panel.level"]["value"], json!(2));
}
