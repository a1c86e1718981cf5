//! Standalone logic runs and path-addressed schema reads.

use formeval_eval::{evaluate_logic, ParsedSchemaCache, ReturnFormat, SchemaEvaluator, SchemaSource};
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

fn order_schema() -> Value {
    json!({
        "$params": {"vat": 0.25},
        "customer": {"properties": {
            "name": {"type": "string", "title": "Name"},
            "vip": {"type": "boolean"}
        }},
        "net": {"type": "number", "rules": {"minValue": {"value": 1, "message": "too low"}}},
        "gross": {"value": {"$evaluation": {"*": [{"var": "net"}, {"+": [1, {"var": "$params.vat"}]}]}}},
        "discount": {
            "visible": {"$evaluation": {"var": "customer.vip"}},
            "value": {"$evaluation": {"*": [{"var": "gross"}, 0.1]}}
        },
        "internal": {"condition": {"hidden": true}, "type": "string"}
    })
}

fn evaluated() -> SchemaEvaluator {
    let schema = order_schema();
    let mut ev = instance(&schema);
    ev.evaluate(json!({"customer": {"name": "Ida", "vip": false}, "net": 100}), None)
        .unwrap();
    ev
}

// ──────────────────────────────────────────────
// Logic runs
// ──────────────────────────────────────────────

#[test]
fn run_logic_reads_computed_values() {
    let ev = evaluated();
    let logic = ev.compile_logic(&json!({"-": [{"var": "gross"}, {"var": "net"}]})).unwrap();
    assert_eq!(ev.run_logic(&logic, None, None).unwrap(), json!(25));
    let other = ev.run_logic(&logic, Some(json!({"gross": 10, "net": 4})), None).unwrap();
    assert_eq!(other, json!(6));
}

#[test]
fn run_logic_sees_params_and_given_context() {
    let ev = evaluated();
    let out = ev
        .compile_and_run_logic(
            &json!({"cat": [{"var": "$context.user"}, ":", {"var": "$params.vat"}]}),
            None,
            Some(json!({"user": "kim"})),
        )
        .unwrap();
    assert_eq!(out, json!("kim:0.25"));
}

#[test]
fn bad_logic_is_an_error_not_a_null() {
    let ev = evaluated();
    let err = ev.compile_and_run_logic(&json!({"nope": [1]}), None, None).unwrap_err();
    assert_eq!(err.kind(), "LogicError");
}

#[test]
fn free_evaluation_needs_no_schema() {
    let out = evaluate_logic(
        &json!({"if": [{"var": "$context.admin"}, "all", {"var": "scope"}]}),
        Some(json!({"scope": "own"})),
        Some(json!({"admin": false})),
    )
    .unwrap();
    assert_eq!(out, json!("own"));
}

// ──────────────────────────────────────────────
// Schema reads
// ──────────────────────────────────────────────

#[test]
fn by_paths_in_every_format() {
    let mut ev = evaluated();
    let paths = ["gross.value", "customer.name.title", "missing", "$params.vat"];

    let nested = ev.get_evaluated_schema_by_paths(&paths, Some(true), ReturnFormat::Nested);
    assert_eq!(nested["gross"]["value"], json!(125));
    assert_eq!(nested["customer"]["name"]["title"], json!("Name"));
    assert!(nested.get("missing").is_none());

    let flat = ev.get_evaluated_schema_by_paths(&paths, Some(true), ReturnFormat::Flat);
    assert_eq!(flat["gross.value"], json!(125));
    assert_eq!(flat["$params.vat"], json!(0.25));

    let list = ev.get_evaluated_schema_by_paths(&paths, Some(true), ReturnFormat::Array);
    assert_eq!(list, json!([125, "Name", null, 0.25]));
}

#[test]
fn by_paths_node_entry_keeps_children() {
    let mut ev = evaluated();
    let out = ev.get_evaluated_schema_by_paths(&["customer"], Some(true), ReturnFormat::Flat);
    assert_eq!(out["customer"]["properties"]["name"]["value"], json!("Ida"));
    assert_eq!(out["customer"]["properties"]["vip"]["value"], json!(false));
}

#[test]
fn declared_schema_by_path() {
    let ev = evaluated();
    assert_eq!(
        ev.get_schema_by_path("gross.value"),
        Some(json!({"$evaluation": {"*": [{"var": "net"}, {"+": [1, {"var": "$params.vat"}]}]}}))
    );
    assert_eq!(
        ev.get_schema_by_paths(&["net.rules.minValue.value", "nope"], ReturnFormat::Array),
        json!([1, null])
    );
}

#[test]
fn hidden_nodes_are_filtered_on_request() {
    let mut ev = evaluated();
    let all = ev.get_evaluated_schema_filtered(Some(true), true);
    assert!(all.get("discount").is_some());
    assert!(all.get("internal").is_some());

    let shown = ev.get_evaluated_schema_filtered(Some(true), false);
    assert!(shown.get("discount").is_none());
    assert!(shown.get("internal").is_none());
    assert_eq!(shown["gross"]["value"], json!(125));
}

#[test]
fn params_block_can_be_dropped() {
    let mut ev = evaluated();
    assert!(ev.get_evaluated_schema(Some(true)).get("$params").is_some());
    let doc = ev.get_evaluated_schema_without_params(Some(true));
    assert!(doc.get("$params").is_none());
    assert_eq!(doc["net"]["value"], json!(100));
}
