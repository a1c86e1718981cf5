//! Computed tables evaluated through an instance.

use formeval_eval::{ParsedSchemaCache, SchemaEvaluator, SchemaSource};
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

/// A loan schedule: one opening row, then one row per year whose balance
/// grows by the `$params` rate applied to the previous row.
fn loan_schema() -> Value {
    json!({
        "$params": {"rate": 0.1},
        "principal": {"type": "number", "rules": {"required": {"value": true, "message": "principal"}}},
        "years": {"type": "number"},
        "schedule": {
            "type": "array",
            "$datas": [{"name": "rate", "data": {"$evaluation": {"var": "$params.rate"}}}],
            "$skip": {"$evaluation": {"<": [{"var": "years"}, 1]}},
            "$table": [
                {"year": 0, "balance": {"$evaluation": {"var": "principal"}}},
                {"$repeat": [1, {"$evaluation": {"var": "years"}}, {
                    "year": {"$evaluation": {"var": "$iteration"}},
                    "balance": {"$evaluation": {"*": [
                        {"var": {"cat": ["schedule.", {"-": [{"var": "$year"}, 1]}, ".balance"]}},
                        {"+": [1, {"var": "rate"}]}
                    ]}}
                }]}
            ]
        },
        "final": {"value": {"$evaluation": {"var": {"cat": ["schedule.", {"var": "years"}, ".balance"]}}}}
    })
}

// ──────────────────────────────────────────────
// Evaluation
// ──────────────────────────────────────────────

#[test]
fn schedule_rows_build_on_each_other() {
    let schema = loan_schema();
    let mut ev = instance(&schema);
    let doc = ev.evaluate(json!({"principal": 1000, "years": 2}), None).unwrap();
    assert_eq!(
        doc["schedule"]["value"],
        json!([
            {"year": 0, "balance": 1000},
            {"year": 1, "balance": 1100},
            {"year": 2, "balance": 1210}
        ])
    );
    assert_eq!(doc["final"]["value"], json!(1210));
    assert!(doc["schedule"].get("$table").is_none());
}

#[test]
fn skip_and_missing_required_input_leave_no_rows() {
    let schema = loan_schema();
    let mut ev = instance(&schema);
    let doc = ev.evaluate(json!({"principal": 1000, "years": 0}), None).unwrap();
    assert_eq!(doc["schedule"]["value"], json!([]));
    let doc = ev.evaluate(json!({"years": 3}), None).unwrap();
    assert_eq!(doc["schedule"]["value"], json!([]));
}

#[test]
fn dependents_rebuild_the_table_and_its_readers() {
    let schema = loan_schema();
    let mut ev = instance(&schema);
    ev.evaluate(json!({"principal": 1000, "years": 1}), None).unwrap();
    let out = ev
        .evaluate_dependents(&["principal"], json!({"principal": 2000, "years": 1}), None, false)
        .unwrap();
    assert_eq!(
        out["schedule"]["value"],
        json!([{"year": 0, "balance": 2000}, {"year": 1, "balance": 2200}])
    );
    assert_eq!(out["final"]["value"], json!(2200));
}

#[test]
fn unchanged_inputs_reuse_the_rows() {
    let schema = loan_schema();
    let mut ev = instance(&schema);
    let data = json!({"principal": 1000, "years": 2});
    ev.evaluate(data.clone(), None).unwrap();
    let misses = ev.cache_stats().misses;
    ev.evaluate(data, None).unwrap();
    assert_eq!(ev.cache_stats().misses, misses);
}

#[test]
fn failing_cell_is_reported_on_the_node() {
    let schema = json!({
        "t": {"type": "array", "$table": [{"a": {"$evaluation": {"nope": []}}}]}
    });
    let mut ev = instance(&schema);
    let doc = ev.evaluate(json!({}), None).unwrap();
    assert_eq!(doc["t"]["value"], Value::Null);
    assert!(doc["t"]["$errors"]["value"].as_str().unwrap().contains("column 'a'"));
}
