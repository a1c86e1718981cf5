//! Parsing whole schema documents through the public API: structure,
//! dependency queries and the errors reported for malformed documents.

use formeval_core::{DataPath, ParsedSchema, SubformKind, UnitKind};
use serde_json::{json, Value};

// ──────────────────────────────────────────────
// Test fixtures
// ──────────────────────────────────────────────

fn parse(doc: Value) -> ParsedSchema {
    ParsedSchema::parse(&doc).unwrap()
}

fn parse_err(doc: Value) -> formeval_core::SchemaError {
    ParsedSchema::parse(&doc).unwrap_err()
}

fn invoice() -> Value {
    json!({
        "$params": {"tax": 0.1},
        "customer": {"properties": {"name": {"type": "string"}, "country": {"type": "string"}}},
        "subtotal": {"type": "number"},
        "tax": {"type": "number", "value": {"$evaluation": {"*": [{"var": "subtotal"}, {"var": "$params.tax"}]}}},
        "total": {"type": "number", "value": {"$evaluation": {"+": [{"var": "subtotal"}, {"var": "tax"}]}}},
        "notice": {
            "visible": {"$evaluation": {"==": [{"var": "customer.country"}, "NO"]}}
        },
        "items": {
            "type": "array",
            "items": {"properties": {
                "price": {"type": "number"},
                "line": {"value": {"$evaluation": {"*": [{"var": "items.price"}, 2]}}}
            }}
        }
    })
}

// ──────────────────────────────────────────────
// Structure
// ──────────────────────────────────────────────

#[test]
fn parses_from_text() {
    let text = serde_json::to_string(&invoice()).unwrap();
    let schema: ParsedSchema = text.parse().unwrap();
    assert_eq!(schema.roots.len(), 6);
    assert_eq!(schema.content_key().len(), 64);
}

#[test]
fn invalid_json_text_is_a_root_error() {
    let err = "{not json".parse::<ParsedSchema>().unwrap_err();
    assert_eq!(err.path, "");
    assert!(err.message.contains("invalid JSON"));
}

#[test]
fn node_lookup_accepts_every_spelling() {
    let schema = parse(invoice());
    for spelling in ["customer.name", "/customer/name", "#/customer/properties/name"] {
        let node = schema.node_by_path(&DataPath::parse(spelling)).unwrap();
        assert_eq!(node.path.to_string(), "customer.name");
    }
}

#[test]
fn array_items_form_a_subform_scope() {
    let schema = parse(invoice());
    let items = schema.node_by_path(&DataPath::parse("items")).unwrap();
    assert_eq!(items.subform, Some(SubformKind::Array));
    let line = schema.node_by_path(&DataPath::parse("items.line")).unwrap();
    assert_eq!(line.scope, Some(items.id));
    assert_eq!(schema.subform_paths(), vec!["items"]);
}

// ──────────────────────────────────────────────
// Dependency queries
// ──────────────────────────────────────────────

#[test]
fn affected_closes_over_chains() {
    let schema = parse(invoice());
    assert_eq!(schema.affected(&DataPath::parse("subtotal")), vec!["tax", "total"]);
    assert_eq!(schema.affected(&DataPath::parse("customer")), vec!["notice"]);
    assert!(schema.affected(&DataPath::parse("customer.name")).is_empty());
}

#[test]
fn params_are_never_dependency_sources() {
    let schema = parse(invoice());
    assert!(schema.affected(&DataPath::parse("$params.tax")).is_empty());
}

#[test]
fn dependencies_of_lists_reads() {
    let schema = parse(invoice());
    let deps: Vec<String> = schema
        .dependencies_of(&DataPath::parse("total"))
        .iter()
        .map(|p| p.to_string())
        .collect();
    assert_eq!(deps, vec!["subtotal", "tax"]);
}

#[test]
fn dynamic_lookup_feeding_a_total_is_acyclic() {
    let schema = parse(json!({
        "rates": {"properties": {"basic": {"type": "number"}, "plus": {"type": "number"}}},
        "plan": {"type": "string"},
        "rate": {"value": {"$evaluation": {"var": {"cat": ["rates.", {"var": "plan"}]}}}},
        "premium": {"value": {"$evaluation": {"*": [{"var": "rate"}, 12]}}}
    }));
    assert_eq!(schema.affected(&DataPath::parse("rates.plus")), vec!["rate", "premium"]);
    assert_eq!(schema.affected(&DataPath::parse("plan")), vec!["rate", "premium"]);
    assert!(schema.affected(&DataPath::parse("premium")).is_empty());
}

#[test]
fn dynamic_lookups_without_a_prefix_parse() {
    let schema = parse(json!({
        "first": {"value": {"$evaluation": {"var": {"cat": ["opt_", {"var": "a"}]}}}},
        "second": {"value": {"$evaluation": {"var": {"cat": ["opt_", {"var": "b"}]}}}},
        "total": {"value": {"$evaluation": {"+": [{"var": "first"}, {"var": "second"}]}}}
    }));
    assert_eq!(schema.affected(&DataPath::parse("a")), vec!["first", "second", "total"]);
}

#[test]
fn table_is_one_unit_writing_its_node() {
    let schema = parse(json!({
        "count": {"type": "number"},
        "grid": {"type": "array",
            "$datas": [{"name": "step", "data": 2}],
            "$table": [{"$repeat": [1, {"$evaluation": {"var": "count"}}, {
                "n": {"$evaluation": {"*": [{"var": "$iteration"}, {"var": "step"}]}},
                "prev": {"$evaluation": {"var": "grid.0.n"}}
            }]}]},
        "rows": {"value": {"$evaluation": {"length": [{"var": "grid"}]}}}
    }));
    let grid = schema.node_by_path(&DataPath::parse("grid")).unwrap();
    assert!(grid.table.is_some() && grid.writes_value());
    let unit = schema.unit(schema.units_of(grid.id)[0]);
    assert_eq!(unit.kind, UnitKind::Table);
    assert_eq!(unit.label, "grid.$table");
    assert_eq!(unit.reads, vec![DataPath::parse("count")]);
    assert_eq!(schema.affected(&DataPath::parse("count")), vec!["grid", "rows"]);
}

#[test]
fn table_with_computed_value_is_rejected() {
    let err = parse_err(json!({
        "t": {"type": "array", "$table": [], "value": {"$evaluation": {"var": "x"}}}
    }));
    assert_eq!(err.path, "t");
    assert!(err.message.contains("'$table'"));
}

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

#[test]
fn transitive_cycle_names_the_chain() {
    let err = parse_err(json!({
        "a": {"value": {"$evaluation": {"var": "c"}}},
        "b": {"value": {"$evaluation": {"var": "a"}}},
        "c": {"value": {"$evaluation": {"var": "b"}}}
    }));
    assert!(err.message.contains("cyclic dependency"));
    assert!(err.message.contains("→"));
}

#[test]
fn unknown_rule_kind_names_the_node() {
    let err = parse_err(json!({
        "profile": {"properties": {
            "age": {"rules": {"between": {"value": 3, "message": "x"}}}
        }}
    }));
    assert!(err.path.starts_with("profile.age"));
    assert!(err.message.contains("between"));
}

#[test]
fn several_operator_keys_is_a_parse_error() {
    let err = parse_err(json!({
        "x": {"value": {"$evaluation": {"+": [1, 2], "-": [3, 1]}}}
    }));
    assert!(err.path.starts_with("x"));
}

#[test]
fn dotted_field_name_is_rejected() {
    let err = parse_err(json!({"a.b": {"type": "string"}}));
    assert!(err.message.contains("a.b"));
}
