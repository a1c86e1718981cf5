//! Evaluator instances.
//!
//! A [`SchemaEvaluator`] pairs one shared, immutable [`ParsedSchema`] with
//! state it owns exclusively: the current data and context, the evaluated
//! view, the per-unit evaluation cache and the layout cache. Operations
//! take `&mut self`; callers sharing one instance across threads go
//! through [`crate::SharedEvaluator`].

use std::collections::BTreeSet;
use std::sync::Arc;

use formeval_core::{
    content_key_of, DataPath, NodeId, ParsedSchema, PathRoot, UnitId, LAYOUT_KEY, PARAMS_ROOT,
};
use serde_json::{Map, Value};

use crate::cache::{CacheStats, EvalCache};
use crate::config::EngineConfig;
use crate::dates::Clock;
use crate::engine::{self, Pass};
use crate::error::EvalError;
use crate::evaluated::EvaluatedSchema;
use crate::layout::{LayoutCache, LayoutOwner, LayoutResolver};
use crate::project::Projector;
use crate::schema_cache::ParsedSchemaCache;
use crate::validate::{ValidationResult, Validator};

/// Where a new instance gets its schema from.
#[derive(Debug, Clone, Copy)]
pub enum SchemaSource<'a> {
    /// Parse (or reuse) `schema`, published under `key` or, when none is
    /// given, under its content key. An entry under `key` parsed from
    /// different content is replaced; instances already holding it keep
    /// their copy.
    Document {
        schema: &'a Value,
        key: Option<&'a str>,
    },
    /// Must already be in the cache.
    Cached(&'a str),
}

#[derive(Debug)]
pub struct SchemaEvaluator {
    pub(crate) schema: Arc<ParsedSchema>,
    pub(crate) schema_cache: ParsedSchemaCache,
    pub(crate) config: EngineConfig,
    pub(crate) data: Value,
    pub(crate) context: Value,
    pub(crate) state: EvaluatedSchema,
    pub(crate) cache: EvalCache,
    pub(crate) layout_cache: LayoutCache,
}

/// `None` and `null` become an empty object; anything else must be one.
pub(crate) fn object_arg(what: &str, value: Option<Value>) -> Result<Value, EvalError> {
    match value {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(v @ Value::Object(_)) => Ok(v),
        Some(other) => Err(EvalError::InvalidInput {
            message: format!("{} must be a JSON object, got {}", what, json_kind(&other)),
        }),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl SchemaEvaluator {
    // ── Construction ─────────────────────────────────────────────────

    /// Parse `schema` through the process-wide cache.
    pub fn new(schema: &Value, context: Option<Value>, data: Option<Value>) -> Result<Self, EvalError> {
        Self::with_cache(
            ParsedSchemaCache::global().clone(),
            SchemaSource::Document { schema, key: None },
            context,
            data,
        )
    }

    /// Build from a schema already published under `key` in the
    /// process-wide cache. Fails with `CacheMiss` rather than parsing.
    pub fn from_cache(key: &str, context: Option<Value>, data: Option<Value>) -> Result<Self, EvalError> {
        Self::with_cache(
            ParsedSchemaCache::global().clone(),
            SchemaSource::Cached(key),
            context,
            data,
        )
    }

    /// Construct against an explicit schema store.
    pub fn with_cache(
        schema_cache: ParsedSchemaCache,
        source: SchemaSource<'_>,
        context: Option<Value>,
        data: Option<Value>,
    ) -> Result<Self, EvalError> {
        let schema = match source {
            SchemaSource::Document { schema, key } => {
                let key = key.map(str::to_string).unwrap_or_else(|| content_key_of(schema));
                schema_cache.get_or_parse(&key, schema)?
            }
            SchemaSource::Cached(key) => schema_cache
                .get(key)
                .ok_or_else(|| EvalError::CacheMiss { key: key.to_string() })?,
        };
        Self::build(schema, schema_cache, context, data)
    }

    /// Construct from an already parsed schema; no cache lookup.
    pub fn from_parsed(schema: Arc<ParsedSchema>, context: Option<Value>, data: Option<Value>) -> Result<Self, EvalError> {
        Self::build(schema, ParsedSchemaCache::global().clone(), context, data)
    }

    fn build(
        schema: Arc<ParsedSchema>,
        schema_cache: ParsedSchemaCache,
        context: Option<Value>,
        data: Option<Value>,
    ) -> Result<Self, EvalError> {
        let data = object_arg("data", data)?;
        let context = object_arg("context", context)?;
        let root = engine::build_root(&data, &context, &schema.params);
        let state = EvaluatedSchema::new(&schema, root);
        Ok(SchemaEvaluator {
            schema,
            schema_cache,
            config: EngineConfig::default(),
            data,
            context,
            state,
            cache: EvalCache::new(),
            layout_cache: LayoutCache::default(),
        })
    }

    /// Swap in a new schema and reset every piece of instance state.
    pub fn reload_schema(&mut self, schema: &Value, context: Option<Value>, data: Option<Value>) -> Result<(), EvalError> {
        let parsed = self.schema_cache.get_or_parse(&content_key_of(schema), schema)?;
        let data = object_arg("data", data)?;
        let context = object_arg("context", context)?;
        log::debug!("reload schema {}", parsed.content_key());
        self.state = EvaluatedSchema::new(&parsed, engine::build_root(&data, &context, &parsed.params));
        self.schema = parsed;
        self.data = data;
        self.context = context;
        self.cache.clear();
        self.layout_cache.clear();
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn parsed_schema(&self) -> &Arc<ParsedSchema> {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Empty the per-instance cache and its counters. The parsed schema
    /// and the evaluated view are kept.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.layout_cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn clock(&self) -> Clock {
        Clock::system(self.config.timezone_offset_minutes)
    }

    pub(crate) fn set_inputs(&mut self, data: Value, context: Option<Value>) -> Result<(), EvalError> {
        let data = object_arg("data", Some(data))?;
        if let Some(ctx) = context {
            self.context = object_arg("context", Some(ctx))?;
        }
        self.data = data;
        Ok(())
    }

    pub(crate) fn fresh_root(&self) -> Value {
        engine::build_root(&self.data, &self.context, &self.schema.params)
    }

    pub(crate) fn run_pass(&mut self, units: &[UnitId], root: &mut Value) {
        let clock = self.clock();
        Pass {
            schema: &self.schema,
            cache: &mut self.cache,
            resolved: &mut self.state.resolved,
            clock: &clock,
            cache_enabled: self.config.cache_enabled,
        }
        .run(units, root);
    }

    // ── Evaluation ───────────────────────────────────────────────────

    /// Evaluate every root-scope unit against `data` and return the
    /// evaluated schema. `context: None` keeps the current context.
    pub fn evaluate(&mut self, data: Value, context: Option<Value>) -> Result<Value, EvalError> {
        self.set_inputs(data, context)?;
        let mut root = self.fresh_root();
        let order = self.schema.graph.order_in(None);
        self.run_pass(&order, &mut root);
        self.state.root_doc = root;
        self.state.bump();
        Ok(self.get_evaluated_schema(None))
    }

    /// Recompute only what depends on `changed` and return the updated
    /// nodes keyed by path. With `nested`, the schema-tree descendants of
    /// the changed and recomputed nodes are recomputed too.
    pub fn evaluate_dependents<S: AsRef<str>>(
        &mut self,
        changed: &[S],
        data: Value,
        context: Option<Value>,
        nested: bool,
    ) -> Result<Value, EvalError> {
        self.set_inputs(data, context)?;
        let changed: Vec<DataPath> = changed.iter().map(|p| DataPath::parse(p.as_ref())).collect();
        let mut root = self.fresh_root();
        engine::overlay(&self.schema, &self.state.resolved, None, &mut root);
        let units = self.plan(None, &changed, nested, None);
        log::debug!("dependents of {} paths: {} units", changed.len(), units.len());
        if !units.is_empty() {
            self.run_pass(&units, &mut root);
        }
        self.state.root_doc = root;
        self.state.bump();
        Ok(Projector::new(&self.schema, &self.state).partial(&units, None))
    }

    /// Units of `scope` to rerun after a change at `changed`, in
    /// evaluation order, optionally restricted to the subtree of `within`.
    pub(crate) fn plan(
        &self,
        scope: Option<NodeId>,
        changed: &[DataPath],
        nested: bool,
        within: Option<NodeId>,
    ) -> Vec<UnitId> {
        let graph = &self.schema.graph;
        let mut units = graph.affected_units_in(changed, scope);
        if nested {
            let mut roots: BTreeSet<NodeId> = changed
                .iter()
                .filter_map(|p| self.schema.node_by_path(p))
                .filter(|n| n.scope == scope)
                .map(|n| n.id)
                .collect();
            roots.extend(units.iter().map(|u| self.schema.unit(*u).node));
            let mut seeds: BTreeSet<UnitId> = units.iter().copied().collect();
            for id in roots {
                for d in self.schema.descendants(id) {
                    seeds.extend(self.schema.units_of(d).iter().copied());
                }
            }
            units = graph.close(seeds, scope);
        }
        if let Some(w) = within {
            units.retain(|u| self.schema.is_descendant_or_self(self.schema.unit(*u).node, w));
        }
        units
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Check every rule against `data`. Pure: the evaluated view and the
    /// caches are not touched.
    pub fn validate(&self, data: Value, context: Option<Value>) -> Result<ValidationResult, EvalError> {
        self.validate_paths(data, context, &[] as &[&str])
    }

    /// Like [`validate`](Self::validate), checking only nodes under one of
    /// `paths`; an empty filter checks everything.
    pub fn validate_paths<S: AsRef<str>>(
        &self,
        data: Value,
        context: Option<Value>,
        paths: &[S],
    ) -> Result<ValidationResult, EvalError> {
        let data = object_arg("data", Some(data))?;
        let context = match context {
            Some(c) => object_arg("context", Some(c))?,
            None => self.context.clone(),
        };
        let filter: Vec<DataPath> = paths.iter().map(|p| DataPath::parse(p.as_ref())).collect();
        let clock = self.clock();
        let root = engine::build_root(&data, &context, &self.schema.params);
        let errors = Validator {
            schema: &self.schema,
            clock: &clock,
            filter: &filter,
            within: None,
        }
        .run(None, root);
        Ok(ValidationResult::from_errors(errors))
    }

    // ── Projection ───────────────────────────────────────────────────

    /// The evaluated schema document. `skip_layout: None` follows
    /// `EngineConfig::resolve_layout`.
    pub fn get_evaluated_schema(&mut self, skip_layout: Option<bool>) -> Value {
        let skip = skip_layout.unwrap_or(!self.config.resolve_layout);
        let projector = Projector::new(&self.schema, &self.state);
        if skip {
            projector.document(None)
        } else {
            projector.document(Some(&mut self.layout_cache))
        }
    }

    /// Current value of every node that defines one, nested like the data.
    pub fn get_schema_value(&self) -> Value {
        Projector::new(&self.schema, &self.state).schema_value(None, None)
    }

    pub fn get_schema_value_flat(&self) -> Value {
        Projector::new(&self.schema, &self.state).schema_value_flat(None, None)
    }

    /// Evaluated value at `path`. A node path yields the node's `value`;
    /// a path into a node's entry (`name.visible`, `age.rules.min`) yields
    /// that key; `$params.x` reads the constants; anything else falls
    /// back to the current data.
    pub fn get_value_by_path(&mut self, path: &str, skip_layout: bool) -> Option<Value> {
        let p = DataPath::parse(path);
        if p.root_kind() == PathRoot::Params {
            return p
                .strip_prefix(&DataPath::parse(PARAMS_ROOT))
                .and_then(|rest| rest.lookup(&self.schema.params).cloned());
        }
        let Some(id) = self.schema.nearest_node(&p).map(|n| n.id) else {
            return p.lookup(&self.state.root_doc).cloned();
        };
        let node_path = self.schema.node(id).path.clone();
        let rest = p.strip_prefix(&node_path).unwrap_or_else(DataPath::root);
        let mut entry = Projector::new(&self.schema, &self.state).node_entry(id);
        if rest.is_root() {
            return entry.remove("value");
        }
        if !skip_layout && rest.first() == Some(LAYOUT_KEY) {
            if let Some(layout) = self.schema.node(id).layout.clone() {
                let resolved = self.layout_of(id, layout);
                entry.insert(LAYOUT_KEY.into(), resolved);
            }
        }
        rest.lookup(&Value::Object(entry))
            .cloned()
            .or_else(|| p.lookup(&self.state.root_doc).cloned())
    }

    fn layout_of(&mut self, id: NodeId, layout: Value) -> Value {
        let generation = self.state.generation;
        let projector = Projector::new(&self.schema, &self.state);
        let schema: &ParsedSchema = &self.schema;
        let base = schema.node(id).path.clone();
        self.layout_cache.get_or_resolve(LayoutOwner::Node(id), generation, || {
            let summary = |n: NodeId| projector.node_entry(n);
            LayoutResolver {
                schema,
                summary: &summary,
            }
            .resolve(&layout, &base)
        })
    }

    // ── Subform lookup ───────────────────────────────────────────────

    pub fn has_subform(&self, path: &str) -> bool {
        self.subform_id(path).is_ok()
    }

    pub fn get_subform_paths(&self) -> Vec<String> {
        self.schema.subform_paths()
    }

    pub(crate) fn subform_id(&self, path: &str) -> Result<NodeId, EvalError> {
        self.schema
            .node_by_path(&DataPath::parse(path))
            .filter(|n| n.subform.is_some())
            .map(|n| n.id)
            .ok_or_else(|| EvalError::NotFound { path: path.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(schema: Value) -> SchemaEvaluator {
        SchemaEvaluator::with_cache(
            ParsedSchemaCache::new(),
            SchemaSource::Document { schema: &schema, key: None },
            None,
            None,
        )
        .unwrap()
    }

    fn totals() -> Value {
        json!({
            "price": {"type": "number"},
            "qty": {"type": "number"},
            "total": {"type": "number", "value": {"$evaluation": {"*": [{"var": "price"}, {"var": "qty"}]}}},
            "note": {"type": "string"}
        })
    }

    #[test]
    fn data_must_be_an_object() {
        let mut ev = instance(totals());
        let err = ev.evaluate(json!([1, 2]), None).unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[test]
    fn cached_source_misses_without_entry() {
        let err = SchemaEvaluator::with_cache(ParsedSchemaCache::new(), SchemaSource::Cached("nope"), None, None)
            .unwrap_err();
        assert_eq!(err, EvalError::CacheMiss { key: "nope".into() });
    }

    #[test]
    fn dependents_of_unreferenced_path_is_noop() {
        let mut ev = instance(totals());
        ev.evaluate(json!({"price": 2, "qty": 3}), None).unwrap();
        let before = ev.cache_stats();
        let out = ev
            .evaluate_dependents(&["note"], json!({"price": 2, "qty": 3, "note": "x"}), None, false)
            .unwrap();
        assert_eq!(out, json!({}));
        assert_eq!(ev.cache_stats(), before);
    }

    #[test]
    fn value_by_path_reads_entry_keys() {
        let mut ev = instance(totals());
        ev.evaluate(json!({"price": 2, "qty": 3}), None).unwrap();
        assert_eq!(ev.get_value_by_path("total", true), Some(json!(6)));
        assert_eq!(ev.get_value_by_path("total.visible", true), Some(json!(true)));
        assert_eq!(ev.get_value_by_path("missing.path", true), None);
    }

    #[test]
    fn reload_resets_state() {
        let mut ev = instance(totals());
        ev.evaluate(json!({"price": 2, "qty": 3}), None).unwrap();
        ev.reload_schema(&json!({"a": {"type": "string"}}), None, Some(json!({"a": "x"})))
            .unwrap();
        assert_eq!(ev.cache_len(), 0);
        assert_eq!(ev.get_schema_value(), json!({"a": "x"}));
    }

    #[test]
    fn nested_recomputes_descendants() {
        let mut ev = instance(json!({
            "kind": {"type": "string"},
            "box": {
                "visible": {"$evaluation": {"==": [{"var": "kind"}, "box"]}},
                "properties": {
                    "stamp": {"value": {"$evaluation": {"now": []}}}
                }
            }
        }));
        ev.evaluate(json!({"kind": "box"}), None).unwrap();
        let plain = ev
            .evaluate_dependents(&["kind"], json!({"kind": "bag"}), None, false)
            .unwrap();
        assert!(plain.get("box.stamp").is_none());
        let nested = ev
            .evaluate_dependents(&["kind"], json!({"kind": "box"}), None, true)
            .unwrap();
        assert!(nested.get("box").is_some());
        assert!(nested.get("box.stamp").is_some());
    }
}
