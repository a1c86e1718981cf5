//! Path-addressed reads of the evaluated and the declared schema.

use formeval_core::{DataPath, NodeId, ParsedSchema, PathRoot, PARAMS_KEY, PARAMS_ROOT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::instance::SchemaEvaluator;
use crate::project::Projector;

/// Shape of a multi-path read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnFormat {
    /// Results placed at their paths in one object: `{"a": {"b": ..}}`.
    #[default]
    Nested,
    /// Results keyed by the requested path: `{"a.b": ..}`.
    Flat,
    /// Results in request order; a missing path yields `null`.
    Array,
}

impl ReturnFormat {
    fn collect<S: AsRef<str>>(self, paths: &[S], found: Vec<Option<Value>>) -> Value {
        match self {
            ReturnFormat::Nested => {
                let mut out = Value::Object(Map::new());
                for (p, v) in paths.iter().zip(found) {
                    if let Some(v) = v {
                        DataPath::parse(p.as_ref()).assign(&mut out, v);
                    }
                }
                out
            }
            ReturnFormat::Flat => Value::Object(
                paths
                    .iter()
                    .zip(found)
                    .filter_map(|(p, v)| Some((p.as_ref().to_string(), v?)))
                    .collect(),
            ),
            ReturnFormat::Array => Value::Array(found.into_iter().map(|v| v.unwrap_or(Value::Null)).collect()),
        }
    }
}

/// Declaration of the node at `path`, as written in the schema document.
fn declaration<'a>(schema: &'a ParsedSchema, path: &DataPath) -> Option<&'a Value> {
    let mut fields = if schema.wrapped {
        schema.raw.get("properties")?
    } else {
        &schema.raw
    };
    let mut current = None;
    for seg in path.segments() {
        let node = fields.get(seg)?;
        current = Some(node);
        fields = node
            .get("properties")
            .or_else(|| node.get("items").and_then(|i| i.get("properties")))
            .unwrap_or(&Value::Null);
    }
    current
}

/// Split `path` into the nearest node and the remainder inside its entry.
fn split_at_node(schema: &ParsedSchema, path: &DataPath) -> Option<(NodeId, DataPath)> {
    let node = schema.nearest_node(path)?;
    let rest = path.strip_prefix(&node.path).unwrap_or_else(DataPath::root);
    Some((node.id, rest))
}

fn params_lookup(schema: &ParsedSchema, path: &DataPath) -> Option<Value> {
    path.strip_prefix(&DataPath::parse(PARAMS_ROOT))
        .and_then(|rest| rest.lookup(&schema.params).cloned())
}

impl SchemaEvaluator {
    /// Evaluated schema without hidden nodes (`visible: false` or
    /// `condition.hidden: true`) unless `include_hidden`.
    pub fn get_evaluated_schema_filtered(&mut self, skip_layout: Option<bool>, include_hidden: bool) -> Value {
        let skip = skip_layout.unwrap_or(!self.config.resolve_layout);
        let mut projector = Projector::new(&self.schema, &self.state);
        if !include_hidden {
            projector = projector.without_hidden();
        }
        if skip {
            projector.document(None)
        } else {
            projector.document(Some(&mut self.layout_cache))
        }
    }

    /// Evaluated schema with the `$params` block removed.
    pub fn get_evaluated_schema_without_params(&mut self, skip_layout: Option<bool>) -> Value {
        let mut doc = self.get_evaluated_schema(skip_layout);
        if let Value::Object(map) = &mut doc {
            map.shift_remove(PARAMS_KEY);
        }
        doc
    }

    /// Evaluated entries at `paths`. A node path yields the node's entry
    /// with its children; a longer path reads inside that entry
    /// (`total.value`, `age.rules.minValue`); `$params.x` reads constants.
    pub fn get_evaluated_schema_by_paths<S: AsRef<str>>(
        &mut self,
        paths: &[S],
        skip_layout: Option<bool>,
        format: ReturnFormat,
    ) -> Value {
        let skip = skip_layout.unwrap_or(!self.config.resolve_layout);
        let parsed: Vec<DataPath> = paths.iter().map(|p| DataPath::parse(p.as_ref())).collect();
        let targets: Vec<Option<(NodeId, DataPath)>> = parsed
            .iter()
            .map(|p| match p.root_kind() {
                PathRoot::Params => None,
                _ => split_at_node(&self.schema, p),
            })
            .collect();
        let ids: Vec<NodeId> = targets.iter().flatten().map(|(id, _)| *id).collect();
        let projector = Projector::new(&self.schema, &self.state);
        let trees = if skip {
            projector.node_trees(&ids, None)
        } else {
            projector.node_trees(&ids, Some(&mut self.layout_cache))
        };

        let mut trees = trees.into_iter();
        let found: Vec<Option<Value>> = parsed
            .iter()
            .zip(targets)
            .map(|(p, target)| match target {
                Some((_, rest)) => trees.next().and_then(|tree| rest.lookup(&tree).cloned()),
                None if p.root_kind() == PathRoot::Params => params_lookup(&self.schema, p),
                None => None,
            })
            .collect();
        log::debug!("evaluated schema by {} paths", paths.len());
        format.collect(paths, found)
    }

    /// The declared (unevaluated) schema at `path`.
    pub fn get_schema_by_path(&self, path: &str) -> Option<Value> {
        let p = DataPath::parse(path);
        if p.root_kind() == PathRoot::Params {
            return params_lookup(&self.schema, &p);
        }
        let (id, rest) = split_at_node(&self.schema, &p)?;
        let decl = declaration(&self.schema, &self.schema.node(id).path)?;
        rest.lookup(decl).cloned()
    }

    pub fn get_schema_by_paths<S: AsRef<str>>(&self, paths: &[S], format: ReturnFormat) -> Value {
        let found = paths.iter().map(|p| self.get_schema_by_path(p.as_ref())).collect();
        format.collect(paths, found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParsedSchemaCache, SchemaSource};
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

    #[test]
    fn declaration_walks_items_and_wrapped_roots() {
        let ev = instance(json!({
            "type": "object",
            "properties": {
                "lines": {"type": "array", "items": {"properties": {"qty": {"type": "number", "title": "Qty"}}}}
            }
        }));
        assert_eq!(ev.get_schema_by_path("lines.qty.title"), Some(json!("Qty")));
        assert_eq!(ev.get_schema_by_path("lines.nope"), None);
    }

    #[test]
    fn formats_place_results() {
        let paths = ["a.b", "c"];
        let found = vec![Some(json!(1)), None];
        assert_eq!(ReturnFormat::Nested.collect(&paths, found.clone()), json!({"a": {"b": 1}}));
        assert_eq!(ReturnFormat::Flat.collect(&paths, found.clone()), json!({"a.b": 1}));
        assert_eq!(ReturnFormat::Array.collect(&paths, found), json!([1, null]));
    }

    #[test]
    fn format_names_deserialize() {
        let f: ReturnFormat = serde_json::from_str("\"flat\"").unwrap();
        assert_eq!(f, ReturnFormat::Flat);
    }
}
