//! Layout resolution.
//!
//! A layout is a tree of elements. `$ref` elements point at schema nodes
//! and are replaced by a summary of the node's evaluated state; group
//! elements carry their own `elements` and inherit hiddenness from their
//! children. Resolution depends only on the evaluated state, so results
//! are cached per owner and generation.

use std::collections::HashMap;

use formeval_core::{DataPath, NodeId, ParsedSchema};
use serde_json::{Map, Value};

/// Keys of a node's evaluated entry copied into its layout element.
pub const SUMMARY_KEYS: &[&str] = &["type", "title", "label", "value", "visible", "disabled", "options"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutOwner {
    Root,
    /// `$layout` of a node.
    Node(NodeId),
    /// `items.$layout` of an array node.
    Items(NodeId),
}

#[derive(Debug, Clone, Default)]
pub struct LayoutCache {
    entries: HashMap<LayoutOwner, (u64, Value)>,
}

impl LayoutCache {
    /// Cached layout of `owner` if it was resolved at `generation`,
    /// otherwise resolve and remember it.
    pub fn get_or_resolve<F>(&mut self, owner: LayoutOwner, generation: u64, resolve: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        if let Some((g, v)) = self.entries.get(&owner) {
            if *g == generation {
                return v.clone();
            }
        }
        let resolved = resolve();
        self.entries.insert(owner, (generation, resolved.clone()));
        resolved
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub(crate) struct LayoutResolver<'a> {
    pub schema: &'a ParsedSchema,
    /// Evaluated entry of a node, without children.
    pub summary: &'a dyn Fn(NodeId) -> Map<String, Value>,
}

impl LayoutResolver<'_> {
    /// Resolve a whole layout. `$ref`s are looked up as absolute node
    /// paths first, then relative to `base` (the owning node).
    pub fn resolve(&self, layout: &Value, base: &DataPath) -> Value {
        self.element(layout, base, false).0
    }

    fn target(&self, raw: &str, base: &DataPath) -> Option<NodeId> {
        let path = DataPath::parse(raw);
        self.schema
            .node_by_path(&path)
            .or_else(|| self.schema.node_by_path(&base.join(&path)))
            .map(|n| n.id)
    }

    /// Returns the resolved element and whether it is hidden.
    fn element(&self, element: &Value, base: &DataPath, parent_hidden: bool) -> (Value, bool) {
        let Value::Object(obj) = element else {
            return (element.clone(), false);
        };

        if let Some(Value::String(raw)) = obj.get("$ref") {
            let mut out = Map::new();
            let hidden = match self.target(raw, base) {
                Some(id) => {
                    let node = self.schema.node(id);
                    let summary = (self.summary)(id);
                    for key in SUMMARY_KEYS {
                        if let Some(v) = summary.get(*key) {
                            out.insert(key.to_string(), v.clone());
                        }
                    }
                    for (k, v) in obj {
                        out.insert(k.clone(), v.clone());
                    }
                    out.insert("$fullpath".into(), Value::String(node.path.to_string()));
                    out.insert("$path".into(), Value::String(node.name.clone()));
                    out.get("visible") == Some(&Value::Bool(false))
                }
                None => {
                    out = obj.clone();
                    out.insert("$missing".into(), Value::Bool(true));
                    false
                }
            };
            out.insert("$parentHide".into(), Value::Bool(parent_hidden));
            return (Value::Object(out), hidden);
        }

        let mut out = obj.clone();
        let declared_hidden = obj.get("visible") == Some(&Value::Bool(false));
        let mut hidden = declared_hidden;
        if let Some(Value::Array(children)) = obj.get("elements") {
            let inherited = parent_hidden || declared_hidden;
            let mut resolved = Vec::with_capacity(children.len());
            let mut all_hidden = !children.is_empty();
            for child in children {
                let (c, h) = self.element(child, base, inherited);
                all_hidden &= h;
                resolved.push(c);
            }
            hidden |= all_hidden;
            out.insert("elements".into(), Value::Array(resolved));
        }
        out.insert("visible".into(), Value::Bool(!hidden));
        out.insert("$parentHide".into(), Value::Bool(parent_hidden));
        (Value::Object(out), hidden)
    }
}
