//! Projection of evaluated state back into document shape.
//!
//! Node entries are built in two steps: first each node's own keys
//! (resolved computed properties, current `value`, rule states,
//! `$errors`), then layouts from those entries, then the tree. Array
//! subform item nodes are projected from the last row evaluated in their
//! scope, or from their declarations when no row has been evaluated yet.

use formeval_core::{DataPath, NodeId, ParsedSchema, UnitId, UnitKind, LAYOUT_KEY};
use formeval_core::table::{CLEAR_KEY, DATAS_KEY, SKIP_KEY, TABLE_KEY};
use serde_json::{Map, Value};

use crate::evaluated::{EvaluatedSchema, Outcome, RuleState};
use crate::layout::{LayoutCache, LayoutOwner, LayoutResolver};

pub(crate) struct Projector<'a> {
    pub schema: &'a ParsedSchema,
    pub state: &'a EvaluatedSchema,
    /// When false, hidden nodes and their subtrees are left out of
    /// assembled documents.
    pub include_hidden: bool,
}

/// `visible` evaluated to false, or `condition.hidden` is true.
pub(crate) fn is_hidden(entry: &Map<String, Value>) -> bool {
    entry.get("visible") == Some(&Value::Bool(false))
        || entry
            .get("condition")
            .and_then(|c| c.get("hidden"))
            .is_some_and(|h| h == &Value::Bool(true))
}

impl<'a> Projector<'a> {
    pub fn new(schema: &'a ParsedSchema, state: &'a EvaluatedSchema) -> Self {
        Projector {
            schema,
            state,
            include_hidden: true,
        }
    }

    pub fn without_hidden(mut self) -> Self {
        self.include_hidden = false;
        self
    }

    fn shown(&self, id: NodeId, entries: &[Map<String, Value>]) -> bool {
        self.include_hidden || !is_hidden(&entries[id])
    }

    /// Current data at the node's path in its scope's working document.
    pub fn input_value(&self, id: NodeId) -> Option<Value> {
        let doc = self.state.home_doc(self.schema, id)?;
        self.schema.node(id).path.lookup(doc).cloned()
    }

    /// A node's evaluated keys, children excluded.
    pub fn node_entry(&self, id: NodeId) -> Map<String, Value> {
        let node = self.schema.node(id);
        let mut entry = node.raw.clone();
        let mut errors = Map::new();
        for &uid in self.schema.units_of(id) {
            self.unit_into(uid, &mut entry, &mut errors);
        }
        if !node.writes_value() {
            match self.input_value(id) {
                Some(v) => {
                    entry.insert("value".into(), v);
                }
                None => {
                    entry.entry("value").or_insert(Value::Null);
                }
            }
        }
        entry.entry("visible").or_insert(Value::Bool(true));
        entry.entry("disabled").or_insert(Value::Bool(false));
        if !errors.is_empty() {
            entry.insert("$errors".into(), Value::Object(errors));
        }
        entry
    }

    fn unit_into(&self, uid: UnitId, entry: &mut Map<String, Value>, errors: &mut Map<String, Value>) {
        let unit = self.schema.unit(uid);
        let resolved = self.state.resolved.get(uid).and_then(Option::as_ref);
        match (&unit.kind, resolved) {
            (UnitKind::Computed(name), Some(r)) => {
                if let Some(e) = &r.error {
                    errors.insert(name.clone(), Value::String(e.clone()));
                }
                let v = match (&r.error, r.value()) {
                    (None, Some(v)) if !v.is_absent() => v.to_json(),
                    _ => Value::Null,
                };
                entry.insert(name.clone(), v);
            }
            (UnitKind::Computed(name), None) => {
                entry.insert(name.clone(), Value::Null);
            }
            (UnitKind::Rules, Some(r)) => {
                if let Outcome::Rules(states) = &r.outcome {
                    let rules = self.rules_entry(unit.node, states, errors);
                    entry.insert("rules".into(), Value::Object(rules));
                }
            }
            (UnitKind::Rules, None) => {}
            (UnitKind::Table, resolved) => {
                for key in [TABLE_KEY, DATAS_KEY, SKIP_KEY, CLEAR_KEY] {
                    entry.shift_remove(key);
                }
                let rows = match resolved {
                    Some(r) => {
                        if let Some(e) = &r.error {
                            errors.insert("value".into(), Value::String(e.clone()));
                        }
                        match (&r.error, r.value()) {
                            (None, Some(v)) if !v.is_absent() => v.to_json(),
                            _ => Value::Null,
                        }
                    }
                    None => Value::Null,
                };
                entry.insert("value".into(), rows);
            }
        }
    }

    fn rules_entry(
        &self,
        id: NodeId,
        states: &[RuleState],
        errors: &mut Map<String, Value>,
    ) -> Map<String, Value> {
        let declared = match self.schema.node(id).raw.get("rules") {
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        };
        let mut out = Map::new();
        for state in states {
            let mut rule = match declared.get(&state.name) {
                Some(Value::Object(m)) => m.clone(),
                Some(other) => {
                    let mut m = Map::new();
                    m.insert("value".into(), other.clone());
                    m
                }
                None => Map::new(),
            };
            let threshold = if state.active {
                state.threshold.to_json()
            } else {
                Value::Null
            };
            rule.insert("value".into(), threshold);
            rule.insert("active".into(), Value::Bool(state.active));
            rule.insert("passed".into(), Value::Bool(state.passed));
            if let Some(e) = &state.error {
                errors.insert(format!("rules.{}", state.name), Value::String(e.clone()));
            }
            out.insert(state.name.clone(), Value::Object(rule));
        }
        out
    }

    // ── Documents ────────────────────────────────────────────────────

    /// The whole evaluated schema. Array subform items are included with
    /// the state of their last evaluated row.
    pub fn document(&self, layouts: Option<&mut LayoutCache>) -> Value {
        let mut entries: Vec<Map<String, Value>> =
            (0..self.schema.nodes.len()).map(|id| self.node_entry(id)).collect();
        let mut root_layout = None;
        if let Some(cache) = layouts {
            self.resolve_layouts(&mut entries, None, cache);
            if let Some(layout) = &self.schema.root_layout {
                let resolved = cache.get_or_resolve(LayoutOwner::Root, self.state.generation, || {
                    self.resolver_for(&entries, |r| r.resolve(layout, &DataPath::root()))
                });
                root_layout = Some(resolved);
            }
        }

        let fields: Map<String, Value> = self
            .schema
            .roots
            .iter()
            .filter(|&&id| self.shown(id, &entries))
            .map(|&id| (self.schema.node(id).name.clone(), self.assemble(id, &entries)))
            .collect();

        let mut out = self.schema.root_raw.clone();
        if let Some(layout) = root_layout {
            out.insert(LAYOUT_KEY.into(), layout);
        }
        if self.schema.wrapped {
            out.insert("properties".into(), Value::Object(fields));
        } else {
            out.extend(fields);
        }
        Value::Object(out)
    }

    /// The evaluated schema of one subform: its child fields keyed by
    /// name, plus its resolved layout.
    pub fn subform_document(&self, sid: NodeId, layouts: Option<&mut LayoutCache>) -> Value {
        let node = self.schema.node(sid);
        let mut entries: Vec<Map<String, Value>> =
            (0..self.schema.nodes.len()).map(|id| self.node_entry(id)).collect();
        let mut out = Map::new();
        if let Some(cache) = layouts {
            self.resolve_layouts(&mut entries, Some(sid), cache);
            let (owner, layout) = if node.is_array_subform() {
                (LayoutOwner::Items(sid), node.items_layout.as_ref())
            } else {
                (LayoutOwner::Node(sid), node.layout.as_ref())
            };
            if let Some(layout) = layout {
                let resolved = cache.get_or_resolve(owner, self.state.generation, || {
                    self.resolver_for(&entries, |r| r.resolve(layout, &node.path))
                });
                out.insert(LAYOUT_KEY.into(), resolved);
            }
        }
        for &child in &node.children {
            if self.shown(child, &entries) {
                out.insert(self.schema.node(child).name.clone(), self.assemble(child, &entries));
            }
        }
        Value::Object(out)
    }

    /// Assembled entries of `ids`, each with its schema children.
    pub fn node_trees(&self, ids: &[NodeId], layouts: Option<&mut LayoutCache>) -> Vec<Value> {
        let mut entries: Vec<Map<String, Value>> =
            (0..self.schema.nodes.len()).map(|id| self.node_entry(id)).collect();
        if let Some(cache) = layouts {
            self.resolve_layouts(&mut entries, None, cache);
        }
        ids.iter().map(|&id| self.assemble(id, &entries)).collect()
    }

    fn resolver_for<R>(&self, entries: &[Map<String, Value>], f: impl FnOnce(&LayoutResolver<'_>) -> R) -> R {
        let summary = |id: NodeId| entries[id].clone();
        let resolver = LayoutResolver {
            schema: self.schema,
            summary: &summary,
        };
        f(&resolver)
    }

    /// Replace every node `$layout` (and `items.$layout`) under `within`
    /// with its resolved form. Resolved layouts are stored in the entry;
    /// item layouts are returned through the cache only.
    fn resolve_layouts(&self, entries: &mut [Map<String, Value>], within: Option<NodeId>, cache: &mut LayoutCache) {
        let range = match within {
            Some(w) => w..self.schema.node(w).subtree_end,
            None => 0..self.schema.nodes.len(),
        };
        let generation = self.state.generation;
        let mut resolved = Vec::new();
        for id in range {
            let node = self.schema.node(id);
            if let Some(layout) = &node.layout {
                let v = cache.get_or_resolve(LayoutOwner::Node(id), generation, || {
                    self.resolver_for(entries, |r| r.resolve(layout, &node.path))
                });
                resolved.push((id, v));
            }
            if let Some(layout) = &node.items_layout {
                cache.get_or_resolve(LayoutOwner::Items(id), generation, || {
                    self.resolver_for(entries, |r| r.resolve(layout, &node.path))
                });
            }
        }
        for (id, v) in resolved {
            entries[id].insert(LAYOUT_KEY.into(), v);
        }
    }

    fn assemble(&self, id: NodeId, entries: &[Map<String, Value>]) -> Value {
        let node = self.schema.node(id);
        let mut out = entries[id].clone();
        let children: Map<String, Value> = node
            .children
            .iter()
            .filter(|&&c| self.shown(c, entries))
            .map(|&c| (self.schema.node(c).name.clone(), self.assemble(c, entries)))
            .collect();
        if let Some(items) = &node.items_raw {
            let mut items = items.clone();
            if !children.is_empty() {
                items.insert("properties".into(), Value::Object(children));
            }
            out.insert("items".into(), Value::Object(items));
        } else if !children.is_empty() {
            out.insert("properties".into(), Value::Object(children));
        }
        Value::Object(out)
    }

    /// Entries for the nodes of the units that just ran, in run order.
    /// Keys are node paths, made relative to `relative_to` when given.
    pub fn partial(&self, units: &[UnitId], relative_to: Option<&DataPath>) -> Value {
        let mut out = Map::new();
        let mut nodes: Vec<NodeId> = Vec::new();
        let mut per_node: Vec<Vec<UnitId>> = Vec::new();
        for &uid in units {
            let node = self.schema.unit(uid).node;
            match nodes.iter().position(|n| *n == node) {
                Some(i) => per_node[i].push(uid),
                None => {
                    nodes.push(node);
                    per_node.push(vec![uid]);
                }
            }
        }
        for (node, uids) in nodes.into_iter().zip(per_node) {
            let mut entry = Map::new();
            let mut errors = Map::new();
            for uid in uids {
                self.unit_into(uid, &mut entry, &mut errors);
            }
            if !entry.contains_key("value") {
                entry.insert("value".into(), self.input_value(node).unwrap_or(Value::Null));
            }
            if !errors.is_empty() {
                entry.insert("$errors".into(), Value::Object(errors));
            }
            out.insert(self.key(node, relative_to), Value::Object(entry));
        }
        Value::Object(out)
    }

    fn key(&self, id: NodeId, relative_to: Option<&DataPath>) -> String {
        let path = &self.schema.node(id).path;
        relative_to
            .and_then(|base| path.strip_prefix(base))
            .unwrap_or_else(|| path.clone())
            .to_string()
    }

    // ── Values ───────────────────────────────────────────────────────

    /// `(path, value)` for every node of `scope` under `within` that
    /// defines a value: leaves, array subforms and nodes with a computed
    /// `value`. Absent values are skipped.
    fn values(&self, scope: Option<NodeId>, within: Option<NodeId>) -> Vec<(DataPath, Value)> {
        let mut out = Vec::new();
        for node in &self.schema.nodes {
            if node.scope != scope {
                continue;
            }
            if let Some(w) = within {
                if !self.schema.is_descendant_or_self(node.id, w) || node.id == w {
                    continue;
                }
            }
            let defines =
                node.writes_value() || node.children.is_empty() || node.is_array_subform();
            if !defines {
                continue;
            }
            if let Some(v) = self.input_value(node.id) {
                out.push((node.path.clone(), v));
            }
        }
        out
    }

    /// Nested mapping of node values, shaped like the data.
    pub fn schema_value(&self, scope: Option<NodeId>, within: Option<NodeId>) -> Value {
        let base = within.map(|w| self.schema.node(w).path.clone());
        let mut out = Value::Object(Map::new());
        for (path, v) in self.values(scope, within) {
            let path = base
                .as_ref()
                .and_then(|b| path.strip_prefix(b))
                .unwrap_or(path);
            path.assign(&mut out, v);
        }
        out
    }

    /// `{"a.b": v}` variant of [`schema_value`](Self::schema_value).
    pub fn schema_value_flat(&self, scope: Option<NodeId>, within: Option<NodeId>) -> Value {
        let base = within.map(|w| self.schema.node(w).path.clone());
        let mut out = Map::new();
        for (path, v) in self.values(scope, within) {
            let path = base
                .as_ref()
                .and_then(|b| path.strip_prefix(b))
                .unwrap_or(path);
            out.insert(path.to_string(), v);
        }
        Value::Object(out)
    }
}
