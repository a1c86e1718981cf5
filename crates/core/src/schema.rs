//! Schema parser: raw JSON document to an immutable, indexed node arena.
//!
//! Nodes are numbered depth-first in declaration order, so a node's
//! descendants occupy the contiguous id range `id + 1 .. subtree_end`.
//! Every computed property and every rule set becomes an [`EvalUnit`]
//! with its statically extracted reads; the units feed the
//! [`DependencyGraph`].

use crate::error::SchemaError;
use crate::expr::{Expr, ReadSet};
use crate::graph::DependencyGraph;
use crate::path::DataPath;
use crate::table::{TableDef, CLEAR_KEY, DATAS_KEY, SKIP_KEY, TABLE_KEY};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;

pub type NodeId = usize;
pub type UnitId = usize;

/// Key wrapping a computed expression: `{"$evaluation": expr}`.
pub const EVALUATION_KEY: &str = "$evaluation";
pub const LAYOUT_KEY: &str = "$layout";
pub const PARAMS_KEY: &str = "$params";
pub const SUBFORM_KEY: &str = "$subform";

/// Node keys with structural meaning; never treated as computed properties.
const STRUCTURAL_KEYS: &[&str] = &[
    "type",
    "properties",
    "items",
    "rules",
    LAYOUT_KEY,
    SUBFORM_KEY,
    TABLE_KEY,
    DATAS_KEY,
    SKIP_KEY,
    CLEAR_KEY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Date,
}

impl NodeType {
    pub fn from_name(name: &str) -> Option<NodeType> {
        match name {
            "string" => Some(NodeType::String),
            "number" => Some(NodeType::Number),
            "integer" => Some(NodeType::Integer),
            "boolean" => Some(NodeType::Boolean),
            "object" => Some(NodeType::Object),
            "array" => Some(NodeType::Array),
            "date" => Some(NodeType::Date),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeType::String => "string",
            NodeType::Number => "number",
            NodeType::Integer => "integer",
            NodeType::Boolean => "boolean",
            NodeType::Object => "object",
            NodeType::Array => "array",
            NodeType::Date => "date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubformKind {
    /// `type: "array"` with `items.properties`; evaluated one row at a time.
    Array,
    /// `type: "object"` with `"$subform": true`.
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Required,
    MinLength,
    MaxLength,
    MinValue,
    MaxValue,
    Pattern,
    Evaluation,
}

impl RuleKind {
    pub fn from_name(name: &str) -> Option<RuleKind> {
        match name {
            "required" => Some(RuleKind::Required),
            "minLength" => Some(RuleKind::MinLength),
            "maxLength" => Some(RuleKind::MaxLength),
            "minValue" => Some(RuleKind::MinValue),
            "maxValue" => Some(RuleKind::MaxValue),
            "pattern" => Some(RuleKind::Pattern),
            "evaluation" => Some(RuleKind::Evaluation),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RuleKind::Required => "required",
            RuleKind::MinLength => "minLength",
            RuleKind::MaxLength => "maxLength",
            RuleKind::MinValue => "minValue",
            RuleKind::MaxValue => "maxValue",
            RuleKind::Pattern => "pattern",
            RuleKind::Evaluation => "evaluation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleValue {
    Literal(Value),
    Computed(Expr),
}

#[derive(Debug, Clone)]
pub struct RuleDef {
    pub name: String,
    pub kind: RuleKind,
    pub value: RuleValue,
    pub message: String,
    pub code: Option<String>,
    pub condition: Option<Expr>,
    /// Pre-compiled when `value` is a literal pattern string.
    pub pattern: Option<regex::Regex>,
}

pub const DEFAULT_RULE_MESSAGE: &str = "Validation failed";

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedProperty {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub id: NodeId,
    pub path: DataPath,
    pub name: String,
    pub node_type: NodeType,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// The node object without `properties` / `items`.
    pub raw: Map<String, Value>,
    /// `items` without its `properties`, for array subforms.
    pub items_raw: Option<Map<String, Value>>,
    pub rules: Vec<RuleDef>,
    pub computed: Vec<ComputedProperty>,
    pub table: Option<TableDef>,
    pub layout: Option<Value>,
    pub items_layout: Option<Value>,
    pub subform: Option<SubformKind>,
    /// Nearest enclosing array subform; `None` for nodes evaluated by the root.
    pub scope: Option<NodeId>,
    /// One past the last descendant id.
    pub subtree_end: NodeId,
}

impl SchemaNode {
    pub fn is_array_subform(&self) -> bool {
        self.subform == Some(SubformKind::Array)
    }

    pub fn computed(&self, name: &str) -> Option<&ComputedProperty> {
        self.computed.iter().find(|c| c.name == name)
    }

    /// True if evaluation produces the node's `value` rather than reading
    /// it from the input.
    pub fn writes_value(&self) -> bool {
        self.table.is_some() || self.computed("value").is_some()
    }

    /// A `required` rule with literal `true` and no condition.
    pub fn always_required(&self) -> bool {
        self.rules.iter().any(|r| {
            r.kind == RuleKind::Required
                && r.condition.is_none()
                && matches!(r.value, RuleValue::Literal(Value::Bool(true)))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    Computed(String),
    Rules,
    /// The rows of a `$table` node, written as its `value`.
    Table,
}

/// One independently cached piece of evaluation work.
#[derive(Debug, Clone)]
pub struct EvalUnit {
    pub id: UnitId,
    pub node: NodeId,
    pub node_path: DataPath,
    pub kind: UnitKind,
    /// `node.prop`, `node.rules` for the rule set, or `node.$table`.
    pub label: String,
    pub reads: Vec<DataPath>,
    /// The subset of `reads` that only stands for a path computed at
    /// evaluation time.
    pub computed_reads: Vec<DataPath>,
    /// Data path written with the result; computed `value` and tables write.
    pub writes: Option<DataPath>,
    pub volatile: bool,
    pub scope: Option<NodeId>,
}

impl EvalUnit {
    /// True if a read spelled out in the expression overlaps `path`.
    pub fn reads_fixed(&self, path: &DataPath) -> bool {
        self.reads
            .iter()
            .any(|r| r.overlaps(path) && !self.computed_reads.contains(r))
    }
}

#[derive(Debug, Clone)]
pub struct ParsedSchema {
    pub raw: Value,
    pub nodes: Vec<SchemaNode>,
    pub index: HashMap<String, NodeId>,
    pub roots: Vec<NodeId>,
    pub params: Value,
    /// `$`-keys of the document root (and, for a wrapped root, its
    /// non-field keys), copied through projection.
    pub root_raw: Map<String, Value>,
    /// The document was `{"type": "object", "properties": {...}}`.
    pub wrapped: bool,
    pub root_layout: Option<Value>,
    pub units: Vec<EvalUnit>,
    pub node_units: Vec<Vec<UnitId>>,
    pub graph: DependencyGraph,
    pub subforms: Vec<NodeId>,
    content_key: String,
}

impl ParsedSchema {
    /// Parse a schema document. Stops at the first structural problem.
    pub fn parse(raw: &Value) -> Result<ParsedSchema, SchemaError> {
        let start = Instant::now();
        let Value::Object(doc) = raw else {
            return Err(SchemaError::root("schema must be a JSON object"));
        };

        let wrapped = is_wrapped_root(doc);
        let (fields, root_raw) = if wrapped {
            let mut root_raw = doc.clone();
            let fields = match root_raw.shift_remove("properties") {
                Some(Value::Object(f)) => f,
                _ => Map::new(),
            };
            (fields, root_raw)
        } else {
            let mut fields = Map::new();
            let mut root_raw = Map::new();
            for (k, v) in doc {
                if k.starts_with('$') {
                    root_raw.insert(k.clone(), v.clone());
                } else {
                    fields.insert(k.clone(), v.clone());
                }
            }
            (fields, root_raw)
        };

        let params = root_raw
            .get(PARAMS_KEY)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        if !params.is_object() {
            return Err(SchemaError::new(PARAMS_KEY, "'$params' must be an object"));
        }
        let root_layout = root_raw.get(LAYOUT_KEY).cloned();
        if let Some(layout) = &root_layout {
            check_layout(layout, &DataPath::root())?;
        }

        let mut builder = Builder::default();
        let mut roots = Vec::new();
        for (name, node) in &fields {
            roots.push(builder.node(name, node, &DataPath::root(), None, None)?);
        }

        let Builder {
            nodes,
            index,
            units,
            node_units,
            subforms,
        } = builder;

        let graph = DependencyGraph::build(&units)?;
        let content_key = content_key_of(raw);

        log::debug!(
            "parsed schema {}: {} nodes, {} units, {} subforms in {:?}",
            &content_key[..12],
            nodes.len(),
            units.len(),
            subforms.len(),
            start.elapsed()
        );

        Ok(ParsedSchema {
            raw: raw.clone(),
            nodes,
            index,
            roots,
            params,
            root_raw,
            wrapped,
            root_layout,
            units,
            node_units,
            graph,
            subforms,
            content_key,
        })
    }

    /// SHA-256 hex digest of the serialized document.
    pub fn content_key(&self) -> &str {
        &self.content_key
    }

    pub fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id]
    }

    pub fn node_by_path(&self, path: &DataPath) -> Option<&SchemaNode> {
        self.index.get(&path.to_string()).map(|id| &self.nodes[*id])
    }

    /// Deepest node whose path is a prefix of `path`.
    pub fn nearest_node(&self, path: &DataPath) -> Option<&SchemaNode> {
        let ancestors: Vec<DataPath> = path.ancestors().collect();
        ancestors.iter().rev().find_map(|p| self.node_by_path(p))
    }

    pub fn descendants(&self, id: NodeId) -> std::ops::Range<NodeId> {
        id + 1..self.nodes[id].subtree_end
    }

    pub fn is_descendant_or_self(&self, id: NodeId, ancestor: NodeId) -> bool {
        id >= ancestor && id < self.nodes[ancestor].subtree_end
    }

    pub fn units_of(&self, node: NodeId) -> &[UnitId] {
        &self.node_units[node]
    }

    pub fn unit(&self, id: UnitId) -> &EvalUnit {
        &self.units[id]
    }

    pub fn subform_paths(&self) -> Vec<String> {
        self.subforms
            .iter()
            .map(|id| self.nodes[*id].path.to_string())
            .collect()
    }

    /// Node paths recomputed when `path` changes, in evaluation order.
    pub fn affected(&self, path: &DataPath) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for id in self.graph.affected_units(std::slice::from_ref(path)) {
            let p = self.units[id].node_path.to_string();
            if !out.contains(&p) {
                out.push(p);
            }
        }
        out
    }

    /// Reverse query: every path read by the units of a node.
    pub fn dependencies_of(&self, node_path: &DataPath) -> Vec<DataPath> {
        let Some(node) = self.node_by_path(node_path) else {
            return Vec::new();
        };
        let mut out: Vec<DataPath> = self.node_units[node.id]
            .iter()
            .flat_map(|u| self.units[*u].reads.iter().cloned())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

impl FromStr for ParsedSchema {
    type Err = SchemaError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| SchemaError::root(format!("invalid JSON: {}", e)))?;
        ParsedSchema::parse(&raw)
    }
}

pub fn content_key_of(raw: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn is_wrapped_root(doc: &Map<String, Value>) -> bool {
    doc.get("type").and_then(Value::as_str) == Some("object")
        && doc.get("properties").is_some_and(Value::is_object)
}

// ── Builder ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Builder {
    nodes: Vec<SchemaNode>,
    index: HashMap<String, NodeId>,
    units: Vec<EvalUnit>,
    node_units: Vec<Vec<UnitId>>,
    subforms: Vec<NodeId>,
}

impl Builder {
    fn node(
        &mut self,
        name: &str,
        raw: &Value,
        parent_path: &DataPath,
        parent: Option<NodeId>,
        scope: Option<NodeId>,
    ) -> Result<NodeId, SchemaError> {
        let path = parent_path.child(name);
        let at = path.to_string();
        check_field_name(name, &at)?;
        let Value::Object(obj) = raw else {
            return Err(SchemaError::new(at, "node must be an object"));
        };

        let properties = match obj.get("properties") {
            None => None,
            Some(Value::Object(p)) => Some(p),
            Some(_) => return Err(SchemaError::new(at, "'properties' must be an object")),
        };

        let node_type = match obj.get("type") {
            None if properties.is_some() => NodeType::Object,
            None => NodeType::String,
            Some(Value::String(t)) => NodeType::from_name(t)
                .ok_or_else(|| SchemaError::new(&at, format!("unknown type '{}'", t)))?,
            Some(other) => {
                return Err(SchemaError::new(at, format!("'type' must be a string, got {}", other)))
            }
        };

        let mut items_raw = None;
        let mut item_properties = None;
        let mut items_layout = None;
        if let Some(items) = obj.get("items") {
            if node_type != NodeType::Array {
                return Err(SchemaError::new(at, "'items' is only allowed on array nodes"));
            }
            let Value::Object(items) = items else {
                return Err(SchemaError::new(at, "'items' must be an object"));
            };
            match items.get("properties") {
                None => {}
                Some(Value::Object(p)) => item_properties = Some(p),
                Some(_) => {
                    return Err(SchemaError::new(at, "'items.properties' must be an object"))
                }
            }
            items_layout = items.get(LAYOUT_KEY).cloned();
            if let Some(layout) = &items_layout {
                check_layout(layout, &path)?;
            }
            let mut rest = items.clone();
            rest.shift_remove("properties");
            items_raw = Some(rest);
        }
        if properties.is_some() && node_type == NodeType::Array {
            return Err(SchemaError::new(at, "array nodes declare fields under 'items.properties'"));
        }

        let subform = match (obj.get(SUBFORM_KEY), item_properties.is_some()) {
            (Some(Value::Bool(true)), _) if node_type != NodeType::Object => {
                return Err(SchemaError::new(at, "'$subform' is only allowed on object nodes"))
            }
            (Some(Value::Bool(true)), _) => Some(SubformKind::Object),
            (Some(Value::Bool(false)) | None, true) => Some(SubformKind::Array),
            (Some(Value::Bool(false)) | None, false) => None,
            (Some(_), _) => return Err(SchemaError::new(at, "'$subform' must be a boolean")),
        };

        let layout = obj.get(LAYOUT_KEY).cloned();
        if let Some(l) = &layout {
            check_layout(l, &path)?;
        }

        let rules = match obj.get("rules") {
            None => Vec::new(),
            Some(Value::Object(r)) => parse_rules(r, &at)?,
            Some(_) => return Err(SchemaError::new(at, "'rules' must be an object")),
        };

        let mut computed = Vec::new();
        for (key, value) in obj {
            if STRUCTURAL_KEYS.contains(&key.as_str()) {
                continue;
            }
            if let Some(expr) = evaluation_of(value, &format!("{}.{}", at, key))? {
                computed.push(ComputedProperty {
                    name: key.clone(),
                    expr,
                });
            }
        }

        let table = TableDef::parse(obj, &at)?;
        if table.is_some() {
            if computed.iter().any(|c| c.name == "value") {
                return Err(SchemaError::new(at, "'$table' and a computed 'value' cannot be combined"));
            }
            if item_properties.is_some() {
                return Err(SchemaError::new(at, "'$table' nodes cannot declare 'items.properties'"));
            }
        }

        let mut raw_rest = obj.clone();
        raw_rest.shift_remove("properties");
        raw_rest.shift_remove("items");

        let id = self.nodes.len();
        if self.index.insert(at.clone(), id).is_some() {
            return Err(SchemaError::new(at, "duplicate node path"));
        }
        self.nodes.push(SchemaNode {
            id,
            path: path.clone(),
            name: name.to_string(),
            node_type,
            parent,
            children: Vec::new(),
            raw: raw_rest,
            items_raw,
            rules,
            computed,
            table,
            layout,
            items_layout,
            subform,
            scope,
            subtree_end: id + 1,
        });
        self.node_units.push(Vec::new());
        if subform.is_some() {
            self.subforms.push(id);
        }
        self.add_units(id);

        let mut children = Vec::new();
        if let Some(props) = properties {
            for (child_name, child) in props {
                children.push(self.node(child_name, child, &path, Some(id), scope)?);
            }
        }
        if let Some(props) = item_properties {
            for (child_name, child) in props {
                children.push(self.node(child_name, child, &path, Some(id), Some(id))?);
            }
        }

        let end = self.nodes.len();
        let node = &mut self.nodes[id];
        node.children = children;
        node.subtree_end = end;
        Ok(id)
    }

    fn add_units(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        let mut new_units = Vec::new();
        for prop in &node.computed {
            let writes = (prop.name == "value").then(|| node.path.clone());
            new_units.push((
                UnitKind::Computed(prop.name.clone()),
                format!("{}.{}", node.path, prop.name),
                prop.expr.read_set(),
                writes,
                prop.expr.is_volatile(),
            ));
        }
        if let Some(table) = &node.table {
            new_units.push((
                UnitKind::Table,
                format!("{}.{}", node.path, TABLE_KEY),
                table.read_set(&node.path),
                Some(node.path.clone()),
                table.is_volatile(),
            ));
        }
        if !node.rules.is_empty() {
            let mut reads = ReadSet {
                fixed: vec![node.path.clone()],
                computed: Vec::new(),
            };
            let mut volatile = false;
            for rule in &node.rules {
                if let RuleValue::Computed(expr) = &rule.value {
                    reads.extend(expr.read_set());
                    volatile |= expr.is_volatile();
                }
                if let Some(cond) = &rule.condition {
                    reads.extend(cond.read_set());
                    volatile |= cond.is_volatile();
                }
            }
            new_units.push((
                UnitKind::Rules,
                format!("{}.rules", node.path),
                reads,
                None,
                volatile,
            ));
        }

        let node_path = node.path.clone();
        let scope = node.scope;
        for (kind, label, read_set, writes, volatile) in new_units {
            let (reads, computed_reads) = read_set.into_parts();
            let uid = self.units.len();
            self.units.push(EvalUnit {
                id: uid,
                node: id,
                node_path: node_path.clone(),
                kind,
                label,
                reads,
                computed_reads,
                writes,
                volatile,
                scope,
            });
            self.node_units[id].push(uid);
        }
    }
}

fn check_field_name(name: &str, at: &str) -> Result<(), SchemaError> {
    if name.is_empty() {
        return Err(SchemaError::new(at, "field name must not be empty"));
    }
    if name.starts_with('$') {
        return Err(SchemaError::new(at, format!("field name '{}' is reserved", name)));
    }
    if name.contains(['.', '[', ']']) {
        return Err(SchemaError::new(
            at,
            format!("field name '{}' must not contain '.', '[' or ']'", name),
        ));
    }
    Ok(())
}

/// `Some(expr)` if `value` is `{"$evaluation": expr}`.
pub(crate) fn evaluation_of(value: &Value, at: &str) -> Result<Option<Expr>, SchemaError> {
    let Value::Object(map) = value else {
        return Ok(None);
    };
    let Some(inner) = map.get(EVALUATION_KEY) else {
        return Ok(None);
    };
    if map.len() > 1 {
        return Err(SchemaError::new(
            at,
            "'$evaluation' must be the only key of its object",
        ));
    }
    compile_checked(inner, at).map(Some)
}

fn compile_checked(doc: &Value, at: &str) -> Result<Expr, SchemaError> {
    Expr::compile(doc).map_err(|e| SchemaError::new(at, format!("invalid expression: {}", e)))
}

fn parse_rules(rules: &Map<String, Value>, at: &str) -> Result<Vec<RuleDef>, SchemaError> {
    let mut out = Vec::with_capacity(rules.len());
    for (name, def) in rules {
        let rule_at = format!("{}.rules.{}", at, name);
        let (kind_name, value, message, code, condition) = match def {
            Value::Object(obj) if !obj.contains_key(EVALUATION_KEY) => {
                let kind_name = match obj.get("kind") {
                    None => name.clone(),
                    Some(Value::String(k)) => k.clone(),
                    Some(_) => return Err(SchemaError::new(rule_at, "'kind' must be a string")),
                };
                let message = match obj.get("message") {
                    None => DEFAULT_RULE_MESSAGE.to_string(),
                    Some(Value::String(m)) => m.clone(),
                    Some(_) => return Err(SchemaError::new(rule_at, "'message' must be a string")),
                };
                let code = match obj.get("code") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(c)) => Some(c.clone()),
                    Some(_) => return Err(SchemaError::new(rule_at, "'code' must be a string")),
                };
                let condition = match obj.get("condition") {
                    None | Some(Value::Null) => None,
                    Some(c) => match evaluation_of(c, &rule_at)? {
                        Some(expr) => Some(expr),
                        None => Some(compile_checked(c, &rule_at)?),
                    },
                };
                let value = obj.get("value").cloned().unwrap_or(Value::Bool(true));
                (kind_name, value, message, code, condition)
            }
            // scalar shorthand: "required": true
            other => (
                name.clone(),
                other.clone(),
                DEFAULT_RULE_MESSAGE.to_string(),
                None,
                None,
            ),
        };

        let kind = RuleKind::from_name(&kind_name).ok_or_else(|| {
            SchemaError::new(&rule_at, format!("unknown rule kind '{}'", kind_name))
        })?;

        let value = match evaluation_of(&value, &rule_at)? {
            Some(expr) => RuleValue::Computed(expr),
            None => RuleValue::Literal(value),
        };

        let pattern = match (&kind, &value) {
            (RuleKind::Pattern, RuleValue::Literal(Value::String(p))) => {
                Some(regex::Regex::new(p).map_err(|e| {
                    SchemaError::new(&rule_at, format!("invalid pattern: {}", e))
                })?)
            }
            (RuleKind::Pattern, RuleValue::Literal(other)) => {
                return Err(SchemaError::new(
                    rule_at,
                    format!("pattern must be a string, got {}", other),
                ))
            }
            _ => None,
        };

        out.push(RuleDef {
            name: name.clone(),
            kind,
            value,
            message,
            code,
            condition,
            pattern,
        });
    }
    Ok(out)
}

/// Layouts are objects with an optional `elements` array of objects.
fn check_layout(layout: &Value, at: &DataPath) -> Result<(), SchemaError> {
    let where_ = if at.is_root() {
        LAYOUT_KEY.to_string()
    } else {
        format!("{}.{}", at, LAYOUT_KEY)
    };
    let Value::Object(obj) = layout else {
        return Err(SchemaError::new(where_, "layout must be an object"));
    };
    match obj.get("elements") {
        None => Ok(()),
        Some(Value::Array(elements)) => {
            for el in elements {
                if !el.is_object() {
                    return Err(SchemaError::new(where_, "layout elements must be objects"));
                }
                if el.get("elements").is_some() {
                    check_layout(el, at)?;
                }
            }
            Ok(())
        }
        Some(_) => Err(SchemaError::new(where_, "'elements' must be an array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> Value {
        json!({
            "$params": {"minAge": 18},
            "name": {
                "type": "string",
                "rules": {
                    "required": {"value": true, "message": "Name is required"},
                    "minLength": {"value": 3, "message": "Min 3 characters"}
                }
            },
            "age": {"type": "integer"},
            "adult": {
                "type": "boolean",
                "value": {"$evaluation": {">=": [{"var": "age"}, {"var": "$params.minAge"}]}}
            },
            "address": {
                "type": "object",
                "properties": {
                    "city": {"type": "string"},
                    "zip": {"type": "string", "visible": {"$evaluation": {"var": "address.city"}}}
                }
            },
            "riders": {
                "type": "array",
                "items": {
                    "properties": {
                        "age": {"type": "integer"},
                        "premium": {"type": "number", "value": {"$evaluation": {"*": [{"var": "riders.age"}, 2]}}}
                    }
                }
            }
        })
    }

    // ── Tree and index ───────────────────────────────────────────────

    #[test]
    fn nodes_are_preorder_with_contiguous_subtrees() {
        let s = ParsedSchema::parse(&person()).unwrap();
        let paths: Vec<String> = s.nodes.iter().map(|n| n.path.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "name",
                "age",
                "adult",
                "address",
                "address.city",
                "address.zip",
                "riders",
                "riders.age",
                "riders.premium"
            ]
        );
        let address = s.node_by_path(&DataPath::parse("address")).unwrap();
        assert_eq!(s.descendants(address.id), 4..6);
        assert_eq!(s.params, json!({"minAge": 18}));
    }

    #[test]
    fn array_items_are_scoped_to_their_subform() {
        let s = ParsedSchema::parse(&person()).unwrap();
        let riders = s.node_by_path(&DataPath::parse("riders")).unwrap();
        assert!(riders.is_array_subform());
        assert_eq!(riders.scope, None);
        let premium = s.node_by_path(&DataPath::parse("riders.premium")).unwrap();
        assert_eq!(premium.scope, Some(riders.id));
        assert_eq!(s.subform_paths(), vec!["riders"]);
    }

    #[test]
    fn schema_pointer_lookup() {
        let s = ParsedSchema::parse(&person()).unwrap();
        let n = s.node_by_path(&DataPath::parse("#/address/properties/zip")).unwrap();
        assert_eq!(n.name, "zip");
        let nearest = s.nearest_node(&DataPath::parse("address.city.extra")).unwrap();
        assert_eq!(nearest.path.to_string(), "address.city");
    }

    #[test]
    fn wrapped_root_is_accepted() {
        let s = ParsedSchema::parse(&json!({
            "type": "object",
            "properties": {"a": {"type": "number"}}
        }))
        .unwrap();
        assert!(s.wrapped);
        assert_eq!(s.nodes.len(), 1);
        assert_eq!(s.root_raw.get("type"), Some(&json!("object")));
    }

    // ── Rules ────────────────────────────────────────────────────────

    #[test]
    fn rules_keep_declared_order() {
        let s = ParsedSchema::parse(&person()).unwrap();
        let name = s.node_by_path(&DataPath::parse("name")).unwrap();
        let kinds: Vec<RuleKind> = name.rules.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RuleKind::Required, RuleKind::MinLength]);
        assert_eq!(name.rules[1].message, "Min 3 characters");
    }

    #[test]
    fn unknown_rule_kind_is_rejected() {
        let err = ParsedSchema::parse(&json!({
            "a": {"rules": {"mustBeNice": {"value": true}}}
        }))
        .unwrap_err();
        assert_eq!(err.path, "a.rules.mustBeNice");
        assert!(err.message.contains("unknown rule kind"));
    }

    #[test]
    fn explicit_kind_allows_custom_rule_names() {
        let s = ParsedSchema::parse(&json!({
            "a": {"rules": {"notTooLong": {"kind": "maxLength", "value": 5}}}
        }))
        .unwrap();
        assert_eq!(s.nodes[0].rules[0].kind, RuleKind::MaxLength);
        assert_eq!(s.nodes[0].rules[0].name, "notTooLong");
    }

    #[test]
    fn invalid_literal_pattern_is_rejected() {
        let err = ParsedSchema::parse(&json!({
            "a": {"rules": {"pattern": {"value": "([a-z"}}}
        }))
        .unwrap_err();
        assert!(err.message.contains("invalid pattern"));
    }

    #[test]
    fn scalar_rule_shorthand() {
        let s = ParsedSchema::parse(&json!({"a": {"rules": {"required": true}}})).unwrap();
        assert_eq!(s.nodes[0].rules[0].value, RuleValue::Literal(json!(true)));
        assert_eq!(s.nodes[0].rules[0].message, DEFAULT_RULE_MESSAGE);
    }

    // ── Units and dependencies ───────────────────────────────────────

    #[test]
    fn computed_value_writes_its_own_path() {
        let s = ParsedSchema::parse(&person()).unwrap();
        let adult = s.node_by_path(&DataPath::parse("adult")).unwrap();
        let unit = s.unit(s.units_of(adult.id)[0]);
        assert_eq!(unit.label, "adult.value");
        assert_eq!(unit.writes, Some(DataPath::parse("adult")));
        assert_eq!(
            unit.reads,
            vec![DataPath::parse("$params.minAge"), DataPath::parse("age")]
        );
    }

    #[test]
    fn rules_unit_reads_node_path() {
        let s = ParsedSchema::parse(&person()).unwrap();
        let unit = s.unit(s.units_of(0)[0]);
        assert_eq!(unit.kind, UnitKind::Rules);
        assert_eq!(unit.reads, vec![DataPath::parse("name")]);
        assert_eq!(unit.writes, None);
    }

    #[test]
    fn affected_lists_node_paths() {
        let s = ParsedSchema::parse(&person()).unwrap();
        assert_eq!(s.affected(&DataPath::parse("age")), vec!["adult"]);
        assert_eq!(s.affected(&DataPath::parse("name")), vec!["name"]);
        assert!(s.affected(&DataPath::parse("nobody")).is_empty());
    }

    #[test]
    fn dependencies_of_is_reverse_query() {
        let s = ParsedSchema::parse(&person()).unwrap();
        assert_eq!(
            s.dependencies_of(&DataPath::parse("address.zip")),
            vec![DataPath::parse("address.city")]
        );
    }

    // ── Structural errors ────────────────────────────────────────────

    #[test]
    fn non_object_schema_is_rejected() {
        assert!(ParsedSchema::parse(&json!([1, 2])).is_err());
    }

    #[test]
    fn dotted_field_name_is_rejected() {
        let err = ParsedSchema::parse(&json!({"a.b": {"type": "string"}})).unwrap_err();
        assert!(err.message.contains("must not contain"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ParsedSchema::parse(&json!({"a": {"type": "currency"}})).unwrap_err();
        assert_eq!(err.path, "a");
    }

    #[test]
    fn evaluation_with_sibling_keys_is_rejected() {
        let err = ParsedSchema::parse(&json!({
            "a": {"visible": {"$evaluation": true, "extra": 1}}
        }))
        .unwrap_err();
        assert_eq!(err.path, "a.visible");
    }

    #[test]
    fn multi_key_operator_is_rejected_at_parse_time() {
        let err = ParsedSchema::parse(&json!({
            "a": {"visible": {"$evaluation": {"==": [1, 1], "!=": [1, 2]}}}
        }))
        .unwrap_err();
        assert!(err.message.contains("invalid expression"));
    }

    #[test]
    fn unknown_operator_is_not_a_parse_error() {
        assert!(ParsedSchema::parse(&json!({
            "a": {"visible": {"$evaluation": {"nope": [1]}}}
        }))
        .is_ok());
    }

    #[test]
    fn subform_flag_requires_object() {
        let err = ParsedSchema::parse(&json!({"a": {"type": "string", "$subform": true}})).unwrap_err();
        assert!(err.message.contains("$subform"));
    }

    #[test]
    fn content_key_is_stable_hex() {
        let a = ParsedSchema::parse(&person()).unwrap();
        let b: ParsedSchema = person().to_string().parse().unwrap();
        assert_eq!(a.content_key(), b.content_key());
        assert_eq!(a.content_key().len(), 64);
    }
}
