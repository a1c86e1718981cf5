//! Per-instance evaluated state.

use std::collections::HashMap;

use formeval_core::{NodeId, ParsedSchema};

use crate::value::Value;

/// Outcome of one rule of a node's rule set.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleState {
    pub name: String,
    /// Resolved threshold (`value` of the rule).
    pub threshold: Value,
    /// Condition result; rules without a condition are always active.
    pub active: bool,
    pub passed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Value),
    Rules(Vec<RuleState>),
}

/// Result of one evaluation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub outcome: Outcome,
    /// Expression failure, recorded instead of propagated.
    pub error: Option<String>,
}

impl Resolved {
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Value(v) => Some(v),
            Outcome::Rules(_) => None,
        }
    }
}

/// Live evaluated view owned by one instance.
///
/// `resolved` is indexed by unit id. `root_doc` is the working document of
/// the root scope after the last pass (data, `$context`, `$params` and
/// every computed `value` written at its node path); `scopes` holds the
/// same for the last row evaluated in each array subform.
#[derive(Debug, Clone)]
pub struct EvaluatedSchema {
    pub resolved: Vec<Option<Resolved>>,
    pub root_doc: serde_json::Value,
    pub scopes: HashMap<NodeId, serde_json::Value>,
    /// Bumped whenever anything above changes; keys the layout cache.
    pub generation: u64,
}

impl EvaluatedSchema {
    pub fn new(schema: &ParsedSchema, root_doc: serde_json::Value) -> Self {
        EvaluatedSchema {
            resolved: vec![None; schema.units.len()],
            root_doc,
            scopes: HashMap::new(),
            generation: 0,
        }
    }

    /// Working document a node's inputs are read from.
    pub fn home_doc(&self, schema: &ParsedSchema, node: NodeId) -> Option<&serde_json::Value> {
        match schema.node(node).scope {
            None => Some(&self.root_doc),
            Some(sid) => self.scopes.get(&sid),
        }
    }

    pub fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}
