//! Unit execution.
//!
//! A pass runs a list of units (already in evaluation order) against one
//! working document. Each unit is fingerprinted, looked up in the
//! instance cache, computed on a miss, and, if it is a computed `value`,
//! written back into the document so later units read the result.

use formeval_core::{EvalUnit, NodeId, ParsedSchema, UnitId, UnitKind, CONTEXT_ROOT, PARAMS_ROOT};

use crate::cache::{fingerprint, EvalCache};
use crate::dates::Clock;
use crate::evaluated::{Outcome, Resolved, RuleState};
use crate::logic::Evaluator;
use crate::table::build_rows;
use crate::validate::check_rule;
use crate::value::Value;

/// Data object with the context and constants mounted under their roots.
pub fn build_root(
    data: &serde_json::Value,
    context: &serde_json::Value,
    params: &serde_json::Value,
) -> serde_json::Value {
    let mut map = match data {
        serde_json::Value::Object(m) => m.clone(),
        _ => serde_json::Map::new(),
    };
    map.insert(CONTEXT_ROOT.to_string(), context.clone());
    map.insert(PARAMS_ROOT.to_string(), params.clone());
    serde_json::Value::Object(map)
}

/// Evaluate one unit. Expression failures are logged and recorded, never
/// propagated.
pub fn compute_unit(
    schema: &ParsedSchema,
    uid: UnitId,
    root: &serde_json::Value,
    clock: &Clock,
) -> Resolved {
    let unit = schema.unit(uid);
    let node = schema.node(unit.node);
    let ev = Evaluator::new(root, clock);
    match &unit.kind {
        UnitKind::Computed(name) => {
            let Some(prop) = node.computed(name) else {
                return Resolved {
                    outcome: Outcome::Value(Value::Absent),
                    error: None,
                };
            };
            match ev.eval(&prop.expr) {
                Ok(v) => Resolved {
                    outcome: Outcome::Value(v),
                    error: None,
                },
                Err(e) => {
                    log::warn!("{}: {}", unit.label, e);
                    Resolved {
                        outcome: Outcome::Value(Value::Absent),
                        error: Some(e.message),
                    }
                }
            }
        }
        UnitKind::Table => {
            let Some(table) = &node.table else {
                return Resolved {
                    outcome: Outcome::Value(Value::Absent),
                    error: None,
                };
            };
            match build_rows(schema, unit, table, root, clock) {
                Ok(rows) => Resolved {
                    outcome: Outcome::Value(rows),
                    error: None,
                },
                Err(e) => {
                    log::warn!("{}: {}", unit.label, e);
                    Resolved {
                        outcome: Outcome::Value(Value::Absent),
                        error: Some(e.message),
                    }
                }
            }
        }
        UnitKind::Rules => {
            let input = ev.lookup(&node.path);
            let states: Vec<RuleState> = node
                .rules
                .iter()
                .map(|rule| check_rule(rule, &input, &ev))
                .collect();
            for s in &states {
                if let Some(e) = &s.error {
                    log::warn!("{}.{}: {}", node.path, s.name, e);
                }
            }
            Resolved {
                outcome: Outcome::Rules(states),
                error: None,
            }
        }
    }
}

/// Write a computed `value` or table rows to its node path; an absent or failed result
/// removes whatever was there.
pub fn apply_write(unit: &EvalUnit, resolved: &Resolved, root: &mut serde_json::Value) {
    let Some(path) = &unit.writes else {
        return;
    };
    match resolved.value() {
        Some(v) if resolved.error.is_none() && !v.is_absent() => path.assign(root, v.to_json()),
        _ => {
            path.remove(root);
        }
    }
}

/// Re-apply the current results of every writer unit of `scope`, in
/// evaluation order, on top of freshly built inputs.
pub fn overlay(
    schema: &ParsedSchema,
    resolved: &[Option<Resolved>],
    scope: Option<NodeId>,
    root: &mut serde_json::Value,
) {
    for uid in schema.graph.order_in(scope) {
        let unit = schema.unit(uid);
        if unit.writes.is_none() {
            continue;
        }
        if let Some(r) = resolved.get(uid).and_then(Option::as_ref) {
            apply_write(unit, r, root);
        }
    }
}

pub(crate) struct Pass<'a> {
    pub schema: &'a ParsedSchema,
    pub cache: &'a mut EvalCache,
    pub resolved: &'a mut Vec<Option<Resolved>>,
    pub clock: &'a Clock,
    pub cache_enabled: bool,
}

impl Pass<'_> {
    pub fn run(&mut self, units: &[UnitId], root: &mut serde_json::Value) {
        let before = self.cache.stats();
        for &uid in units {
            self.run_unit(uid, root);
        }
        let after = self.cache.stats();
        log::debug!(
            "pass: {} units, {} hits, {} misses",
            units.len(),
            after.hits - before.hits,
            after.misses - before.misses
        );
    }

    fn run_unit(&mut self, uid: UnitId, root: &mut serde_json::Value) {
        let unit = self.schema.unit(uid);
        let fp = (self.cache_enabled && !unit.volatile).then(|| fingerprint(&unit.reads, root));
        let resolved = match self.cache.lookup(uid, fp.as_ref()) {
            Some(hit) => hit,
            None => {
                let computed = compute_unit(self.schema, uid, root, self.clock);
                if let Some(fp) = fp {
                    self.cache.store(uid, fp, computed.clone());
                }
                computed
            }
        };
        apply_write(unit, &resolved, root);
        self.resolved[uid] = Some(resolved);
    }
}
