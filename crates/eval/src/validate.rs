//! Validator.
//!
//! Walks nodes in declaration order and each node's rules in declared
//! order; every failing rule adds one error, so a node may report several.
//! Array subform rows are validated one by one with their index in the
//! reported path. Validation reads a private working copy: computed
//! `value`s are recomputed from the given data, never taken from or
//! written to the instance's evaluated state.

use formeval_core::{DataPath, NodeId, ParsedSchema, RuleDef, RuleKind, RuleValue};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::dates::Clock;
use crate::engine;
use crate::evaluated::RuleState;
use crate::logic::Evaluator;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub path: String,
    pub rule_type: String,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub has_error: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        ValidationResult {
            has_error: !errors.is_empty(),
            errors,
        }
    }
}

/// Evaluate one rule against the field's current input.
pub(crate) fn check_rule(rule: &RuleDef, input: &Value, ev: &Evaluator<'_>) -> RuleState {
    let mut state = RuleState {
        name: rule.name.clone(),
        threshold: Value::Absent,
        active: true,
        passed: true,
        error: None,
    };
    if let Some(cond) = &rule.condition {
        match ev.eval(cond) {
            Ok(v) => state.active = v.is_truthy(),
            Err(e) => {
                state.passed = false;
                state.error = Some(e.message);
                return state;
            }
        }
        if !state.active {
            return state;
        }
    }
    state.threshold = match &rule.value {
        RuleValue::Literal(v) => Value::from_json(v),
        RuleValue::Computed(expr) => match ev.eval(expr) {
            Ok(v) => v,
            Err(e) => {
                state.passed = false;
                state.error = Some(e.message);
                return state;
            }
        },
    };
    match outcome(rule, &state.threshold, input) {
        Ok(passed) => state.passed = passed,
        Err(message) => {
            state.passed = false;
            state.error = Some(message);
        }
    }
    state
}

fn outcome(rule: &RuleDef, threshold: &Value, input: &Value) -> Result<bool, String> {
    if rule.kind == RuleKind::Required {
        return Ok(!threshold.is_truthy() || !input.is_empty_input());
    }
    // Only `required` complains about an empty field.
    if input.is_empty_input() {
        return Ok(true);
    }
    match rule.kind {
        RuleKind::Required => Ok(true),
        RuleKind::MinLength | RuleKind::MaxLength => {
            let (Some(limit), Some(len)) = (threshold.to_number(), input.length()) else {
                return Ok(true);
            };
            let len = Decimal::from(len);
            Ok(if rule.kind == RuleKind::MinLength {
                len >= limit
            } else {
                len <= limit
            })
        }
        RuleKind::MinValue | RuleKind::MaxValue => {
            let Some(limit) = threshold.to_number() else {
                return Ok(true);
            };
            let Some(n) = input.to_number() else {
                return Ok(false);
            };
            Ok(if rule.kind == RuleKind::MinValue {
                n >= limit
            } else {
                n <= limit
            })
        }
        RuleKind::Pattern => {
            let text = input.to_text();
            match &rule.pattern {
                Some(re) => Ok(re.is_match(&text)),
                None if threshold.is_nullish() => Ok(true),
                None => regex::Regex::new(&threshold.to_text())
                    .map(|re| re.is_match(&text))
                    .map_err(|e| format!("invalid pattern: {}", e)),
            }
        }
        RuleKind::Evaluation => Ok(threshold.is_truthy()),
    }
}

/// Substitute `{path}`, `{rule}`, `{value}`, `{input}` and any
/// `{some.data.path}` token; unknown tokens are left as written.
pub(crate) fn render_message(
    template: &str,
    path: &str,
    rule: &str,
    threshold: &Value,
    input: &Value,
    root: &serde_json::Value,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let token = after[..close].trim();
        let replacement = match token {
            "path" => Some(path.to_string()),
            "rule" => Some(rule.to_string()),
            "value" => Some(threshold.to_text()),
            "input" => Some(input.to_text()),
            "" => None,
            other => DataPath::parse(other)
                .lookup(root)
                .map(|v| Value::from_json(v).to_text()),
        };
        match replacement {
            Some(r) => out.push_str(&r),
            None => out.push_str(&rest[open..open + close + 2]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Maps schema node paths to the paths reported for them: rows of array
/// subforms get their index inserted after the subform path.
#[derive(Debug, Clone, Default)]
struct PathDisplay {
    /// (subform path, displayed prefix), innermost last
    rows: Vec<(DataPath, DataPath)>,
}

impl PathDisplay {
    fn show(&self, path: &DataPath) -> DataPath {
        for (sub, shown) in self.rows.iter().rev() {
            if let Some(rest) = path.strip_prefix(sub) {
                return shown.join(&rest);
            }
        }
        path.clone()
    }

    fn with_row(&self, sub: &DataPath, index: usize) -> PathDisplay {
        let mut next = self.clone();
        let shown = self.show(sub).child(&format!("{}", index));
        next.rows.push((sub.clone(), shown));
        next
    }
}

pub(crate) struct Validator<'a> {
    pub schema: &'a ParsedSchema,
    pub clock: &'a Clock,
    /// Only nodes under one of these paths are checked; empty checks all.
    pub filter: &'a [DataPath],
    /// Restrict to the subtree of this node.
    pub within: Option<NodeId>,
}

impl<'a> Validator<'a> {
    /// Validate every node of `scope` against `root`, recursing into the
    /// rows of nested array subforms.
    pub fn run(&self, scope: Option<NodeId>, root: serde_json::Value) -> Vec<ValidationError> {
        let mut out = Vec::new();
        self.scope(scope, root, &PathDisplay::default(), &mut out);
        out
    }

    fn scope(
        &self,
        scope: Option<NodeId>,
        mut root: serde_json::Value,
        display: &PathDisplay,
        out: &mut Vec<ValidationError>,
    ) {
        let writers: Vec<_> = self
            .schema
            .graph
            .order_in(scope)
            .into_iter()
            .filter(|u| self.schema.unit(*u).writes.is_some())
            .collect();
        for uid in writers {
            let resolved = engine::compute_unit(self.schema, uid, &root, self.clock);
            engine::apply_write(self.schema.unit(uid), &resolved, &mut root);
        }

        for node in &self.schema.nodes {
            if node.scope != scope || !self.in_bounds(node.id) {
                continue;
            }
            let shown = display.show(&node.path);
            let checked = self.selected(&node.path, &shown);
            if checked && !node.rules.is_empty() {
                self.node_rules(node.id, &shown, &root, out);
            }
            let reaches_rows = checked || self.filter.iter().any(|f| f.starts_with(&shown));
            if node.is_array_subform() && reaches_rows {
                let rows = match node.path.lookup(&root) {
                    Some(serde_json::Value::Array(rows)) => rows.clone(),
                    _ => Vec::new(),
                };
                for (i, row) in rows.into_iter().enumerate() {
                    let mut row_root = root.clone();
                    node.path.assign(&mut row_root, row);
                    self.scope(Some(node.id), row_root, &display.with_row(&node.path, i), out);
                }
            }
        }
    }

    fn in_bounds(&self, id: NodeId) -> bool {
        match self.within {
            Some(w) => self.schema.is_descendant_or_self(id, w),
            None => true,
        }
    }

    fn selected(&self, path: &DataPath, shown: &DataPath) -> bool {
        self.filter.is_empty()
            || self
                .filter
                .iter()
                .any(|f| path.starts_with(f) || shown.starts_with(f))
    }

    fn node_rules(
        &self,
        id: NodeId,
        shown: &DataPath,
        root: &serde_json::Value,
        out: &mut Vec<ValidationError>,
    ) {
        let node = self.schema.node(id);
        let ev = Evaluator::new(root, self.clock);
        let input = ev.lookup(&node.path);
        let shown_str = shown.to_string();
        for rule in &node.rules {
            let state = check_rule(rule, &input, &ev);
            if state.passed {
                continue;
            }
            if let Some(err) = &state.error {
                log::warn!("rule {}.{} failed to evaluate: {}", shown_str, rule.name, err);
            }
            let message = render_message(
                &rule.message,
                &shown_str,
                &rule.name,
                &state.threshold,
                &input,
                root,
            );
            let pattern = match rule.kind {
                RuleKind::Pattern => Some(match &rule.pattern {
                    Some(re) => re.as_str().to_string(),
                    None => state.threshold.to_text(),
                }),
                _ => None,
            };
            out.push(ValidationError {
                path: shown_str.clone(),
                rule_type: rule.name.clone(),
                message,
                code: rule
                    .code
                    .clone()
                    .unwrap_or_else(|| format!("{}.{}", shown_str, rule.name)),
                field_value: pattern.as_ref().map(|_| input.to_json()),
                pattern,
            });
        }
    }
}
