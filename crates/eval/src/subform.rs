//! Subform-scoped operations.
//!
//! Paths given to and returned from these calls are relative to the
//! subform. An array subform is evaluated one row at a time: the row is
//! mounted at the subform path of a copy of the root document and the
//! item-scope units run against it. An object subform reruns the root
//! units of its subtree only; nothing outside it is recomputed.

use formeval_core::{DataPath, NodeId, SubformKind, UnitId, CONTEXT_ROOT};
use serde_json::Value;

use crate::engine;
use crate::error::EvalError;
use crate::instance::{object_arg, SchemaEvaluator};
use crate::project::Projector;
use crate::validate::{ValidationResult, Validator};

impl SchemaEvaluator {
    fn subform_kind(&self, sid: NodeId) -> SubformKind {
        self.schema.node(sid).subform.unwrap_or(SubformKind::Object)
    }

    /// Working document of an array subform's scope before a row is
    /// mounted: the current root document under the latest context. Row
    /// values computed earlier come back through the overlay, never from
    /// an older copy of the root.
    fn scope_base(&self) -> Value {
        let mut base = self.state.root_doc.clone();
        if let Value::Object(map) = &mut base {
            map.insert(CONTEXT_ROOT.to_string(), self.context.clone());
        }
        base
    }

    fn update_context(&mut self, context: Option<Value>) -> Result<(), EvalError> {
        if let Some(ctx) = context {
            self.context = object_arg("context", Some(ctx))?;
        }
        Ok(())
    }

    /// Evaluate the subform at `path` against `data` (one row for an array
    /// subform, the object's data otherwise) and return its evaluated
    /// schema.
    pub fn evaluate_subform(&mut self, path: &str, data: Value, context: Option<Value>) -> Result<Value, EvalError> {
        let sid = self.subform_id(path)?;
        let data = object_arg("data", Some(data))?;
        self.update_context(context)?;
        let sub_path = self.schema.node(sid).path.clone();

        match self.subform_kind(sid) {
            SubformKind::Array => {
                let mut base = self.scope_base();
                sub_path.assign(&mut base, data);
                let order = self.schema.graph.order_in(Some(sid));
                self.run_pass(&order, &mut base);
                self.state.scopes.insert(sid, base);
            }
            SubformKind::Object => {
                sub_path.assign(&mut self.data, data);
                let mut root = self.fresh_root();
                engine::overlay(&self.schema, &self.state.resolved, None, &mut root);
                let units: Vec<UnitId> = self
                    .schema
                    .graph
                    .order_in(None)
                    .into_iter()
                    .filter(|u| self.schema.is_descendant_or_self(self.schema.unit(*u).node, sid))
                    .collect();
                self.run_pass(&units, &mut root);
                self.state.root_doc = root;
            }
        }
        self.state.bump();
        log::debug!("evaluated subform {}", sub_path);
        self.get_evaluated_schema_subform(path, None)
    }

    /// Validate `data` against the subform's rules. Reported paths are
    /// relative to the subform.
    pub fn validate_subform(&self, path: &str, data: Value, context: Option<Value>) -> Result<ValidationResult, EvalError> {
        let sid = self.subform_id(path)?;
        let data = object_arg("data", Some(data))?;
        let context = match context {
            Some(c) => object_arg("context", Some(c))?,
            None => self.context.clone(),
        };
        let sub_path = self.schema.node(sid).path.clone();
        let clock = self.clock();

        let (scope, within, root) = match self.subform_kind(sid) {
            SubformKind::Array => {
                let mut root = engine::build_root(&self.data, &context, &self.schema.params);
                sub_path.assign(&mut root, data);
                (Some(sid), None, root)
            }
            SubformKind::Object => {
                let mut merged = self.data.clone();
                sub_path.assign(&mut merged, data);
                let root = engine::build_root(&merged, &context, &self.schema.params);
                (None, Some(sid), root)
            }
        };
        let mut errors = Validator {
            schema: &self.schema,
            clock: &clock,
            filter: &[],
            within,
        }
        .run(scope, root);
        for e in &mut errors {
            if let Some(rel) = DataPath::parse(&e.path).strip_prefix(&sub_path) {
                e.path = rel.to_string();
            }
        }
        Ok(ValidationResult::from_errors(errors))
    }

    /// Incremental evaluation inside a subform. `changed` paths are
    /// relative to the subform; so are the keys of the result.
    pub fn evaluate_dependents_subform<S: AsRef<str>>(
        &mut self,
        path: &str,
        changed: &[S],
        data: Value,
        context: Option<Value>,
        nested: bool,
    ) -> Result<Value, EvalError> {
        let sid = self.subform_id(path)?;
        let data = object_arg("data", Some(data))?;
        self.update_context(context)?;
        let sub_path = self.schema.node(sid).path.clone();
        let changed: Vec<DataPath> = changed
            .iter()
            .map(|p| sub_path.join(&DataPath::parse(p.as_ref())))
            .collect();

        let units = match self.subform_kind(sid) {
            SubformKind::Array => {
                let mut base = self.scope_base();
                sub_path.assign(&mut base, data);
                engine::overlay(&self.schema, &self.state.resolved, Some(sid), &mut base);
                let units = self.plan(Some(sid), &changed, nested, None);
                if !units.is_empty() {
                    self.run_pass(&units, &mut base);
                }
                self.state.scopes.insert(sid, base);
                units
            }
            SubformKind::Object => {
                sub_path.assign(&mut self.data, data);
                let mut root = self.fresh_root();
                engine::overlay(&self.schema, &self.state.resolved, None, &mut root);
                let units = self.plan(None, &changed, nested, Some(sid));
                if !units.is_empty() {
                    self.run_pass(&units, &mut root);
                }
                self.state.root_doc = root;
                units
            }
        };
        self.state.bump();
        Ok(Projector::new(&self.schema, &self.state).partial(&units, Some(&sub_path)))
    }

    pub fn get_evaluated_schema_subform(&mut self, path: &str, skip_layout: Option<bool>) -> Result<Value, EvalError> {
        let sid = self.subform_id(path)?;
        let skip = skip_layout.unwrap_or(!self.config.resolve_layout);
        let projector = Projector::new(&self.schema, &self.state);
        Ok(if skip {
            projector.subform_document(sid, None)
        } else {
            projector.subform_document(sid, Some(&mut self.layout_cache))
        })
    }

    /// Values of the subform's nodes, relative to the subform.
    pub fn get_schema_value_subform(&self, path: &str) -> Result<Value, EvalError> {
        let sid = self.subform_id(path)?;
        let scope = match self.subform_kind(sid) {
            SubformKind::Array => Some(sid),
            SubformKind::Object => None,
        };
        Ok(Projector::new(&self.schema, &self.state).schema_value(scope, Some(sid)))
    }
}
