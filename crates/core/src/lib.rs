//! formeval-core: schema parsing and dependency analysis.
//!
//! Turns a raw schema document into an immutable [`ParsedSchema`]: an
//! arena of [`SchemaNode`]s, the compiled expressions of every computed
//! property and rule, and the [`DependencyGraph`] that maps changed data
//! paths to the evaluation units that must be recomputed. Nothing here
//! evaluates expressions; see `formeval-eval`.

pub mod error;
pub mod expr;
pub mod graph;
pub mod path;
pub mod schema;
pub mod table;

// ── Convenience re-exports ───────────────────────────────────────────

pub use error::SchemaError;
pub use expr::{Expr, Op, PathRef, ReadSet};
pub use graph::DependencyGraph;
pub use path::{DataPath, PathRoot, CONTEXT_ROOT, PARAMS_ROOT};
pub use schema::{
    content_key_of, ComputedProperty, EvalUnit, NodeId, NodeType, ParsedSchema, RuleDef,
    RuleKind, RuleValue, SchemaNode, SubformKind, UnitId, UnitKind, DEFAULT_RULE_MESSAGE,
    EVALUATION_KEY, LAYOUT_KEY, PARAMS_KEY, SUBFORM_KEY,
};
pub use table::{Cell, Column, RowPlan, TableData, TableDef, ITERATION_VAR, THRESHOLD_VAR};
