//! formeval-eval: evaluator instances over a parsed schema.
//!
//! Takes a [`formeval_core::ParsedSchema`] (shared through the
//! [`ParsedSchemaCache`]) and a data object, evaluates every computed
//! property and rule in dependency order, and projects the result back
//! into the schema document shape. Re-evaluation after a partial change
//! reruns only the affected units; unchanged units are served from a
//! per-instance cache keyed by the values they read.

pub mod cache;
pub mod config;
pub mod dates;
pub mod engine;
pub mod error;
pub mod evaluated;
pub mod instance;
pub mod layout;
pub mod logic;
pub mod numeric;
mod project;
pub mod query;
pub mod run;
pub mod schema_cache;
pub mod shared;
mod subform;
pub mod table;
pub mod validate;
pub mod value;

// ── Convenience re-exports ───────────────────────────────────────────

pub use cache::{CacheStats, EvalCache};
pub use config::EngineConfig;
pub use dates::Clock;
pub use error::{EvalError, ExpressionError};
pub use evaluated::{EvaluatedSchema, Outcome, Resolved, RuleState};
pub use formeval_core::{DataPath, ParsedSchema, SchemaError, PARAMS_KEY};
pub use instance::{SchemaEvaluator, SchemaSource};
pub use logic::Evaluator;
pub use query::ReturnFormat;
pub use run::{evaluate_logic, CompiledLogic};
pub use schema_cache::{ParsedSchemaCache, SchemaCacheStats};
pub use shared::SharedEvaluator;
pub use validate::{ValidationError, ValidationResult};
pub use value::Value;

/// Library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
