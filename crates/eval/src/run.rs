//! Running logic outside the schema.
//!
//! Expressions are compiled once into a [`CompiledLogic`] and run against
//! either an instance's current evaluated data or an explicit data
//! object. Unlike schema properties, a standalone run reports expression
//! failures to the caller.

use std::str::FromStr;

use formeval_core::{DataPath, Expr};
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::dates::Clock;
use crate::engine;
use crate::error::EvalError;
use crate::instance::{object_arg, SchemaEvaluator};
use crate::logic::Evaluator;

/// A JSON-logic expression checked and ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledLogic {
    expr: Expr,
}

impl CompiledLogic {
    /// Compile `logic`. Unknown operators and wrong argument counts are
    /// rejected here rather than on the first run.
    pub fn compile(logic: &Value) -> Result<CompiledLogic, EvalError> {
        let expr = Expr::compile(logic).map_err(|message| EvalError::Logic { message })?;
        let invalid = expr.invalid_nodes();
        if !invalid.is_empty() {
            return Err(EvalError::Logic {
                message: invalid.join("; "),
            });
        }
        Ok(CompiledLogic { expr })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Paths the expression reads.
    pub fn reads(&self) -> Vec<DataPath> {
        self.expr.reads()
    }

    /// Run against a working root already carrying `$context`/`$params`.
    pub fn run_on(&self, root: &Value, clock: &Clock) -> Result<Value, EvalError> {
        let v = Evaluator::new(root, clock)
            .eval(&self.expr)
            .map_err(|e| EvalError::Logic { message: e.message })?;
        Ok(if v.is_absent() { Value::Null } else { v.to_json() })
    }
}

impl FromStr for CompiledLogic {
    type Err = EvalError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let doc: Value = serde_json::from_str(text).map_err(|e| EvalError::InvalidInput {
            message: format!("logic is not valid JSON: {}", e),
        })?;
        CompiledLogic::compile(&doc)
    }
}

/// Evaluate `logic` once against `data`, with `context` mounted under
/// `$context`. No schema, no caching, no side effects.
pub fn evaluate_logic(logic: &Value, data: Option<Value>, context: Option<Value>) -> Result<Value, EvalError> {
    let compiled = CompiledLogic::compile(logic)?;
    let data = object_arg("data", data)?;
    let context = object_arg("context", context)?;
    let root = engine::build_root(&data, &context, &Value::Object(Map::new()));
    let clock = Clock::system(EngineConfig::default().timezone_offset_minutes);
    compiled.run_on(&root, &clock)
}

impl SchemaEvaluator {
    pub fn compile_logic(&self, logic: &Value) -> Result<CompiledLogic, EvalError> {
        CompiledLogic::compile(logic)
    }

    /// Run compiled logic. Without `data` it reads the current evaluated
    /// document (inputs plus computed values); without `context` it uses
    /// the instance context. Schema constants stay readable at `$params`.
    pub fn run_logic(
        &self,
        logic: &CompiledLogic,
        data: Option<Value>,
        context: Option<Value>,
    ) -> Result<Value, EvalError> {
        let root = match (data, context) {
            (None, None) => self.state.root_doc.clone(),
            (data, context) => {
                let data = match data {
                    Some(d) => object_arg("data", Some(d))?,
                    None => self.state.root_doc.clone(),
                };
                let context = match context {
                    Some(c) => object_arg("context", Some(c))?,
                    None => self.context.clone(),
                };
                engine::build_root(&data, &context, &self.schema.params)
            }
        };
        let clock = self.clock();
        logic.run_on(&root, &clock)
    }

    pub fn compile_and_run_logic(
        &self,
        logic: &Value,
        data: Option<Value>,
        context: Option<Value>,
    ) -> Result<Value, EvalError> {
        let compiled = self.compile_logic(logic)?;
        self.run_logic(&compiled, data, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluates_against_data_and_context() {
        let logic = json!({"+": [{"var": "a"}, {"var": "$context.bonus"}]});
        let out = evaluate_logic(&logic, Some(json!({"a": 2})), Some(json!({"bonus": 3}))).unwrap();
        assert_eq!(out, json!(5));
    }

    #[test]
    fn missing_values_come_back_null() {
        let out = evaluate_logic(&json!({"var": "nothing"}), None, None).unwrap();
        assert_eq!(out, Value::Null);
    }

    #[test]
    fn unknown_operator_fails_at_compile() {
        let err = CompiledLogic::compile(&json!({"frobnicate": [1]})).unwrap_err();
        assert_eq!(err.kind(), "LogicError");
        assert!(err.to_string().contains("frobnicate"));
        let err = CompiledLogic::compile(&json!({"+": [1], "-": [2]})).unwrap_err();
        assert_eq!(err.kind(), "LogicError");
    }

    #[test]
    fn parses_from_text() {
        let logic: CompiledLogic = r#"{"cat": ["a", {"var": "b"}]}"#.parse().unwrap();
        assert_eq!(logic.reads(), vec![DataPath::parse("b")]);
        let err = "{oops".parse::<CompiledLogic>().unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[test]
    fn data_must_be_an_object() {
        let err = evaluate_logic(&json!(1), Some(json!([1])), None).unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
