use formeval_core::SchemaError;

/// Errors returned by instance operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// The schema document is malformed or has a dependency cycle.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Construction from a cache key that holds no parsed schema.
    #[error("no parsed schema cached under key '{key}'")]
    CacheMiss { key: String },

    /// A subform path that names no subform.
    #[error("subform not found: {path}")]
    NotFound { path: String },

    /// Data or context argument of the wrong shape.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Standalone logic that does not compile or fails when run.
    #[error("logic error: {message}")]
    Logic { message: String },
}

impl EvalError {
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Schema(_) => "SchemaError",
            EvalError::CacheMiss { .. } => "CacheMissError",
            EvalError::NotFound { .. } => "NotFoundError",
            EvalError::InvalidInput { .. } => "InvalidInput",
            EvalError::Logic { .. } => "LogicError",
        }
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            EvalError::Schema(e) => e.to_json_value(),
            other => serde_json::json!({
                "kind": other.kind(),
                "message": other.to_string(),
            }),
        }
    }
}

/// A single expression failed. Never escapes an operation: the property it
/// belongs to resolves to absent and the message is recorded in `$errors`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExpressionError {
    pub message: String,
}

impl ExpressionError {
    pub fn new(message: impl Into<String>) -> Self {
        ExpressionError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_converts_and_keeps_shape() {
        let err: EvalError = SchemaError::new("a", "bad").into();
        assert_eq!(err.kind(), "SchemaError");
        assert_eq!(err.to_json_value()["path"], "a");
    }

    #[test]
    fn cache_miss_message_names_key() {
        let err = EvalError::CacheMiss {
            key: "policy-v2".to_string(),
        };
        assert!(err.to_string().contains("policy-v2"));
        assert_eq!(err.to_json_value()["kind"], "CacheMissError");
    }
}
