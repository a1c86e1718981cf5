use serde::{Deserialize, Serialize};

/// A structural problem found while parsing a schema document.
///
/// Parsing stops at the first problem; `path` names the offending node
/// (canonical dotted path, empty for the document root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("schema error at '{path}': {message}")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Error attached to the document root.
    pub fn root(message: impl Into<String>) -> Self {
        SchemaError::new("", message)
    }

    /// Serialize to the JSON shape hosts receive.
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": "SchemaError",
            "path": self.path,
            "message": self.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_path() {
        let e = SchemaError::new("address.city", "node must be an object");
        assert_eq!(
            e.to_string(),
            "schema error at 'address.city': node must be an object"
        );
    }

    #[test]
    fn json_shape() {
        let e = SchemaError::root("schema must be a JSON object");
        let v = e.to_json_value();
        assert_eq!(v["kind"], "SchemaError");
        assert_eq!(v["path"], "");
    }
}
