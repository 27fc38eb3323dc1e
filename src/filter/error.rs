//! Compile-time error type for rule documents.

use thiserror::Error;

/// An error produced while compiling a rule document into conditions,
/// expressions, transforms or post-processors.
///
/// Carries the offending sub-document so callers can surface exactly which
/// part of a rule file failed. Context is prepended as the error travels up
/// through the compilers, mirroring the nesting of the document.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CompileError {
    message: String,
    input: serde_yaml::Value,
}

impl CompileError {
    pub fn new(message: impl Into<String>, input: &serde_yaml::Value) -> Self {
        CompileError {
            message: message.into(),
            input: input.clone(),
        }
    }

    /// An error with no associated sub-document (e.g. a missing asset).
    pub fn msg(message: impl Into<String>) -> Self {
        CompileError {
            message: message.into(),
            input: serde_yaml::Value::Null,
        }
    }

    /// Prepend context, e.g. `"all"` or `"case: when"`.
    #[must_use]
    pub fn context(mut self, prefix: &str) -> Self {
        self.message = format!("{prefix}: {}", self.message);
        self
    }

    /// The parsed sub-document that failed to compile.
    pub fn document(&self) -> &serde_yaml::Value {
        &self.input
    }

    /// The offending sub-document re-serialised as YAML, for diagnostics.
    pub fn document_yaml(&self) -> String {
        serde_yaml::to_string(&self.input).unwrap_or_default()
    }
}

/// Short type descriptions used in error messages, so a failure on
/// `filter: 12` reads "unsupported type: number".
pub(crate) fn type_name(v: &serde_yaml::Value) -> &'static str {
    match v {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_chain() {
        let doc: serde_yaml::Value = serde_yaml::from_str("{building: 12}").unwrap();
        let err = CompileError::new("unsupported type: number", &doc)
            .context("all")
            .context("filter");
        assert_eq!(err.to_string(), "filter: all: unsupported type: number");
    }

    #[test]
    fn document_roundtrip() {
        let doc: serde_yaml::Value = serde_yaml::from_str("{compare: [1, bad, 2]}").unwrap();
        let err = CompileError::new("invalid operator", &doc);
        assert!(err.document_yaml().contains("compare"));
    }
}
