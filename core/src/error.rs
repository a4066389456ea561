use serde::Serialize;

/// Structured input error, raised while assembling a query before any I/O.
/// Carries the offending field path so an agent can correct the argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("validation error in field {field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. "where.cond.exprs[1]")
    pub field: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefix the field path with a parent segment, used while unwinding
    /// nested expression decoding.
    pub fn nested(mut self, parent: &str) -> Self {
        self.field = if self.field.is_empty() {
            parent.to_string()
        } else if self.field.starts_with('[') {
            format!("{parent}{}", self.field)
        } else {
            format!("{parent}.{}", self.field)
        };
        self
    }
}

/// Error codes used across the query surface
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const SESSION_UNAVAILABLE: &str = "session_unavailable";
    pub const TRANSPORT_ERROR: &str = "transport_error";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
