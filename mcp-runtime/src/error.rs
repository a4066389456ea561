use mvquery_core::error::{ValidationError, codes};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("invalid control plane URL: {0}")]
    InvalidUrl(String),
    #[error("failed to reach control plane at {url}: {message}")]
    Connection { url: String, message: String },
    #[error("control plane returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("control plane response is not valid JSON: {0}")]
    Decode(String),
}

/// Why no runtime session could be produced. The cache is never modified
/// when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("control plane lookup failed: {0}")]
    Lookup(#[from] ControlPlaneError),
    #[error("project descriptor is missing `{0}`")]
    IncompleteDescriptor(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid runtime URL: {0}")]
    InvalidUrl(String),
    #[error("failed to reach runtime at {host}: {message}")]
    Connection { host: String, message: String },
    #[error("runtime returned HTTP {status}")]
    Status { status: u16, body: Value },
    #[error("runtime response is not valid JSON: {0}")]
    Decode(String),
}

/// Everything a query operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("session unavailable: {0}")]
    SessionUnavailable(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Validation(_) => codes::VALIDATION_FAILED,
            QueryError::SessionUnavailable(_) => codes::SESSION_UNAVAILABLE,
            QueryError::Transport(_) => codes::TRANSPORT_ERROR,
        }
    }

    /// Offending field for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            QueryError::Validation(err) => Some(err.field.as_str()),
            _ => None,
        }
    }

    pub fn docs_hint(&self) -> Option<&'static str> {
        match self {
            QueryError::Validation(_) => {
                Some("Correct the named field and retry; nothing was sent to the runtime.")
            }
            QueryError::SessionUnavailable(_) => Some(
                "Cannot reach the analytical runtime control plane. Check RILL_ADMIN_BASE_URL, \
                 RILL_ORGANIZATION_NAME, RILL_PROJECT_NAME and RILL_SERVICE_TOKEN.",
            ),
            QueryError::Transport(TransportError::Status { status: 401, .. }) => {
                Some("The runtime rejected the session credential; call refresh_session and retry.")
            }
            QueryError::Transport(_) => None,
        }
    }

    /// Status and body of a rejected runtime call.
    pub fn details(&self) -> Option<Value> {
        match self {
            QueryError::Transport(TransportError::Status { status, body }) => Some(
                serde_json::json!({
                    "status": status,
                    "body": body,
                }),
            ),
            _ => None,
        }
    }
}
