use std::fmt;

use serde_json::Value;

/// Placeholder host that local development deployments report.
pub const DEV_PLACEHOLDER_HOST: &str = "http://localhost:9091";
/// Where the local development runtime actually listens.
pub const DEV_RUNTIME_HOST: &str = "http://localhost:8081";

/// Ephemeral runtime credentials issued by the control plane.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Normalized runtime base URL
    pub host: String,
    pub instance_id: String,
    /// Bearer token for the runtime (short-lived JWT)
    pub credential: String,
}

// The credential stays out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("instance_id", &self.instance_id)
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl Session {
    pub fn new(
        host: impl Into<String>,
        instance_id: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            host: normalize_host(&host.into()),
            instance_id: instance_id.into(),
            credential: credential.into(),
        }
    }

    /// Build a session from a control-plane project descriptor:
    /// `prodDeployment.runtimeHost`, `prodDeployment.runtimeInstanceId` and a
    /// top-level `jwt`. A `deployment` sub-object is accepted in place of
    /// `prodDeployment`. Returns the name of the first missing field otherwise.
    pub fn from_project_descriptor(descriptor: &Value) -> Result<Self, &'static str> {
        let deployment = descriptor
            .get("prodDeployment")
            .filter(|v| v.is_object())
            .or_else(|| descriptor.get("deployment").filter(|v| v.is_object()))
            .ok_or("prodDeployment")?;
        let host = non_empty_str(deployment.get("runtimeHost")).ok_or("runtimeHost")?;
        let instance_id =
            non_empty_str(deployment.get("runtimeInstanceId")).ok_or("runtimeInstanceId")?;
        let jwt = non_empty_str(descriptor.get("jwt")).ok_or("jwt")?;
        Ok(Session::new(host, instance_id, jwt))
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Rewrites the local development placeholder host to the real local runtime
/// endpoint. Exact-string match only; every other host passes through.
pub fn normalize_host(host: &str) -> String {
    if host == DEV_PLACEHOLDER_HOST {
        DEV_RUNTIME_HOST.to_string()
    } else {
        host.to_string()
    }
}
