use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use crate::error::ControlPlaneError;

/// Source of project descriptors, which carry the runtime host, instance id
/// and a short-lived runtime credential.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn project_descriptor(&self) -> Result<Value, ControlPlaneError>;
}

/// Admin API client authenticated with a long-lived service token.
pub struct HttpControlPlane {
    http: reqwest::Client,
    admin_url: String,
    organization: String,
    project: String,
    service_token: String,
}

impl HttpControlPlane {
    pub fn new(
        http: reqwest::Client,
        admin_url: impl Into<String>,
        organization: impl Into<String>,
        project: impl Into<String>,
        service_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            admin_url: admin_url.into(),
            organization: organization.into(),
            project: project.into(),
            service_token: service_token.into(),
        }
    }

    fn project_url(&self) -> Result<Url, ControlPlaneError> {
        let mut url = Url::parse(&self.admin_url)
            .map_err(|e| ControlPlaneError::InvalidUrl(format!("{}: {e}", self.admin_url)))?;
        url.path_segments_mut()
            .map_err(|()| ControlPlaneError::InvalidUrl(self.admin_url.clone()))?
            .pop_if_empty()
            .extend([
                "v1",
                "organizations",
                self.organization.as_str(),
                "projects",
                self.project.as_str(),
            ]);
        Ok(url)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn project_descriptor(&self) -> Result<Value, ControlPlaneError> {
        let url = self.project_url()?;
        tracing::debug!(
            organization = %self.organization,
            project = %self.project,
            "requesting project descriptor"
        );

        let response = self
            .http
            .get(url.clone())
            .bearer_auth(&self.service_token)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Connection {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ControlPlaneError::Decode(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(ControlPlaneError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        serde_json::from_slice(&bytes).map_err(|e| ControlPlaneError::Decode(e.to_string()))
    }
}
