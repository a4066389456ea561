use std::sync::Arc;

use mvquery_core::request::AggregationRequest;
use mvquery_core::session::Session;
use mvquery_core::wire::{self, RuntimeCall};
use serde_json::Value;

use crate::error::QueryError;
use crate::session::SessionResolver;
use crate::transport::RuntimeTransport;

/// Query surface over a metrics-view runtime. Every operation validates its
/// input, resolves the shared session, translates and sends one call.
/// There are no retries at this layer.
pub struct MetricsViewClient {
    sessions: Arc<SessionResolver>,
    transport: Arc<dyn RuntimeTransport>,
}

impl MetricsViewClient {
    pub fn new(sessions: Arc<SessionResolver>, transport: Arc<dyn RuntimeTransport>) -> Self {
        Self {
            sessions,
            transport,
        }
    }

    pub fn sessions(&self) -> &SessionResolver {
        &self.sessions
    }

    pub async fn list_metrics_views(&self) -> Result<Vec<String>, QueryError> {
        let response = self.execute(wire::list_metrics_views_call()).await?;
        Ok(wire::extract_metrics_view_names(&response))
    }

    /// Valid spec of a metrics view with empty values pruned. A view that has
    /// not been reconciled yet yields `{}`.
    pub async fn get_metrics_view_spec(&self, name: &str) -> Result<Value, QueryError> {
        let call = wire::metrics_view_spec_call(name)?;
        let response = self.execute(call).await?;
        Ok(wire::prune(wire::extract_valid_spec(&response)))
    }

    pub async fn get_metrics_view_time_range_summary(
        &self,
        metrics_view: &str,
    ) -> Result<Value, QueryError> {
        let call = wire::time_range_summary_call(metrics_view)?;
        self.execute(call).await
    }

    /// Raw aggregation result; rows are not pruned.
    pub async fn get_metrics_view_aggregation(
        &self,
        request: &AggregationRequest,
    ) -> Result<Value, QueryError> {
        let call = wire::aggregation_call(request)?;
        self.execute(call).await
    }

    /// Looks up a new session; the cached one is replaced only on success.
    pub async fn refresh_session(&self) -> Result<Session, QueryError> {
        Ok(self.sessions.refresh().await?)
    }

    async fn execute(&self, call: RuntimeCall) -> Result<Value, QueryError> {
        let session = self.sessions.resolve().await?;
        let response = self.transport.send(&session, &call).await?;
        Ok(response)
    }
}
