use async_trait::async_trait;
use mvquery_core::session::Session;
use mvquery_core::wire::{HttpMethod, RuntimeCall};
use reqwest::{Method, Url};
use serde_json::Value;

use crate::error::TransportError;

/// Carries a [`RuntimeCall`] to the runtime instance named by a session.
#[async_trait]
pub trait RuntimeTransport: Send + Sync {
    async fn send(&self, session: &Session, call: &RuntimeCall) -> Result<Value, TransportError>;
}

pub struct HttpRuntimeTransport {
    http: reqwest::Client,
}

impl HttpRuntimeTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn call_url(session: &Session, call: &RuntimeCall) -> Result<Url, TransportError> {
    let mut url = Url::parse(&session.host)
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", session.host)))?;
    url.path_segments_mut()
        .map_err(|()| TransportError::InvalidUrl(session.host.clone()))?
        .pop_if_empty()
        .extend(call.path_segments(&session.instance_id));
    if !call.query.is_empty() {
        let mut qp = url.query_pairs_mut();
        for (k, v) in &call.query {
            qp.append_pair(k, v);
        }
    }
    Ok(url)
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
    }
}

/// JSON if possible, otherwise the raw text. Used for error bodies only.
fn parse_error_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).to_string()))
}

#[async_trait]
impl RuntimeTransport for HttpRuntimeTransport {
    async fn send(&self, session: &Session, call: &RuntimeCall) -> Result<Value, TransportError> {
        let url = call_url(session, call)?;
        tracing::debug!(
            method = call.method.as_str(),
            path = %url.path(),
            instance_id = %session.instance_id,
            "sending runtime call"
        );

        let mut request = self
            .http
            .request(method(call.method), url)
            .bearer_auth(&session.credential);
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connection {
                host: session.host.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Decode(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                path = %call.path(&session.instance_id),
                "runtime call rejected"
            );
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: parse_error_body(&bytes),
            });
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvquery_core::wire::{metrics_view_spec_call, time_range_summary_call};

    fn session(host: &str) -> Session {
        Session::new(host, "inst 1", "jwt")
    }

    #[test]
    fn url_combines_host_instance_and_query() {
        let call = metrics_view_spec_call("sales").unwrap();
        let url = call_url(&session("https://rt.example.com"), &call).unwrap();
        assert_eq!(
            url.as_str(),
            "https://rt.example.com/v1/instances/inst%201/resource?name.kind=rill.runtime.v1.MetricsView&name.name=sales"
        );
    }

    #[test]
    fn url_encodes_metrics_view_names_as_single_segments() {
        let call = time_range_summary_call("a/b").unwrap();
        let url = call_url(&session("http://localhost:8081/"), &call).unwrap();
        assert_eq!(
            url.path(),
            "/v1/instances/inst%201/queries/metrics-views/a%2Fb/time-range-summary"
        );
    }

    #[test]
    fn error_bodies_fall_back_to_text() {
        assert_eq!(parse_error_body(b""), Value::Null);
        assert_eq!(
            parse_error_body(br#"{"code":5}"#),
            serde_json::json!({"code": 5})
        );
        assert_eq!(
            parse_error_body(b"bad gateway"),
            Value::String("bad gateway".to_string())
        );
    }
}
