//! End-to-end tests of the reqwest collaborators against a mock control plane
//! and runtime served by wiremock.

use std::sync::Arc;

use chrono::DateTime;
use mvquery_core::expression::{Expression, Operation};
use mvquery_core::request::{AggregationRequest, Dimension, Measure, SortSpec, TimeRange};
use mvquery_mcp_runtime::control_plane::HttpControlPlane;
use mvquery_mcp_runtime::transport::HttpRuntimeTransport;
use mvquery_mcp_runtime::{
    ControlPlaneError, McpServeArgs, MetricsViewClient, QueryError, SessionError,
    SessionResolver, TransportError,
};
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helpers
// ============================================================================

const PROJECT_PATH: &str = "/v1/organizations/acme/projects/sales-project";

fn descriptor(runtime_host: &str, jwt: &str) -> Value {
    json!({
        "project": {"name": "sales-project"},
        "prodDeployment": {
            "runtimeHost": runtime_host,
            "runtimeInstanceId": "inst-1"
        },
        "jwt": jwt
    })
}

async fn mount_control_plane(server: &MockServer, jwt: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(PROJECT_PATH))
        .and(header("Authorization", "Bearer svc-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(descriptor(&server.uri(), jwt)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> MetricsViewClient {
    let http = reqwest::Client::new();
    let control_plane = HttpControlPlane::new(
        http.clone(),
        server.uri(),
        "acme",
        "sales-project",
        "svc-token",
    );
    MetricsViewClient::new(
        Arc::new(SessionResolver::new(Arc::new(control_plane))),
        Arc::new(HttpRuntimeTransport::new(http)),
    )
}

// ============================================================================
// Aggregation
// ============================================================================

#[tokio::test]
async fn aggregation_round_trip_uses_cached_session() {
    let server = MockServer::start().await;
    mount_control_plane(&server, "jwt-1", 1).await;

    let rows = json!({"data": [{"country": "US", "revenue": 120.5}, {"country": "CA", "revenue": null}]});
    Mock::given(method("POST"))
        .and(path("/v1/instances/inst-1/queries/metrics-views/sales/aggregation"))
        .and(header("Authorization", "Bearer jwt-1"))
        .and(body_json(json!({
            "dimensions": [{"name": "country"}],
            "measures": [{"name": "revenue"}],
            "sort": [{"name": "revenue", "desc": true}],
            "timeRange": {"start": "2024-01-01T00:00:00Z", "end": "2024-02-01T00:00:00Z"},
            "where": {"cond": {"op": "OPERATION_NEQ", "exprs": [{"ident": "country"}, {"val": "XX"}]}},
            "limit": "10"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows.clone()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = AggregationRequest::new("sales")
        .dimension(Dimension::new("country"))
        .measure(Measure::new("revenue"))
        .sort_by(SortSpec::descending("revenue"))
        .time_range(TimeRange::new(
            DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
            DateTime::parse_from_rfc3339("2024-02-01T00:00:00Z").unwrap(),
        ))
        .filter(Expression::compare(Operation::Neq, "country", "XX"))
        .limit(10);

    assert_eq!(client.get_metrics_view_aggregation(&request).await.unwrap(), rows);
    assert_eq!(client.get_metrics_view_aggregation(&request).await.unwrap(), rows);
    assert_eq!(client.sessions().lookup_count(), 1);
}

#[tokio::test]
async fn runtime_rejection_surfaces_status_and_body() {
    let server = MockServer::start().await;
    mount_control_plane(&server, "jwt-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/v1/instances/inst-1/queries/metrics-views/sales/time-range-summary"))
        .and(body_json(json!({})))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"code": 5, "message": "metrics view not found"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_metrics_view_time_range_summary("sales")
        .await
        .unwrap_err();
    match err {
        QueryError::Transport(TransportError::Status { status, body }) => {
            assert_eq!(status, 404);
            assert_eq!(body["message"], "metrics view not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[tokio::test]
async fn spec_lookup_sends_resource_name_and_prunes_result() {
    let server = MockServer::start().await;
    mount_control_plane(&server, "jwt-1", 1).await;

    Mock::given(method("GET"))
        .and(path("/v1/instances/inst-1/resource"))
        .and(query_param("name.kind", "rill.runtime.v1.MetricsView"))
        .and(query_param("name.name", "sales"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resource": {
                "meta": {"name": {"kind": "rill.runtime.v1.MetricsView", "name": "sales"}},
                "metricsView": {
                    "spec": {"table": "raw"},
                    "state": {"validSpec": {
                        "table": "orders",
                        "timeDimension": "created_at",
                        "description": "",
                        "dimensions": [{"name": "country", "column": "country", "label": ""}],
                        "measures": [{"name": "revenue", "expression": "SUM(amount)", "format": null}],
                        "security": {}
                    }}
                }
            }
        })))
        .mount(&server)
        .await;

    let spec = client_for(&server).get_metrics_view_spec("sales").await.unwrap();
    assert_eq!(
        spec,
        json!({
            "table": "orders",
            "timeDimension": "created_at",
            "dimensions": [{"name": "country", "column": "country"}],
            "measures": [{"name": "revenue", "expression": "SUM(amount)"}]
        })
    );
}

#[tokio::test]
async fn list_reads_resource_names() {
    let server = MockServer::start().await;
    mount_control_plane(&server, "jwt-1", 1).await;

    Mock::given(method("GET"))
        .and(path("/v1/instances/inst-1/resources"))
        .and(query_param("kind", "rill.runtime.v1.MetricsView"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [
                {"meta": {"name": {"name": "sales"}}},
                {"meta": {"name": {"name": "orders"}}}
            ]
        })))
        .mount(&server)
        .await;

    let names = client_for(&server).list_metrics_views().await.unwrap();
    assert_eq!(names, vec!["sales", "orders"]);
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn control_plane_failure_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PROJECT_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    for _ in 0..2 {
        let err = client.list_metrics_views().await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::SessionUnavailable(SessionError::Lookup(ControlPlaneError::Status {
                status: 401,
                ..
            }))
        ));
        assert_eq!(err.code(), "session_unavailable");
    }
    assert_eq!(client.sessions().lookup_count(), 2);
}

#[tokio::test]
async fn refresh_session_picks_up_new_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PROJECT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(descriptor(&server.uri(), "jwt-1")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROJECT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(descriptor(&server.uri(), "jwt-2")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/instances/inst-1/resources"))
        .and(header("Authorization", "Bearer jwt-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resources": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(client.sessions().resolve().await.unwrap().credential, "jwt-1");
    assert_eq!(client.refresh_session().await.unwrap().credential, "jwt-2");
    assert!(client.list_metrics_views().await.unwrap().is_empty());
}

#[tokio::test]
async fn serve_args_wire_the_full_pipeline() {
    let server = MockServer::start().await;
    mount_control_plane(&server, "jwt-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/v1/instances/inst-1/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let args = McpServeArgs {
        admin_url: server.uri(),
        organization: "acme".to_string(),
        project: "sales-project".to_string(),
        service_token: "svc-token".to_string(),
        request_timeout_secs: 5,
        request_timeout: None,
    };
    let client = args.build_client().unwrap();
    assert!(client.list_metrics_views().await.unwrap().is_empty());
}
