//! Translation between the in-memory query model and the runtime's JSON
//! protocol, in both directions.
//!
//! Outbound: every operation becomes a [`RuntimeCall`] (method, path below
//! `/v1/instances/{instance_id}/`, query pairs, optional body). Optional fields
//! that were never set are omitted from bodies entirely; the runtime treats an
//! absent field differently from `null` for some parameters.
//!
//! Inbound: metadata payloads are pruned of empty values before they are handed
//! back to the caller. Aggregation rows are never pruned, since an empty cell
//! there is a missing value, not noise.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::ValidationError;
use crate::expression::Expression;
use crate::request::{AggregationRequest, Dimension, Measure, SortSpec, TimeGrain, TimeRange};

/// Resource kind of metrics views in the runtime catalog.
pub const METRICS_VIEW_KIND: &str = "rill.runtime.v1.MetricsView";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// One request against a runtime instance, independent of any transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeCall {
    pub method: HttpMethod,
    /// Path segments below `/v1/instances/{instance_id}/`, unencoded
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RuntimeCall {
    fn new(method: HttpMethod, segments: &[&str]) -> Self {
        Self {
            method,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Full path segments including the instance prefix.
    pub fn path_segments<'a>(&'a self, instance_id: &'a str) -> impl Iterator<Item = &'a str> {
        ["v1", "instances", instance_id]
            .into_iter()
            .chain(self.segments.iter().map(String::as_str))
    }

    /// Human-readable path, e.g. for logs and tests. Transports should build
    /// URLs from [`RuntimeCall::path_segments`] so names get percent-encoded.
    pub fn path(&self, instance_id: &str) -> String {
        let mut path = String::new();
        for segment in self.path_segments(instance_id) {
            path.push('/');
            path.push_str(segment);
        }
        path
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

pub fn list_metrics_views_call() -> RuntimeCall {
    let mut call = RuntimeCall::new(HttpMethod::Get, &["resources"]);
    call.query.push(("kind".to_string(), METRICS_VIEW_KIND.to_string()));
    call
}

pub fn metrics_view_spec_call(name: &str) -> Result<RuntimeCall, ValidationError> {
    let name = required_name(name, "name")?;
    let mut call = RuntimeCall::new(HttpMethod::Get, &["resource"]);
    call.query.push(("name.kind".to_string(), METRICS_VIEW_KIND.to_string()));
    call.query.push(("name.name".to_string(), name.to_string()));
    Ok(call)
}

pub fn time_range_summary_call(metrics_view: &str) -> Result<RuntimeCall, ValidationError> {
    let metrics_view = required_name(metrics_view, "metrics_view")?;
    let mut call = RuntimeCall::new(
        HttpMethod::Post,
        &["queries", "metrics-views", metrics_view, "time-range-summary"],
    );
    call.body = Some(json!({}));
    Ok(call)
}

/// Validates the request and builds the aggregation call. `metrics_view` is
/// consumed into the path and left out of the body.
pub fn aggregation_call(request: &AggregationRequest) -> Result<RuntimeCall, ValidationError> {
    request.validate()?;
    let metrics_view = required_name(&request.metrics_view, "metrics_view")?;
    let mut call = RuntimeCall::new(
        HttpMethod::Post,
        &["queries", "metrics-views", metrics_view, "aggregation"],
    );
    call.body = Some(aggregation_body(request));
    Ok(call)
}

/// Wire body of an aggregation request.
pub fn aggregation_body(request: &AggregationRequest) -> Value {
    let wire = WireAggregation {
        dimensions: request.dimensions.iter().map(WireDimension::from).collect(),
        measures: request.measures.iter().map(WireMeasure::from).collect(),
        sort: request
            .sort
            .as_ref()
            .map(|sort| sort.iter().map(WireSort::from).collect()),
        time_range: request.time_range.as_ref().map(WireTimeRange::from),
        comparison_time_range: request.comparison_time_range.as_ref().map(WireTimeRange::from),
        pivot_on: request.pivot_on.as_deref(),
        where_clause: request.where_clause.as_ref(),
        having: request.having.as_ref(),
        limit: request.limit.map(|n| n.to_string()),
        offset: request.offset.map(|n| n.to_string()),
        exact: request.exact,
        fill_missing: request.fill_missing,
        rows: request.rows,
    };
    // Plain data with string keys; serialization cannot fail.
    serde_json::to_value(wire).unwrap_or_else(|_| Value::Object(Map::new()))
}

fn required_name<'a>(name: &'a str, field: &str) -> Result<&'a str, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, "metrics view name is required"));
    }
    Ok(trimmed)
}

/// RFC 3339 with explicit offset; UTC renders as `Z`.
pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireAggregation<'a> {
    dimensions: Vec<WireDimension<'a>>,
    measures: Vec<WireMeasure<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort: Option<Vec<WireSort<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_range: Option<WireTimeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comparison_time_range: Option<WireTimeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pivot_on: Option<&'a [String]>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    where_clause: Option<&'a Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    having: Option<&'a Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exact: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fill_missing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireDimension<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_grain: Option<TimeGrain>,
}

impl<'a> From<&'a Dimension> for WireDimension<'a> {
    fn from(d: &'a Dimension) -> Self {
        Self {
            name: &d.name,
            time_grain: d.time_grain,
        }
    }
}

#[derive(Serialize)]
struct WireMeasure<'a> {
    name: &'a str,
}

impl<'a> From<&'a Measure> for WireMeasure<'a> {
    fn from(m: &'a Measure) -> Self {
        Self { name: &m.name }
    }
}

#[derive(Serialize)]
struct WireSort<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    desc: Option<bool>,
}

impl<'a> From<&'a SortSpec> for WireSort<'a> {
    fn from(s: &'a SortSpec) -> Self {
        Self {
            name: &s.name,
            desc: s.desc,
        }
    }
}

#[derive(Serialize)]
struct WireTimeRange {
    start: String,
    end: String,
}

impl From<&TimeRange> for WireTimeRange {
    fn from(r: &TimeRange) -> Self {
        Self {
            start: format_timestamp(&r.start),
            end: format_timestamp(&r.end),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Recursively drops map entries and array elements that are `null`, `""`,
/// `[]` or `{}`. Children are pruned first, so a collection emptied by pruning
/// is itself dropped from its parent. Surviving keys, values and order are
/// untouched. The top-level value itself is never dropped.
pub fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter_map(|(key, child)| {
                    let child = prune(child);
                    (!is_prunable(&child)).then_some((key, child))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(prune)
                .filter(|child| !is_prunable(child))
                .collect(),
        ),
        other => other,
    }
}

fn is_prunable(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// `resource.metricsView.state.validSpec` of a resource lookup. A resource
/// that has not been reconciled yet has no valid spec; that is a steady state,
/// so any missing level yields an empty object instead of an error.
pub fn extract_valid_spec(response: &Value) -> Value {
    response
        .pointer("/resource/metricsView/state/validSpec")
        .filter(|spec| spec.is_object())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// Names from `resources[].meta.name.name`; malformed entries are skipped and
/// an absent `resources` array means no metrics views.
pub fn extract_metrics_view_names(response: &Value) -> Vec<String> {
    response
        .get("resources")
        .and_then(Value::as_array)
        .map(|resources| {
            resources
                .iter()
                .filter_map(|r| r.pointer("/meta/name/name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
